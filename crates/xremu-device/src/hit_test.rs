//! Hit-test source bookkeeping and the transient-input ray strategies.

use glam::{Mat4, Vec3};
use tracing::debug;
use xremu_vr::{Ray, XrError, XrResult};

use crate::input::InputSourceId;
use crate::math::transform_ray;
use crate::scene::World;
use crate::session::SessionId;
use crate::space::SpaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HitTestSourceId(pub(crate) u32);

#[derive(Debug, Clone, PartialEq)]
pub enum HitTestKind {
    /// Ray fixed to a space.
    Fixed { space: SpaceId },
    /// Ray following whichever input source matches `profile`.
    Transient { profile: String },
}

/// Results of a transient source for one input source.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientHitTestResult {
    pub input_source: InputSourceId,
    pub results: Vec<Mat4>,
}

#[derive(Debug, Clone)]
pub struct HitTestSource {
    pub id: HitTestSourceId,
    pub session: SessionId,
    pub kind: HitTestKind,
    pub offset_ray: Ray,
    pub active: bool,
    results: Vec<Mat4>,
    transient_results: Vec<TransientHitTestResult>,
}

/// Input source a transient ray may be derived from.
#[derive(Debug, Clone, Copy)]
pub struct TransientCandidate<'a> {
    pub source: InputSourceId,
    pub profiles: &'a [String],
    pub target_ray: Mat4,
    pub axes: [f32; 4],
}

/// Derives the tracking-base ray frame for a transient hit-test source.
pub trait TransientRayStrategy {
    fn ray_base(
        &self,
        profile: &str,
        headset: Mat4,
        candidates: &[TransientCandidate<'_>],
    ) -> Option<(InputSourceId, Mat4)>;
}

/// Target ray of the first visible input source matching the profile.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstInputTargetRay;

impl TransientRayStrategy for FirstInputTargetRay {
    fn ray_base(
        &self,
        profile: &str,
        _headset: Mat4,
        candidates: &[TransientCandidate<'_>],
    ) -> Option<(InputSourceId, Mat4)> {
        candidates
            .iter()
            .find(|c| profile.is_empty() || c.profiles.iter().any(|p| p == profile))
            .map(|c| (c.source, c.target_ray))
    }
}

/// Touch point from the first two axes, placed in front of the viewer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TouchScreenRay;

impl TransientRayStrategy for TouchScreenRay {
    fn ray_base(
        &self,
        profile: &str,
        headset: Mat4,
        candidates: &[TransientCandidate<'_>],
    ) -> Option<(InputSourceId, Mat4)> {
        if !profile.contains("touch") {
            return None;
        }
        let touch = candidates
            .iter()
            .find(|c| c.profiles.iter().any(|p| p == profile))?;
        let offset = Mat4::from_translation(Vec3::new(touch.axes[0], -touch.axes[1], 0.0));
        Some((touch.source, headset * offset))
    }
}

#[derive(Debug, Default)]
pub struct HitTestSources {
    sources: Vec<HitTestSource>,
    next_id: u32,
}

impl HitTestSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, session: SessionId, kind: HitTestKind, offset_ray: Ray) -> HitTestSourceId {
        self.next_id += 1;
        let id = HitTestSourceId(self.next_id);
        debug!(source = id.0, ?kind, "hit test source registered");
        self.sources.push(HitTestSource {
            id,
            session,
            kind,
            offset_ray,
            active: true,
            results: Vec::new(),
            transient_results: Vec::new(),
        });
        id
    }

    /// Mark a source inactive; it is pruned on the next frame.
    pub fn cancel(&mut self, id: HitTestSourceId) -> XrResult<()> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.id == id && s.active)
            .ok_or_else(|| XrError::invalid_state("hit test source already cancelled"))?;
        source.active = false;
        Ok(())
    }

    pub fn deactivate_session(&mut self, session: SessionId) {
        for source in self.sources.iter_mut().filter(|s| s.session == session) {
            source.active = false;
        }
    }

    /// Drop inactive sources, preserving the order of the rest.
    pub fn prune(&mut self) {
        self.sources.retain(|s| s.active);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, id: HitTestSourceId) -> Option<&HitTestSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    fn live(&self, id: HitTestSourceId) -> XrResult<&HitTestSource> {
        self.get(id)
            .filter(|s| s.active)
            .ok_or_else(|| XrError::invalid_state("hit test source is not active"))
    }

    pub fn results(&self, id: HitTestSourceId) -> XrResult<&[Mat4]> {
        let source = self.live(id)?;
        match source.kind {
            HitTestKind::Fixed { .. } => Ok(&source.results),
            HitTestKind::Transient { .. } => {
                Err(XrError::invalid_state("transient source has per-input results"))
            }
        }
    }

    pub fn transient_results(&self, id: HitTestSourceId) -> XrResult<&[TransientHitTestResult]> {
        let source = self.live(id)?;
        match source.kind {
            HitTestKind::Transient { .. } => Ok(&source.transient_results),
            HitTestKind::Fixed { .. } => Err(XrError::invalid_state("fixed source has no input results")),
        }
    }

    /// Recompute results of every source belonging to `session`.
    ///
    /// `resolve` maps a space to its tracking-base matrix for this frame.
    pub fn update(
        &mut self,
        session: SessionId,
        world: &World,
        headset: Mat4,
        candidates: &[TransientCandidate<'_>],
        strategy: &dyn TransientRayStrategy,
        resolve: impl Fn(SpaceId) -> Option<Mat4>,
    ) {
        for source in self.sources.iter_mut().filter(|s| s.session == session && s.active) {
            match &source.kind {
                HitTestKind::Fixed { space } => {
                    source.results = match resolve(*space) {
                        Some(base) => cast(world, &base, &source.offset_ray),
                        None => Vec::new(),
                    };
                }
                HitTestKind::Transient { profile } => {
                    source.transient_results = strategy
                        .ray_base(profile, headset, candidates)
                        .map(|(input_source, base)| TransientHitTestResult {
                            input_source,
                            results: cast(world, &base, &source.offset_ray),
                        })
                        .into_iter()
                        .collect();
                }
            }
        }
    }
}

fn cast(world: &World, base: &Mat4, ray: &Ray) -> Vec<Mat4> {
    let (origin, direction) = transform_ray(base, ray);
    world.hit_test(origin, direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use xremu_common::RoomDimension;

    fn world() -> World {
        World::new(RoomDimension::default(), &BTreeMap::new(), 0.0)
    }

    #[test]
    fn test_prune_keeps_order() {
        let mut sources = HitTestSources::new();
        let session = SessionId(1);
        let ids: Vec<_> = (0..4)
            .map(|_| {
                sources.register(
                    session,
                    HitTestKind::Fixed { space: SpaceId::Registered(0) },
                    Ray::default(),
                )
            })
            .collect();
        sources.cancel(ids[1]).unwrap();
        assert!(sources.cancel(ids[1]).is_err());
        sources.prune();
        let remaining: Vec<_> = sources.sources.iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn test_fixed_source_hits_front_wall() {
        let mut sources = HitTestSources::new();
        let session = SessionId(1);
        let id = sources.register(
            session,
            HitTestKind::Fixed { space: SpaceId::Registered(0) },
            Ray::default(),
        );
        let viewer = Mat4::from_translation(Vec3::new(0.0, 1.6, 0.0));
        sources.update(session, &world(), viewer, &[], &FirstInputTargetRay, |_| Some(viewer));
        let results = sources.results(id).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].w_axis.truncate() - Vec3::new(0.0, 1.6, -3.0)).length() < 1e-5);
        assert!(sources.transient_results(id).is_err());
    }

    #[test]
    fn test_transient_uses_first_matching_input() {
        let mut sources = HitTestSources::new();
        let session = SessionId(1);
        let id = sources.register(
            session,
            HitTestKind::Transient { profile: "generic-touchscreen".to_string() },
            Ray::default(),
        );
        let profiles = vec!["generic-touchscreen".to_string()];
        let other = vec!["generic-trigger".to_string()];
        let pointing_down = Mat4::from_rotation_translation(
            glam::Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let candidates = [
            TransientCandidate {
                source: InputSourceId(1),
                profiles: &other,
                target_ray: Mat4::IDENTITY,
                axes: [0.0; 4],
            },
            TransientCandidate {
                source: InputSourceId(2),
                profiles: &profiles,
                target_ray: pointing_down,
                axes: [0.0; 4],
            },
        ];
        sources.update(session, &world(), Mat4::IDENTITY, &candidates, &FirstInputTargetRay, |_| None);
        let results = sources.transient_results(id).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].input_source, InputSourceId(2));
        assert!((results[0].results[0].w_axis.truncate() - Vec3::ZERO).length() < 1e-5);
    }

    #[test]
    fn test_touch_strategy_requires_touch_profile() {
        let profiles = vec!["generic-trigger".to_string()];
        let candidates = [TransientCandidate {
            source: InputSourceId(1),
            profiles: &profiles,
            target_ray: Mat4::IDENTITY,
            axes: [0.2, 0.1, 0.0, 0.0],
        }];
        assert!(TouchScreenRay
            .ray_base("generic-trigger", Mat4::IDENTITY, &candidates)
            .is_none());

        let touch = vec!["generic-touchscreen".to_string()];
        let candidates = [TransientCandidate {
            source: InputSourceId(1),
            profiles: &touch,
            target_ray: Mat4::IDENTITY,
            axes: [0.2, 0.1, 0.0, 0.0],
        }];
        let (_, base) = TouchScreenRay
            .ray_base("generic-touchscreen", Mat4::IDENTITY, &candidates)
            .unwrap();
        assert!((base.w_axis.truncate() - Vec3::new(0.2, -0.1, 0.0)).length() < 1e-6);
    }
}
