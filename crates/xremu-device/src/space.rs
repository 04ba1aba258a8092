//! Spaces and their resolution to the tracking base.
//!
//! Every space resolves to a base matrix mapping space coordinates into the
//! tracking base. The pose of space `s` relative to space `b` is
//! `inverse(B_b) * B_s`. Registered spaces cache their base matrix for the
//! frame id it was computed under.

use std::cell::Cell;

use glam::Mat4;
use xremu_vr::{PoseType, ReferenceSpaceType, XrError, XrResult};

use crate::hand_pose::HandJoint;
use crate::input::InputSourceId;
use crate::scene::WorldObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpaceId {
    /// Reference, offset reference or fixed space held by the registry.
    Registered(u32),
    TargetRay(InputSourceId),
    Grip(InputSourceId),
    Joint(InputSourceId, HandJoint),
    /// Plane or mesh space.
    World(WorldObjectId),
}

impl SpaceId {
    pub fn input(source: InputSourceId, pose_type: PoseType) -> Self {
        match pose_type {
            PoseType::TargetRay => Self::TargetRay(source),
            PoseType::Grip => Self::Grip(source),
        }
    }
}

/// Live tracking data a space resolves against.
pub trait PoseSource {
    fn frame_id(&self) -> u64;
    fn headset_matrix(&self) -> Mat4;
    fn input_matrix(&self, source: InputSourceId, pose_type: PoseType) -> Option<Mat4>;
    fn joint_matrix(&self, source: InputSourceId, joint: HandJoint) -> Option<Mat4>;
    fn world_matrix(&self, object: WorldObjectId) -> Option<Mat4>;
}

#[derive(Debug, Clone, Copy)]
enum SpaceKind {
    Reference {
        ty: ReferenceSpaceType,
        /// Frame-of-reference transform `T` reported by the device.
        transform: Mat4,
    },
    Fixed(Mat4),
}

#[derive(Debug)]
struct SpaceEntry {
    kind: SpaceKind,
    origin_offset: Mat4,
    cache: Cell<Option<(u64, Mat4)>>,
}

impl SpaceEntry {
    fn compute(&self, source: &dyn PoseSource) -> Mat4 {
        match self.kind {
            SpaceKind::Reference {
                ty: ReferenceSpaceType::Viewer,
                ..
            } => source.headset_matrix() * self.origin_offset,
            SpaceKind::Reference { transform, .. } => transform.inverse() * self.origin_offset,
            SpaceKind::Fixed(base) => base,
        }
    }
}

#[derive(Debug, Default)]
pub struct SpaceRegistry {
    spaces: Vec<SpaceEntry>,
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: SpaceKind, origin_offset: Mat4) -> SpaceId {
        let id = self.spaces.len() as u32;
        self.spaces.push(SpaceEntry {
            kind,
            origin_offset,
            cache: Cell::new(None),
        });
        SpaceId::Registered(id)
    }

    fn entry(&self, id: SpaceId) -> Option<&SpaceEntry> {
        match id {
            SpaceId::Registered(index) => self.spaces.get(index as usize),
            _ => None,
        }
    }

    pub fn create_reference(&mut self, ty: ReferenceSpaceType, transform: Mat4) -> SpaceId {
        self.push(SpaceKind::Reference { ty, transform }, Mat4::IDENTITY)
    }

    /// New reference space whose origin is `offset` applied to `parent`'s origin.
    pub fn create_offset(&mut self, parent: SpaceId, offset: Mat4) -> XrResult<SpaceId> {
        let entry = self
            .entry(parent)
            .ok_or_else(|| XrError::invalid_state("offset parent is not a reference space"))?;
        match entry.kind {
            SpaceKind::Reference { .. } => {
                let kind = entry.kind;
                let origin_offset = entry.origin_offset * offset;
                Ok(self.push(kind, origin_offset))
            }
            SpaceKind::Fixed(_) => Err(XrError::invalid_state(
                "offset parent is not a reference space",
            )),
        }
    }

    pub fn create_fixed(&mut self, base: Mat4) -> SpaceId {
        self.push(SpaceKind::Fixed(base), Mat4::IDENTITY)
    }

    pub fn reference_type(&self, id: SpaceId) -> Option<ReferenceSpaceType> {
        match self.entry(id)?.kind {
            SpaceKind::Reference { ty, .. } => Some(ty),
            SpaceKind::Fixed(_) => None,
        }
    }

    pub fn origin_offset(&self, id: SpaceId) -> Option<Mat4> {
        self.entry(id).map(|e| e.origin_offset)
    }

    /// Base matrix of `id`, recomputed at most once per frame id.
    pub fn base_matrix(&self, id: SpaceId, source: &dyn PoseSource) -> Option<Mat4> {
        match id {
            SpaceId::Registered(_) => {
                let entry = self.entry(id)?;
                let frame = source.frame_id();
                if let Some((cached_frame, base)) = entry.cache.get() {
                    if cached_frame == frame {
                        return Some(base);
                    }
                }
                let base = entry.compute(source);
                entry.cache.set(Some((frame, base)));
                Some(base)
            }
            SpaceId::TargetRay(input) => source.input_matrix(input, PoseType::TargetRay),
            SpaceId::Grip(input) => source.input_matrix(input, PoseType::Grip),
            SpaceId::Joint(input, joint) => source.joint_matrix(input, joint),
            SpaceId::World(object) => source.world_matrix(object),
        }
    }

    /// Transform of `space` expressed in `base`.
    pub fn relative_transform(
        &self,
        space: SpaceId,
        base: SpaceId,
        source: &dyn PoseSource,
    ) -> Option<Mat4> {
        let space_base = self.base_matrix(space, source)?;
        let base_base = self.base_matrix(base, source)?;
        Some(base_base.inverse() * space_base)
    }

    /// Express a tracking-base matrix in `base`.
    pub fn express_in(&self, matrix: Mat4, base: SpaceId, source: &dyn PoseSource) -> Option<Mat4> {
        let base_base = self.base_matrix(base, source)?;
        Some(base_base.inverse() * matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::assert_mat_near;
    use glam::Vec3;
    use std::cell::Cell as StdCell;

    struct FakeTracking {
        frame: u64,
        headset: Mat4,
        calls: StdCell<u32>,
    }

    impl PoseSource for FakeTracking {
        fn frame_id(&self) -> u64 {
            self.frame
        }
        fn headset_matrix(&self) -> Mat4 {
            self.calls.set(self.calls.get() + 1);
            self.headset
        }
        fn input_matrix(&self, _: InputSourceId, pose_type: PoseType) -> Option<Mat4> {
            match pose_type {
                PoseType::TargetRay => Some(Mat4::from_translation(Vec3::new(0.2, 1.0, -0.3))),
                PoseType::Grip => None,
            }
        }
        fn joint_matrix(&self, _: InputSourceId, _: HandJoint) -> Option<Mat4> {
            None
        }
        fn world_matrix(&self, _: WorldObjectId) -> Option<Mat4> {
            None
        }
    }

    fn head_down() -> Mat4 {
        let mut t = Mat4::IDENTITY;
        t.w_axis.y = -1.6;
        t
    }

    #[test]
    fn test_local_space_sits_at_default_height() {
        let mut registry = SpaceRegistry::new();
        let local = registry.create_reference(ReferenceSpaceType::Local, head_down());
        let floor = registry.create_reference(ReferenceSpaceType::LocalFloor, Mat4::IDENTITY);
        let tracking = FakeTracking {
            frame: 1,
            headset: Mat4::from_translation(Vec3::new(0.0, 1.7, 0.0)),
            calls: StdCell::new(0),
        };
        let base = registry.base_matrix(local, &tracking).unwrap();
        assert!((base.w_axis.truncate() - Vec3::new(0.0, 1.6, 0.0)).length() < 1e-6);
        let rel = registry.relative_transform(local, floor, &tracking).unwrap();
        assert!((rel.w_axis.y - 1.6).abs() < 1e-6);
    }

    #[test]
    fn test_viewer_cache_is_per_frame() {
        let mut registry = SpaceRegistry::new();
        let viewer = registry.create_reference(ReferenceSpaceType::Viewer, head_down());
        let mut tracking = FakeTracking {
            frame: 7,
            headset: Mat4::from_translation(Vec3::new(0.0, 1.7, 0.0)),
            calls: StdCell::new(0),
        };
        registry.base_matrix(viewer, &tracking).unwrap();
        registry.base_matrix(viewer, &tracking).unwrap();
        assert_eq!(tracking.calls.get(), 1);

        tracking.headset = Mat4::from_translation(Vec3::new(1.0, 1.7, 0.0));
        let stale = registry.base_matrix(viewer, &tracking).unwrap();
        assert_eq!(stale.w_axis.x, 0.0);

        tracking.frame = 8;
        let fresh = registry.base_matrix(viewer, &tracking).unwrap();
        assert_eq!(fresh.w_axis.x, 1.0);
        assert_eq!(tracking.calls.get(), 2);
    }

    #[test]
    fn test_offset_space_composes_origin_offset() {
        let mut registry = SpaceRegistry::new();
        let floor = registry.create_reference(ReferenceSpaceType::LocalFloor, Mat4::IDENTITY);
        let step = Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0));
        let once = registry.create_offset(floor, step).unwrap();
        let twice = registry.create_offset(once, step).unwrap();
        assert_eq!(registry.reference_type(twice), Some(ReferenceSpaceType::LocalFloor));

        let tracking = FakeTracking {
            frame: 1,
            headset: Mat4::IDENTITY,
            calls: StdCell::new(0),
        };
        let rel = registry.relative_transform(twice, floor, &tracking).unwrap();
        assert_mat_near(&rel, &Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)), 1e-6);

        let fixed = registry.create_fixed(Mat4::IDENTITY);
        assert!(registry.create_offset(fixed, step).is_err());
    }

    #[test]
    fn test_grip_without_pose_is_none() {
        let mut registry = SpaceRegistry::new();
        let floor = registry.create_reference(ReferenceSpaceType::LocalFloor, Mat4::IDENTITY);
        let tracking = FakeTracking {
            frame: 1,
            headset: Mat4::IDENTITY,
            calls: StdCell::new(0),
        };
        let source = InputSourceId(3);
        assert!(registry
            .relative_transform(SpaceId::Grip(source), floor, &tracking)
            .is_none());
        assert!(registry
            .relative_transform(SpaceId::TargetRay(source), floor, &tracking)
            .is_some());
    }
}
