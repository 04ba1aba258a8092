//! The emulated device facade.
//!
//! `EmulatedDevice` is the only type the WebXR API surface talks to. Control
//! actions (see [`control`]) stage values; everything derived from them is
//! recomputed inside [`EmulatedDevice::on_animation_frame`] and
//! [`EmulatedDevice::on_frame_start`].

mod control;

use std::collections::{BTreeMap, BTreeSet};
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::Mat4;
use tracing::{debug, info, warn};
use xremu_common::{KeyValueStore, RoomDimension};
use xremu_vr::{
    BaseLayer, ClearMask, ClearValues, DeviceCallbacks, DeviceDefinition, Eye, FrameCallback,
    FrameScheduler, InputMode, Pose, PoseType, Ray, ReferenceSpaceType, Resolution, SessionMode,
    Viewport, XrError, XrResult,
};

use crate::anchors::{AnchorId, AnchorStore};
use crate::hand_pose::HandJoint;
use crate::hit_test::{
    FirstInputTargetRay, HitTestKind, HitTestSourceId, HitTestSources, TransientCandidate,
    TransientRayStrategy,
};
use crate::input::{HandState, InputSlots, InputSourceId, InputSourceInfo};
use crate::math::{pose_matrix, translate_on_x};
use crate::scene::{MeshObject, Plane, World, WorldObjectId};
use crate::session::{
    is_feature_supported, negotiate_features, RenderState, Session, SessionId, SessionInit,
    SessionState, XrEvent, FEATURE_ANCHORS, FEATURE_DOM_OVERLAY, FEATURE_HAND_TRACKING,
    FEATURE_HIT_TEST, FEATURE_MESH_DETECTION, FEATURE_PLANE_DETECTION,
};
use crate::space::{PoseSource, SpaceId, SpaceRegistry};

/// Standing eye height the `local` and `viewer` spaces are offset by.
pub const DEFAULT_HEADSET_HEIGHT: f32 = 1.6;
/// Half the interpupillary distance.
pub const EYE_OFFSET: f32 = 0.02;
/// Frame ticks between a device swap and the input rebuild.
pub const DEVICE_SWAP_TICKS: u64 = 2;

/// Host services the device runs against.
pub struct DeviceHost {
    pub scheduler: Box<dyn FrameScheduler>,
    pub callbacks: Arc<dyn DeviceCallbacks>,
    pub store: Box<dyn KeyValueStore>,
    /// Page origin persistent anchors are scoped to.
    pub origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrPose {
    pub transform: Mat4,
    pub emulated_position: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrView {
    pub eye: Eye,
    pub projection: Mat4,
    /// Eye pose in the requested base space.
    pub transform: Mat4,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerPose {
    pub transform: Mat4,
    pub emulated_position: bool,
    pub views: Vec<XrView>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrJointPose {
    pub transform: Mat4,
    pub radius: f32,
}

/// Hit-test result in a requested base space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitTestResult {
    pub transform: Mat4,
    base_matrix: Mat4,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransientHitTest {
    pub input_source: InputSourceId,
    pub results: Vec<HitTestResult>,
}

#[derive(Debug)]
struct PendingSwap {
    definition: DeviceDefinition,
    ready_at: u64,
}

/// Tracking state of the current frame.
struct Tracking<'a> {
    frame_id: u64,
    headset: Mat4,
    slots: &'a InputSlots,
    world: &'a World,
}

impl PoseSource for Tracking<'_> {
    fn frame_id(&self) -> u64 {
        self.frame_id
    }

    fn headset_matrix(&self) -> Mat4 {
        self.headset
    }

    fn input_matrix(&self, source: InputSourceId, pose_type: PoseType) -> Option<Mat4> {
        self.slots.find(source)?.base_matrix(pose_type, self.headset)
    }

    fn joint_matrix(&self, source: InputSourceId, joint: HandJoint) -> Option<Mat4> {
        self.slots.hand(source)?.joint_matrix(joint, self.headset)
    }

    fn world_matrix(&self, object: WorldObjectId) -> Option<Mat4> {
        self.world.object_matrix(object)
    }
}

/// Sources a session currently exposes.
///
/// Hands are hidden unless the session enabled `hand-tracking`.
fn visible_sources(slots: &InputSlots, session: &Session) -> Vec<InputSourceId> {
    let hands = session.has_feature(FEATURE_HAND_TRACKING);
    let mut visible = Vec::new();
    for slot in slots.slots() {
        if slot.controller.active {
            visible.push(slot.controller.id());
        }
        if let Some(hand) = &slot.hand {
            if hand.active && hands {
                visible.push(hand.id());
            }
        }
    }
    visible
}

pub struct EmulatedDevice {
    definition: DeviceDefinition,
    scheduler: Box<dyn FrameScheduler>,
    callbacks: Arc<dyn DeviceCallbacks>,
    sessions: BTreeMap<SessionId, Session>,
    next_session_id: u32,
    /// The single immersive session allowed at a time.
    active_immersive: Option<SessionId>,
    frame_id: u64,
    tick: u64,
    stereo: bool,
    input_mode: InputMode,
    headset_pose: Pose,
    headset_matrix: Mat4,
    view_matrix: Mat4,
    left_view: Mat4,
    right_view: Mat4,
    projection: Mat4,
    slots: InputSlots,
    left_hand: HandState,
    right_hand: HandState,
    spaces: SpaceRegistry,
    local_space: SpaceId,
    world: World,
    hit_tests: HitTestSources,
    anchors: AnchorStore,
    transient_strategy: Box<dyn TransientRayStrategy>,
    pending_swap: Option<PendingSwap>,
    dom_overlay_root: Option<String>,
}

impl std::fmt::Debug for EmulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedDevice")
            .field("device", &self.definition.id)
            .field("sessions", &self.sessions.len())
            .field("active_immersive", &self.active_immersive)
            .field("frame_id", &self.frame_id)
            .field("tick", &self.tick)
            .finish()
    }
}

impl EmulatedDevice {
    pub fn new(definition: DeviceDefinition, host: DeviceHost) -> Self {
        let mut spaces = SpaceRegistry::new();
        let local_space = spaces.create_reference(
            ReferenceSpaceType::Local,
            frame_of_reference_transform(ReferenceSpaceType::Local),
        );
        let headset_pose = Pose {
            position: [0.0, DEFAULT_HEADSET_HEIGHT, 0.0],
            ..Pose::default()
        };
        let headset_matrix = pose_matrix(&headset_pose);
        let view_matrix = headset_matrix.inverse();
        info!(device = %definition.id, "emulated device created");
        Self {
            slots: InputSlots::new(&definition),
            definition,
            scheduler: host.scheduler,
            callbacks: host.callbacks,
            sessions: BTreeMap::new(),
            next_session_id: 0,
            active_immersive: None,
            frame_id: 0,
            tick: 0,
            stereo: false,
            input_mode: InputMode::Controllers,
            headset_pose,
            headset_matrix,
            view_matrix,
            left_view: view_matrix,
            right_view: view_matrix,
            projection: Mat4::perspective_rh_gl(FRAC_PI_2, 1.0, 0.1, 1000.0),
            left_hand: HandState::default(),
            right_hand: HandState::default(),
            spaces,
            local_space,
            world: World::new(RoomDimension::default(), &BTreeMap::new(), 0.0),
            hit_tests: HitTestSources::new(),
            anchors: AnchorStore::new(host.store, host.origin),
            transient_strategy: Box::new(FirstInputTargetRay),
            pending_swap: None,
            dom_overlay_root: None,
        }
    }

    pub fn with_transient_strategy(mut self, strategy: Box<dyn TransientRayStrategy>) -> Self {
        self.transient_strategy = strategy;
        self
    }

    /// Hand the key-value store back, e.g. to flush it.
    pub fn into_store(self) -> Box<dyn KeyValueStore> {
        self.anchors.into_store()
    }

    pub fn definition(&self) -> &DeviceDefinition {
        &self.definition
    }

    pub fn input_slots(&self) -> &InputSlots {
        &self.slots
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn stereo(&self) -> bool {
        self.stereo
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn active_immersive_session(&self) -> Option<SessionId> {
        self.active_immersive
    }

    fn tracking(&self) -> Tracking<'_> {
        Tracking {
            frame_id: self.frame_id,
            headset: self.headset_matrix,
            slots: &self.slots,
            world: &self.world,
        }
    }

    fn session(&self, id: SessionId) -> XrResult<&Session> {
        self.sessions
            .get(&id)
            .ok_or_else(|| XrError::invalid_state("unknown session"))
    }

    fn live_session(&self, id: SessionId) -> XrResult<&Session> {
        let session = self.session(id)?;
        if session.is_ended() {
            return Err(XrError::invalid_state("session has ended"));
        }
        Ok(session)
    }

    fn live_session_mut(&mut self, id: SessionId) -> XrResult<&mut Session> {
        match self.sessions.get_mut(&id) {
            Some(session) if !session.is_ended() => Ok(session),
            Some(_) => Err(XrError::invalid_state("session has ended")),
            None => Err(XrError::invalid_state("unknown session")),
        }
    }

    fn require_feature(&self, id: SessionId, feature: &str) -> XrResult<()> {
        let session = self.live_session(id)?;
        if !session.has_feature(feature) {
            return Err(XrError::not_supported(format!("{feature} is not enabled")));
        }
        Ok(())
    }

    // Capabilities

    pub fn is_session_supported(&self, mode: SessionMode) -> bool {
        self.definition.supports_mode(mode)
    }

    pub fn is_feature_supported(&self, name: &str) -> bool {
        is_feature_supported(&self.definition, name)
    }

    pub fn does_session_support_reference_space(&self, id: SessionId, ty: ReferenceSpaceType) -> bool {
        self.session(id)
            .map(|s| s.has_feature(ty.feature_name()))
            .unwrap_or(false)
    }

    pub fn enabled_features(&self, id: SessionId) -> XrResult<BTreeSet<String>> {
        self.session(id).map(|s| s.enabled_features.clone())
    }

    pub fn session_state(&self, id: SessionId) -> XrResult<SessionState> {
        self.session(id).map(|s| s.state)
    }

    // Session lifecycle

    pub fn request_session(&mut self, mode: SessionMode, init: &SessionInit) -> XrResult<SessionId> {
        if !self.definition.supports_mode(mode) {
            return Err(XrError::not_supported(format!(
                "{} does not support {}",
                self.definition.id,
                mode.as_str()
            )));
        }
        if mode.is_immersive() && self.active_immersive.is_some() {
            return Err(XrError::invalid_state("an immersive session is already active"));
        }
        let features = negotiate_features(&self.definition, mode, init)?;
        self.next_session_id += 1;
        let id = SessionId(self.next_session_id);
        let monoscopic = mode == SessionMode::ImmersiveAr && self.definition.is_handheld();
        let session = Session::new(id, mode, features, monoscopic);

        if mode.is_immersive() {
            self.active_immersive = Some(id);
            self.slots.set_connected(true);
            self.callbacks.on_present_start(id.raw(), mode);
            if session.has_feature(FEATURE_DOM_OVERLAY) {
                if let Some(root) = &init.dom_overlay_root {
                    self.dom_overlay_root = Some(root.clone());
                }
            }
            if session.has_feature(FEATURE_ANCHORS) {
                let spaces = &mut self.spaces;
                self.anchors
                    .restore_persistent_anchors(id, |base| spaces.create_fixed(base));
            }
        }
        info!(
            session = id.raw(),
            mode = mode.as_str(),
            features = ?session.enabled_features,
            "session requested"
        );
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Bind the session's render target, moving it to the active state.
    pub fn on_base_layer_set(&mut self, id: SessionId, layer: Box<dyn BaseLayer>) -> XrResult<()> {
        let session = self.live_session_mut(id)?;
        session.base_layer = Some(layer);
        if session.state == SessionState::Requested {
            session.state = SessionState::Active;
            debug!(session = id.raw(), "session active");
        }
        Ok(())
    }

    pub fn end_session(&mut self, id: SessionId) -> XrResult<()> {
        let session = self.live_session_mut(id)?;
        let presented = session.is_immersive() && session.base_layer.is_some();
        session.state = SessionState::Ended;
        session.push_event(XrEvent::End);
        if presented {
            self.callbacks.on_present_end(id.raw());
            self.dom_overlay_root = None;
        }
        if self.active_immersive == Some(id) {
            self.active_immersive = None;
            self.slots.set_connected(false);
        }
        self.hit_tests.deactivate_session(id);
        self.anchors.end_session(id);
        info!(session = id.raw(), "session ended");
        Ok(())
    }

    /// Drain the events queued for a session's page.
    pub fn take_events(&mut self, id: SessionId) -> Vec<XrEvent> {
        self.sessions
            .get_mut(&id)
            .map(Session::take_events)
            .unwrap_or_default()
    }

    pub fn update_target_frame_rate(&mut self, id: SessionId, rate: f32) -> XrResult<()> {
        self.live_session_mut(id)?.target_frame_rate = Some(rate);
        Ok(())
    }

    pub fn set_dom_overlay_root(&mut self, root: Option<String>) {
        self.dom_overlay_root = root;
    }

    pub fn dom_overlay_root(&self) -> Option<&str> {
        self.dom_overlay_root.as_deref()
    }

    // Frame loop

    pub fn request_animation_frame(&mut self, callback: FrameCallback) -> u32 {
        self.scheduler.request_animation_frame(callback)
    }

    pub fn cancel_animation_frame(&mut self, handle: u32) {
        self.scheduler.cancel_animation_frame(handle);
    }

    /// One animation-frame tick: apply staged world changes and finish a
    /// pending device swap once its tick arrives.
    pub fn on_animation_frame(&mut self, now_ms: f64) {
        self.tick += 1;
        self.world.apply_staged(now_ms);
        let ready = self
            .pending_swap
            .as_ref()
            .is_some_and(|swap| self.tick >= swap.ready_at);
        if ready {
            if let Some(swap) = self.pending_swap.take() {
                self.slots.rebuild(&swap.definition);
                self.slots.apply_input_mode(self.input_mode);
                self.slots.set_connected(self.active_immersive.is_some());
                info!(device = %swap.definition.id, tick = self.tick, "input sources rebuilt");
            }
        }
    }

    pub fn on_frame_start(&mut self, id: SessionId, render: &RenderState) -> XrResult<()> {
        let stereo = self.stereo;
        let handheld_size = self.definition.size;
        let session = self.live_session_mut(id)?;
        let layer = session
            .base_layer
            .as_mut()
            .ok_or_else(|| XrError::invalid_state("no base layer bound"))?;
        let immersive = session.mode.is_immersive();
        let monoscopic = session.monoscopic;

        if immersive {
            let saved = layer.clear_values();
            layer.set_clear_values(ClearValues::OPAQUE_FRAME);
            layer.clear(ClearMask::all());
            layer.set_clear_values(saved);
        }

        let (width, height) = layer.framebuffer_size();
        let aspect = |w: f32, h: f32| if h > 0.0 { w / h } else { 1.0 };
        let (fov, aspect) = if !immersive {
            session.inline_vertical_fov = render.inline_vertical_fov;
            (render.inline_vertical_fov, aspect(width as f32, height as f32))
        } else if monoscopic {
            let size = handheld_size.unwrap_or(Resolution { width, height });
            (FRAC_PI_2, aspect(size.width as f32, size.height as f32))
        } else {
            let scale = if stereo { 0.5 } else { 1.0 };
            (FRAC_PI_2, aspect(width as f32 * scale, height as f32))
        };

        self.frame_id += 1;
        self.projection = Mat4::perspective_rh_gl(fov, aspect, render.depth_near, render.depth_far);
        self.headset_matrix = pose_matrix(&self.headset_pose);
        self.view_matrix = self.headset_matrix.inverse();
        self.left_view = translate_on_x(self.headset_matrix, -EYE_OFFSET).inverse();
        self.right_view = translate_on_x(self.headset_matrix, EYE_OFFSET).inverse();

        if immersive && self.active_immersive == Some(id) {
            self.slots.push_snapshots(&self.left_hand, &self.right_hand);
            let Some(session) = self.sessions.get_mut(&id) else {
                return Ok(());
            };
            let visible = visible_sources(&self.slots, session);
            session.process_input(&mut self.slots, visible);
            self.run_hit_tests(id);
        }
        Ok(())
    }

    fn run_hit_tests(&mut self, id: SessionId) {
        self.hit_tests.prune();
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let infos: Vec<(InputSourceInfo, Option<Mat4>)> = session
            .visible_inputs
            .iter()
            .filter_map(|source| self.slots.find(*source))
            .map(|source| {
                let target_ray = source.base_matrix(PoseType::TargetRay, self.headset_matrix);
                (source.info(), target_ray)
            })
            .collect();
        let candidates: Vec<TransientCandidate<'_>> = infos
            .iter()
            .filter_map(|(info, target_ray)| {
                let mut axes = [0.0; 4];
                for (slot, value) in axes.iter_mut().zip(&info.gamepad.axes) {
                    *slot = *value;
                }
                Some(TransientCandidate {
                    source: info.id,
                    profiles: &info.profiles,
                    target_ray: (*target_ray)?,
                    axes,
                })
            })
            .collect();
        let tracking = Tracking {
            frame_id: self.frame_id,
            headset: self.headset_matrix,
            slots: &self.slots,
            world: &self.world,
        };
        let spaces = &self.spaces;
        self.hit_tests.update(
            id,
            &self.world,
            self.headset_matrix,
            &candidates,
            &*self.transient_strategy,
            |space| spaces.base_matrix(space, &tracking),
        );
    }

    /// Commit the select latches decided during this frame.
    pub fn on_frame_end(&mut self, id: SessionId) -> XrResult<()> {
        let session = self.live_session(id)?;
        if session.is_immersive() && self.active_immersive == Some(id) {
            self.slots.commit();
        }
        Ok(())
    }

    // Views

    pub fn get_viewport(&self, id: SessionId, eye: Eye) -> XrResult<Viewport> {
        let session = self.session(id)?;
        let layer = session
            .base_layer
            .as_ref()
            .ok_or_else(|| XrError::invalid_state("no base layer bound"))?;
        let (width, height) = layer.framebuffer_size();
        let full = Viewport {
            x: 0,
            y: 0,
            width,
            height,
        };
        if session.monoscopic || !session.is_immersive() || eye == Eye::None {
            return Ok(full);
        }
        let half = width / 2;
        Ok(match (eye, self.stereo) {
            (Eye::Left, true) => Viewport { width: half, ..full },
            (Eye::Right, true) => Viewport {
                x: half,
                width: width - half,
                ..full
            },
            (Eye::Right, false) => Viewport {
                x: 0,
                width: 0,
                ..full
            },
            _ => full,
        })
    }

    pub fn get_projection_matrix(&self, _eye: Eye) -> Mat4 {
        self.projection
    }

    pub fn get_base_pose_matrix(&self) -> Mat4 {
        self.headset_matrix
    }

    pub fn get_base_view_matrix(&self, eye: Eye) -> Mat4 {
        match eye {
            _ if !self.stereo => self.view_matrix,
            Eye::Left => self.left_view,
            Eye::Right => self.right_view,
            Eye::None => self.view_matrix,
        }
    }

    /// Eyes a session renders: two for head-mounted immersive sessions.
    pub fn views(&self, id: SessionId) -> XrResult<Vec<Eye>> {
        let session = self.session(id)?;
        Ok(if session.is_immersive() && !session.monoscopic {
            vec![Eye::Left, Eye::Right]
        } else {
            vec![Eye::None]
        })
    }

    // Spaces

    /// Frame-of-reference transform `T` of a reference space type.
    pub fn request_frame_of_reference_transform(&self, ty: ReferenceSpaceType) -> Mat4 {
        frame_of_reference_transform(ty)
    }

    pub fn request_reference_space(&mut self, id: SessionId, ty: ReferenceSpaceType) -> XrResult<SpaceId> {
        let session = self.live_session(id)?;
        if !session.has_feature(ty.feature_name()) {
            return Err(XrError::not_supported(format!(
                "reference space {} is not enabled",
                ty.as_str()
            )));
        }
        Ok(self.spaces.create_reference(ty, frame_of_reference_transform(ty)))
    }

    pub fn get_offset_reference_space(&mut self, space: SpaceId, offset: &Pose) -> XrResult<SpaceId> {
        self.spaces.create_offset(space, pose_matrix(offset))
    }

    /// Reset listeners are accepted and never fire.
    pub fn add_reset_listener(&mut self, _space: SpaceId) {}

    pub fn input_space(&self, source: InputSourceId, pose_type: PoseType) -> SpaceId {
        SpaceId::input(source, pose_type)
    }

    pub fn joint_space(&self, source: InputSourceId, joint: HandJoint) -> SpaceId {
        SpaceId::Joint(source, joint)
    }

    pub fn get_pose(&self, space: SpaceId, base: SpaceId) -> Option<XrPose> {
        let tracking = self.tracking();
        let transform = self.spaces.relative_transform(space, base, &tracking)?;
        let emulated_position = match space {
            SpaceId::TargetRay(source) | SpaceId::Grip(source) | SpaceId::Joint(source, _) => self
                .slots
                .find(source)
                .map(|s| s.emulated_position())
                .unwrap_or(false),
            SpaceId::Registered(_) if self.spaces.reference_type(space) == Some(ReferenceSpaceType::Viewer) => {
                !self.definition.headset.has_position
            }
            _ => false,
        };
        Some(XrPose {
            transform,
            emulated_position,
        })
    }

    pub fn get_viewer_pose(&self, id: SessionId, base: SpaceId) -> XrResult<Option<ViewerPose>> {
        let tracking = self.tracking();
        let Some(transform) = self.spaces.express_in(self.headset_matrix, base, &tracking) else {
            return Ok(None);
        };
        let mut views = Vec::new();
        for eye in self.views(id)? {
            let eye_pose = self.get_base_view_matrix(eye).inverse();
            let Some(view_transform) = self.spaces.express_in(eye_pose, base, &tracking) else {
                warn!(?eye, "view transform unavailable in base space");
                return Ok(None);
            };
            views.push(XrView {
                eye,
                projection: self.get_projection_matrix(eye),
                transform: view_transform,
                viewport: self.get_viewport(id, eye)?,
            });
        }
        Ok(Some(ViewerPose {
            transform,
            emulated_position: !self.definition.headset.has_position,
            views,
        }))
    }

    // Input

    /// Input sources the session exposes this frame.
    pub fn get_input_sources(&self, id: SessionId) -> XrResult<Vec<InputSourceInfo>> {
        let session = self.session(id)?;
        Ok(visible_sources(&self.slots, session)
            .into_iter()
            .filter_map(|source| self.slots.find(source).map(|s| s.info()))
            .collect())
    }

    pub fn get_input_pose(&self, source: InputSourceId, base: SpaceId, pose_type: PoseType) -> Option<XrPose> {
        self.get_pose(SpaceId::input(source, pose_type), base)
    }

    pub fn get_joint_pose(&self, source: InputSourceId, joint: HandJoint, base: SpaceId) -> Option<XrJointPose> {
        let hand = self.slots.hand(source)?;
        let (_, radius) = hand.joint_local(joint)?;
        let pose = self.get_pose(SpaceId::Joint(source, joint), base)?;
        Some(XrJointPose {
            transform: pose.transform,
            radius,
        })
    }

    /// Write joint radii; returns whether every joint was tracked.
    pub fn fill_joint_radii(&self, source: InputSourceId, joints: &[HandJoint], radii: &mut [f32]) -> XrResult<bool> {
        if radii.len() < joints.len() {
            return Err(XrError::Capacity {
                needed: joints.len(),
                got: radii.len(),
            });
        }
        let mut all_valid = true;
        for (joint, out) in joints.iter().zip(radii.iter_mut()) {
            match self.slots.hand(source).and_then(|h| h.joint_local(*joint)) {
                Some((_, radius)) => *out = radius,
                None => {
                    *out = f32::NAN;
                    all_valid = false;
                }
            }
        }
        Ok(all_valid)
    }

    /// Write 16 floats per space; returns whether every pose resolved.
    pub fn fill_poses(&self, spaces: &[SpaceId], base: SpaceId, transforms: &mut [f32]) -> XrResult<bool> {
        let needed = spaces.len() * 16;
        if transforms.len() < needed {
            return Err(XrError::Capacity {
                needed,
                got: transforms.len(),
            });
        }
        let mut all_valid = true;
        for (space, out) in spaces.iter().zip(transforms.chunks_exact_mut(16)) {
            match self.get_pose(*space, base) {
                Some(pose) => out.copy_from_slice(&pose.transform.to_cols_array()),
                None => {
                    out.fill(f32::NAN);
                    all_valid = false;
                }
            }
        }
        Ok(all_valid)
    }

    // Hit testing

    pub fn request_hit_test_source(
        &mut self,
        id: SessionId,
        space: SpaceId,
        offset_ray: Option<Ray>,
    ) -> XrResult<HitTestSourceId> {
        self.require_feature(id, FEATURE_HIT_TEST)?;
        Ok(self
            .hit_tests
            .register(id, HitTestKind::Fixed { space }, offset_ray.unwrap_or_default()))
    }

    pub fn request_hit_test_source_for_transient_input(
        &mut self,
        id: SessionId,
        profile: &str,
        offset_ray: Option<Ray>,
    ) -> XrResult<HitTestSourceId> {
        self.require_feature(id, FEATURE_HIT_TEST)?;
        Ok(self.hit_tests.register(
            id,
            HitTestKind::Transient {
                profile: profile.to_string(),
            },
            offset_ray.unwrap_or_default(),
        ))
    }

    pub fn cancel_hit_test_source(&mut self, source: HitTestSourceId) -> XrResult<()> {
        self.hit_tests.cancel(source)
    }

    fn express_results(&self, results: &[Mat4], base: SpaceId) -> Vec<HitTestResult> {
        let tracking = self.tracking();
        results
            .iter()
            .filter_map(|matrix| {
                let transform = self.spaces.express_in(*matrix, base, &tracking)?;
                Some(HitTestResult {
                    transform,
                    base_matrix: *matrix,
                })
            })
            .collect()
    }

    /// Latest results of a fixed source, nearest first.
    pub fn get_hit_test_results(&self, source: HitTestSourceId, base: SpaceId) -> XrResult<Vec<HitTestResult>> {
        let results = self.hit_tests.results(source)?;
        Ok(self.express_results(results, base))
    }

    pub fn get_hit_test_results_for_transient_input(
        &self,
        source: HitTestSourceId,
        base: SpaceId,
    ) -> XrResult<Vec<TransientHitTest>> {
        Ok(self
            .hit_tests
            .transient_results(source)?
            .iter()
            .map(|r| TransientHitTest {
                input_source: r.input_source,
                results: self.express_results(&r.results, base),
            })
            .collect())
    }

    /// Raw world-space ray cast, results nearest first.
    pub fn get_hit_test_results_raw(&self, origin: [f32; 3], direction: [f32; 3]) -> Vec<Mat4> {
        self.world
            .hit_test(glam::Vec3::from_array(origin), glam::Vec3::from_array(direction))
    }

    // Anchors

    pub fn create_anchor(&mut self, id: SessionId, pose: &Pose, space: SpaceId) -> XrResult<AnchorId> {
        self.require_feature(id, FEATURE_ANCHORS)?;
        let base = {
            let tracking = self.tracking();
            let local = self
                .spaces
                .base_matrix(self.local_space, &tracking)
                .ok_or_else(|| XrError::invalid_state("local space unavailable"))?;
            let relative = self
                .spaces
                .relative_transform(space, self.local_space, &tracking)
                .ok_or_else(|| XrError::invalid_state("anchor space is not tracked"))?;
            local * relative * pose_matrix(pose)
        };
        let anchor_space = self.spaces.create_fixed(base);
        Ok(self.anchors.create(id, base, anchor_space))
    }

    pub fn create_anchor_from_hit_test_result(&mut self, id: SessionId, result: &HitTestResult) -> XrResult<AnchorId> {
        self.require_feature(id, FEATURE_ANCHORS)?;
        let anchor_space = self.spaces.create_fixed(result.base_matrix);
        Ok(self.anchors.create(id, result.base_matrix, anchor_space))
    }

    pub fn delete_anchor(&mut self, anchor: AnchorId) -> XrResult<()> {
        self.anchors.delete(anchor)
    }

    pub fn anchor_space(&self, anchor: AnchorId) -> XrResult<SpaceId> {
        self.anchors.anchor_space(anchor)
    }

    pub fn request_persistent_handle(&mut self, anchor: AnchorId) -> XrResult<String> {
        let session = self.anchors.session_of(anchor)?;
        self.live_session(session)?;
        self.anchors.request_persistent_handle(anchor)
    }

    pub fn restore_persistent_anchor(&mut self, id: SessionId, uuid: &str) -> XrResult<AnchorId> {
        self.require_feature(id, FEATURE_ANCHORS)?;
        let spaces = &mut self.spaces;
        self.anchors
            .restore_persistent_anchor(id, uuid, |base| spaces.create_fixed(base))
    }

    pub fn delete_persistent_anchor(&mut self, id: SessionId, uuid: &str) -> XrResult<()> {
        self.require_feature(id, FEATURE_ANCHORS)?;
        self.anchors.delete_persistent_anchor(id, uuid)
    }

    pub fn tracked_anchors(&self, id: SessionId) -> Vec<AnchorId> {
        if self.require_feature(id, FEATURE_ANCHORS).is_err() {
            return Vec::new();
        }
        self.anchors.tracked_anchors(id)
    }

    pub fn persistent_anchors(&self, id: SessionId) -> Vec<(String, AnchorId)> {
        if self.require_feature(id, FEATURE_ANCHORS).is_err() {
            return Vec::new();
        }
        self.anchors.persistent_anchors(id)
    }

    // World

    pub fn detected_planes(&self, id: SessionId) -> Vec<&Plane> {
        if self.require_feature(id, FEATURE_PLANE_DETECTION).is_err() {
            return Vec::new();
        }
        self.world.planes().collect()
    }

    pub fn detected_meshes(&self, id: SessionId) -> Vec<&MeshObject> {
        if self.require_feature(id, FEATURE_MESH_DETECTION).is_err() {
            return Vec::new();
        }
        self.world.meshes().collect()
    }

    pub fn world_space(&self, object: WorldObjectId) -> SpaceId {
        SpaceId::World(object)
    }
}

/// `viewer` and `local` sit at standing height; every other type is the
/// tracking origin.
fn frame_of_reference_transform(ty: ReferenceSpaceType) -> Mat4 {
    match ty {
        ReferenceSpaceType::Viewer | ReferenceSpaceType::Local => {
            let mut transform = Mat4::IDENTITY;
            transform.w_axis.y = -DEFAULT_HEADSET_HEIGHT;
            transform
        }
        _ => Mat4::IDENTITY,
    }
}
