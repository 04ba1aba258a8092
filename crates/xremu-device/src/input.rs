//! Input-source models for controllers and hands.
//!
//! Each physical slot owns one raw gamepad (staged by control actions), a
//! controller model and, for left/right slots, a hand model. Models only
//! see the raw state when a frame pushes a snapshot into them.

use glam::Mat4;
use xremu_vr::{
    ButtonState, ControllerDefinition, DeviceDefinition, Handedness, InputMapping, InputMode,
    Pose, PoseType, TargetRayMode,
};

use crate::hand_pose::{blended_joint, HandJoint, DEFAULT_POSE};
use crate::math::pose_matrix;

pub const RAW_AXES: usize = 4;
pub const GAMEPAD_MAPPING: &str = "xr-standard";

const HAND_PROFILES: [&str; 4] = [
    "oculus-hand",
    "generic-hand",
    "generic-hand-select",
    "generic-trigger",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputSourceId(pub(crate) u32);

impl InputSourceId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Raw synthetic gamepad state staged by control actions.
#[derive(Debug, Clone, PartialEq)]
pub struct GamepadSnapshot {
    pub pose: Option<Pose>,
    pub has_position: bool,
    pub buttons: Vec<ButtonState>,
    pub axes: [f32; RAW_AXES],
}

impl GamepadSnapshot {
    fn for_controller(def: &ControllerDefinition) -> Self {
        Self {
            pose: (def.has_position || def.has_rotation).then(Pose::default),
            has_position: def.has_position,
            buttons: vec![ButtonState::released(); def.button_num],
            axes: [0.0; RAW_AXES],
        }
    }

    fn pressed(&self, index: Option<usize>) -> Option<bool> {
        index.map(|i| self.buttons.get(i).map(|b| b.pressed).unwrap_or(false))
    }
}

/// Staged per-hand state.
#[derive(Debug, Clone, PartialEq)]
pub struct HandState {
    pub pose: String,
    pub pinch: f32,
}

impl Default for HandState {
    fn default() -> Self {
        Self {
            pose: DEFAULT_POSE.to_string(),
            pinch: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Select,
    Squeeze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEdge {
    pub source: InputSourceId,
    pub action: InputAction,
    pub edge: Edge,
}

/// Select latch whose committed value moves only at frame end.
///
/// Detection compares against the value decided earlier in the same frame,
/// so running it twice without a new raw value never re-fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeferredLatch {
    latched: bool,
    pending: Option<bool>,
}

impl DeferredLatch {
    pub fn detect(&mut self, value: bool) -> Option<Edge> {
        let edge = (value != self.is_pressed()).then_some(if value { Edge::Start } else { Edge::End });
        self.pending = Some(value);
        edge
    }

    pub fn commit(&mut self) {
        if let Some(value) = self.pending.take() {
            self.latched = value;
        }
    }

    /// Committed value, as of the last frame end.
    pub fn latched(&self) -> bool {
        self.latched
    }

    pub fn is_pressed(&self) -> bool {
        self.pending.unwrap_or(self.latched)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Exposed gamepad, after input remapping.
#[derive(Debug, Clone, PartialEq)]
pub struct GamepadView {
    pub connected: bool,
    pub mapping: &'static str,
    pub buttons: Vec<ButtonState>,
    pub axes: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Controller,
    Hand,
}

/// Input source as exposed to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSourceInfo {
    pub id: InputSourceId,
    pub kind: SourceKind,
    pub handedness: Handedness,
    pub target_ray_mode: TargetRayMode,
    pub emulated_position: bool,
    pub profiles: Vec<String>,
    pub gamepad: GamepadView,
}

#[derive(Debug, Clone)]
pub struct ControllerInput {
    id: InputSourceId,
    definition: ControllerDefinition,
    profiles: Vec<String>,
    mapping: Option<InputMapping>,
    snapshot: GamepadSnapshot,
    select: DeferredLatch,
    squeeze: bool,
    pub active: bool,
    pub connected: bool,
}

impl ControllerInput {
    fn new(id: InputSourceId, definition: &ControllerDefinition, device: &DeviceDefinition) -> Self {
        let fallback = if definition.has_squeeze_button {
            "generic-trigger-squeeze-thumbstick"
        } else {
            "generic-trigger"
        };
        Self {
            id,
            definition: definition.clone(),
            profiles: vec![device.profile.clone(), fallback.to_string()],
            mapping: device.polyfill_input_mapping.clone(),
            snapshot: GamepadSnapshot::for_controller(definition),
            select: DeferredLatch::default(),
            squeeze: false,
            active: true,
            connected: false,
        }
    }

    pub fn id(&self) -> InputSourceId {
        self.id
    }

    pub fn handedness(&self) -> Handedness {
        self.definition.handedness
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    pub fn snapshot(&self) -> &GamepadSnapshot {
        &self.snapshot
    }

    pub fn update_from_gamepad(&mut self, raw: &GamepadSnapshot) {
        self.snapshot = raw.clone();
    }

    pub fn target_ray_mode(&self) -> TargetRayMode {
        if self.snapshot.pose.is_some() {
            TargetRayMode::TrackedPointer
        } else {
            TargetRayMode::Gaze
        }
    }

    pub fn emulated_position(&self) -> bool {
        self.snapshot.pose.is_some() && !self.snapshot.has_position
    }

    fn detect_edges(&mut self, out: &mut Vec<InputEdge>) {
        if let Some(pressed) = self.snapshot.pressed(self.definition.primary_button()) {
            if let Some(edge) = self.select.detect(pressed) {
                out.push(InputEdge {
                    source: self.id,
                    action: InputAction::Select,
                    edge,
                });
            }
        }
        if let Some(pressed) = self.snapshot.pressed(self.definition.primary_squeeze_button()) {
            if pressed != self.squeeze {
                out.push(InputEdge {
                    source: self.id,
                    action: InputAction::Squeeze,
                    edge: if pressed { Edge::Start } else { Edge::End },
                });
            }
            self.squeeze = pressed;
        }
    }

    pub fn gamepad(&self) -> GamepadView {
        let raw = &self.snapshot;
        let (buttons, axes) = match &self.mapping {
            Some(mapping) => (
                mapping
                    .buttons
                    .iter()
                    .map(|slot| slot.and_then(|i| raw.buttons.get(i).copied()).unwrap_or_default())
                    .collect(),
                mapping
                    .axes
                    .iter()
                    .map(|slot| slot.and_then(|i| raw.axes.get(i).copied()).unwrap_or(0.0))
                    .collect(),
            ),
            None => (raw.buttons.clone(), raw.axes.to_vec()),
        };
        GamepadView {
            connected: self.connected,
            mapping: GAMEPAD_MAPPING,
            buttons,
            axes,
        }
    }

    /// Tracking-base matrix for `pose_type`; gaze rays follow the headset.
    pub fn base_matrix(&self, pose_type: PoseType, headset: Mat4) -> Option<Mat4> {
        match (pose_type, &self.snapshot.pose) {
            (_, Some(pose)) => Some(pose_matrix(pose)),
            (PoseType::TargetRay, None) => Some(headset),
            (PoseType::Grip, None) => None,
        }
    }

    fn info(&self) -> InputSourceInfo {
        InputSourceInfo {
            id: self.id,
            kind: SourceKind::Controller,
            handedness: self.handedness(),
            target_ray_mode: self.target_ray_mode(),
            emulated_position: self.emulated_position(),
            profiles: self.profiles.clone(),
            gamepad: self.gamepad(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandInput {
    id: InputSourceId,
    handedness: Handedness,
    pose: Option<Pose>,
    has_position: bool,
    state: HandState,
    select: DeferredLatch,
    pub active: bool,
    pub connected: bool,
}

impl HandInput {
    fn new(id: InputSourceId, handedness: Handedness) -> Self {
        Self {
            id,
            handedness,
            pose: None,
            has_position: true,
            state: HandState::default(),
            select: DeferredLatch::default(),
            active: false,
            connected: false,
        }
    }

    pub fn id(&self) -> InputSourceId {
        self.id
    }

    pub fn handedness(&self) -> Handedness {
        self.handedness
    }

    pub fn state(&self) -> &HandState {
        &self.state
    }

    /// Hands share the slot's raw pose.
    pub fn update_from_gamepad(&mut self, raw: &GamepadSnapshot, state: &HandState) {
        self.pose = raw.pose;
        self.has_position = raw.has_position;
        self.state = state.clone();
    }

    pub fn target_ray_mode(&self) -> TargetRayMode {
        if self.pose.is_some() {
            TargetRayMode::TrackedPointer
        } else {
            TargetRayMode::Gaze
        }
    }

    fn detect_edges(&mut self, out: &mut Vec<InputEdge>) {
        if let Some(edge) = self.select.detect(self.state.pinch >= 1.0) {
            out.push(InputEdge {
                source: self.id,
                action: InputAction::Select,
                edge,
            });
        }
    }

    pub fn gamepad(&self) -> GamepadView {
        let pinch = self.state.pinch;
        GamepadView {
            connected: self.connected,
            mapping: GAMEPAD_MAPPING,
            buttons: vec![ButtonState {
                pressed: pinch >= 1.0,
                touched: pinch > 0.0,
                value: pinch,
            }],
            axes: Vec::new(),
        }
    }

    pub fn base_matrix(&self, pose_type: PoseType, headset: Mat4) -> Option<Mat4> {
        match (pose_type, &self.pose) {
            (_, Some(pose)) => Some(pose_matrix(pose)),
            (PoseType::TargetRay, None) => Some(headset),
            (PoseType::Grip, None) => None,
        }
    }

    /// Joint transform in grip space, blended toward pinch.
    pub fn joint_local(&self, joint: HandJoint) -> Option<(Mat4, f32)> {
        let pose = blended_joint(&self.state.pose, joint, self.handedness, self.state.pinch)?;
        Some((pose.transform, pose.radius))
    }

    pub fn joint_matrix(&self, joint: HandJoint, headset: Mat4) -> Option<Mat4> {
        let grip = self.base_matrix(PoseType::Grip, headset)?;
        let (local, _) = self.joint_local(joint)?;
        Some(grip * local)
    }

    fn info(&self) -> InputSourceInfo {
        InputSourceInfo {
            id: self.id,
            kind: SourceKind::Hand,
            handedness: self.handedness,
            target_ray_mode: self.target_ray_mode(),
            emulated_position: self.pose.is_some() && !self.has_position,
            profiles: HAND_PROFILES.iter().map(|p| p.to_string()).collect(),
            gamepad: self.gamepad(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputSlot {
    pub raw: GamepadSnapshot,
    pub controller: ControllerInput,
    pub hand: Option<HandInput>,
}

/// Borrowed view of one model.
#[derive(Debug, Clone, Copy)]
pub enum SourceRef<'a> {
    Controller(&'a ControllerInput),
    Hand(&'a HandInput),
}

impl SourceRef<'_> {
    pub fn info(&self) -> InputSourceInfo {
        match self {
            Self::Controller(c) => c.info(),
            Self::Hand(h) => h.info(),
        }
    }

    pub fn base_matrix(&self, pose_type: PoseType, headset: Mat4) -> Option<Mat4> {
        match self {
            Self::Controller(c) => c.base_matrix(pose_type, headset),
            Self::Hand(h) => h.base_matrix(pose_type, headset),
        }
    }

    pub fn emulated_position(&self) -> bool {
        self.info().emulated_position
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputSlots {
    slots: Vec<InputSlot>,
    next_id: u32,
}

impl InputSlots {
    pub fn new(device: &DeviceDefinition) -> Self {
        let mut slots = Self::default();
        slots.rebuild(device);
        slots
    }

    fn allocate(&mut self) -> InputSourceId {
        self.next_id += 1;
        InputSourceId(self.next_id)
    }

    /// Replace every model with fresh ones (new ids) for `device`.
    ///
    /// Raw poses carry over by handedness so controllers do not jump to the
    /// origin.
    pub fn rebuild(&mut self, device: &DeviceDefinition) {
        let previous: Vec<(Handedness, Option<Pose>)> = self
            .slots
            .iter()
            .map(|s| (s.controller.handedness(), s.raw.pose))
            .collect();
        let mut slots = Vec::with_capacity(device.controllers.len());
        for def in &device.controllers {
            let mut raw = GamepadSnapshot::for_controller(def);
            if raw.pose.is_some() {
                if let Some((_, Some(pose))) = previous.iter().find(|(h, _)| *h == def.handedness) {
                    raw.pose = Some(*pose);
                }
            }
            let controller = ControllerInput::new(self.allocate(), def, device);
            let hand = match def.handedness {
                Handedness::Left | Handedness::Right => {
                    Some(HandInput::new(self.allocate(), def.handedness))
                }
                Handedness::None => None,
            };
            slots.push(InputSlot {
                raw,
                controller,
                hand,
            });
        }
        self.slots = slots;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[InputSlot] {
        &self.slots
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut InputSlot> {
        self.slots.get_mut(index)
    }

    /// Slot addressed by a devtool object name.
    ///
    /// `right-controller` / `left-controller` pick the slot with that
    /// handedness, falling back to slot 0 / 1.
    pub fn slot_for_object(&self, object_name: &str) -> Option<usize> {
        let (handedness, fallback) = match object_name {
            "right-controller" => (Handedness::Right, 0),
            "left-controller" => (Handedness::Left, 1),
            _ => return None,
        };
        self.slot_for_handedness(handedness)
            .or_else(|| (fallback < self.slots.len()).then_some(fallback))
    }

    pub fn slot_for_handedness(&self, handedness: Handedness) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.controller.handedness() == handedness)
    }

    /// Release primary and squeeze raw buttons on every slot.
    pub fn release_action_buttons(&mut self) {
        for slot in &mut self.slots {
            let def = &slot.controller.definition;
            for index in [def.primary_button(), def.primary_squeeze_button()]
                .into_iter()
                .flatten()
            {
                if let Some(button) = slot.raw.buttons.get_mut(index) {
                    button.pressed = false;
                }
            }
        }
    }

    /// Push the staged raw state into the models.
    pub fn push_snapshots(&mut self, left: &HandState, right: &HandState) {
        for slot in &mut self.slots {
            slot.controller.update_from_gamepad(&slot.raw);
            if let Some(hand) = &mut slot.hand {
                let state = if hand.handedness == Handedness::Left { left } else { right };
                hand.update_from_gamepad(&slot.raw, state);
            }
        }
    }

    /// Controllers and hands are exclusive views of a slot; slots without a
    /// hand always expose their controller.
    pub fn apply_input_mode(&mut self, mode: InputMode) {
        for slot in &mut self.slots {
            let hands = mode == InputMode::Hands && slot.hand.is_some();
            slot.controller.active = !hands;
            if let Some(hand) = &mut slot.hand {
                hand.active = hands;
            }
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        for slot in &mut self.slots {
            slot.controller.connected = connected;
            if let Some(hand) = &mut slot.hand {
                hand.connected = connected;
            }
        }
    }

    /// Detect edges for the given sources only.
    pub fn detect_edges(&mut self, sources: &[InputSourceId]) -> Vec<InputEdge> {
        let mut edges = Vec::new();
        for slot in &mut self.slots {
            if sources.contains(&slot.controller.id) {
                slot.controller.detect_edges(&mut edges);
            }
            if let Some(hand) = &mut slot.hand {
                if sources.contains(&hand.id) {
                    hand.detect_edges(&mut edges);
                }
            }
        }
        edges
    }

    pub fn commit(&mut self) {
        for slot in &mut self.slots {
            slot.controller.select.commit();
            if let Some(hand) = &mut slot.hand {
                hand.select.commit();
            }
        }
    }

    /// Actions the page currently sees as pressed for `source`.
    pub fn pressed_actions(&self, source: InputSourceId) -> Vec<InputAction> {
        let mut actions = Vec::new();
        for slot in &self.slots {
            if slot.controller.id == source {
                if slot.controller.select.is_pressed() {
                    actions.push(InputAction::Select);
                }
                if slot.controller.squeeze {
                    actions.push(InputAction::Squeeze);
                }
            }
            if let Some(hand) = &slot.hand {
                if hand.id == source && hand.select.is_pressed() {
                    actions.push(InputAction::Select);
                }
            }
        }
        actions
    }

    pub fn reset_latches(&mut self, source: InputSourceId) {
        for slot in &mut self.slots {
            if slot.controller.id == source {
                slot.controller.select.reset();
                slot.controller.squeeze = false;
            }
            if let Some(hand) = &mut slot.hand {
                if hand.id == source {
                    hand.select.reset();
                }
            }
        }
    }

    pub fn find(&self, source: InputSourceId) -> Option<SourceRef<'_>> {
        self.slots.iter().find_map(|slot| {
            if slot.controller.id == source {
                return Some(SourceRef::Controller(&slot.controller));
            }
            match &slot.hand {
                Some(hand) if hand.id == source => Some(SourceRef::Hand(hand)),
                _ => None,
            }
        })
    }

    pub fn hand(&self, source: InputSourceId) -> Option<&HandInput> {
        match self.find(source)? {
            SourceRef::Hand(hand) => Some(hand),
            SourceRef::Controller(_) => None,
        }
    }

    pub fn controllers(&self) -> impl Iterator<Item = &ControllerInput> + '_ {
        self.slots.iter().map(|s| &s.controller)
    }

    pub fn hands(&self) -> impl Iterator<Item = &HandInput> + '_ {
        self.slots.iter().filter_map(|s| s.hand.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xremu_vr::{default_device, device_by_key};

    #[test]
    fn test_latch_fires_once_per_transition() {
        let mut latch = DeferredLatch::default();
        let mut starts = 0;
        let mut ends = 0;
        for pressed in [false, true, true, false] {
            for _ in 0..2 {
                match latch.detect(pressed) {
                    Some(Edge::Start) => starts += 1,
                    Some(Edge::End) => ends += 1,
                    None => {}
                }
            }
            latch.commit();
            assert_eq!(latch.latched(), pressed);
        }
        assert_eq!((starts, ends), (1, 1));
    }

    #[test]
    fn test_latch_commits_only_at_frame_end() {
        let mut latch = DeferredLatch::default();
        assert_eq!(latch.detect(true), Some(Edge::Start));
        assert!(!latch.latched());
        assert!(latch.is_pressed());
        latch.commit();
        assert!(latch.latched());
    }

    #[test]
    fn test_controller_profiles_and_mapping() {
        let device = default_device();
        let mut slots = InputSlots::new(&device);
        let right = slots.slot_for_object("right-controller").unwrap();
        let slot = slots.slot_mut(right).unwrap();
        slot.raw.buttons[0].pressed = true;
        slot.raw.buttons[0].value = 1.0;
        slot.raw.axes = [0.1, 0.2, 0.3, 0.4];
        slots.push_snapshots(&HandState::default(), &HandState::default());

        let info = SourceRef::Controller(&slots.slots()[right].controller).info();
        assert_eq!(info.handedness, Handedness::Right);
        assert_eq!(info.profiles[0], "meta-quest-touch-plus");
        assert_eq!(info.profiles[1], "generic-trigger-squeeze-thumbstick");
        assert_eq!(info.target_ray_mode, TargetRayMode::TrackedPointer);
        assert!(!info.emulated_position);

        // buttons [1, 2, null, 0, 3, 4, null]
        assert_eq!(info.gamepad.buttons.len(), 7);
        assert!(info.gamepad.buttons[3].pressed);
        assert!(!info.gamepad.buttons[0].pressed);
        assert_eq!(info.gamepad.buttons[2], ButtonState::default());
        // axes [2, 3, 0, 1]
        assert_eq!(info.gamepad.axes, vec![0.3, 0.4, 0.1, 0.2]);
    }

    #[test]
    fn test_untracked_controller_uses_gaze() {
        let phone = device_by_key("Handheld AR Phone").unwrap();
        let mut slots = InputSlots::new(&phone);
        slots.push_snapshots(&HandState::default(), &HandState::default());
        let controller = &slots.slots()[0].controller;
        assert_eq!(controller.target_ray_mode(), TargetRayMode::Gaze);
        let headset = Mat4::from_translation(glam::Vec3::Y);
        assert_eq!(controller.base_matrix(PoseType::TargetRay, headset), Some(headset));
        assert_eq!(controller.base_matrix(PoseType::Grip, headset), None);
        assert!(slots.slots()[0].hand.is_none());
        assert_eq!(controller.profiles()[1], "generic-trigger");
    }

    #[test]
    fn test_object_names_resolve_by_handedness() {
        let device = default_device();
        let slots = InputSlots::new(&device);
        let left = slots.slot_for_object("left-controller").unwrap();
        assert_eq!(slots.slots()[left].controller.handedness(), Handedness::Left);
        assert_eq!(slots.slot_for_object("headset"), None);

        let phone = device_by_key("Handheld AR Phone").unwrap();
        let slots = InputSlots::new(&phone);
        assert_eq!(slots.slot_for_object("right-controller"), Some(0));
        assert_eq!(slots.slot_for_object("left-controller"), None);
    }

    #[test]
    fn test_hand_button_follows_pinch() {
        let device = default_device();
        let mut slots = InputSlots::new(&device);
        let pinching = HandState {
            pose: "relaxed".to_string(),
            pinch: 1.0,
        };
        slots.push_snapshots(&pinching, &HandState::default());
        let left = slots.hands().find(|h| h.handedness() == Handedness::Left).unwrap();
        let gamepad = left.gamepad();
        assert!(gamepad.buttons[0].pressed);
        assert!(gamepad.axes.is_empty());

        let id = left.id();
        let edges = slots.detect_edges(&[id]);
        assert_eq!(
            edges,
            vec![InputEdge {
                source: id,
                action: InputAction::Select,
                edge: Edge::Start
            }]
        );
    }

    #[test]
    fn test_rebuild_allocates_new_ids() {
        let device = default_device();
        let mut slots = InputSlots::new(&device);
        let before: Vec<_> = slots.controllers().map(|c| c.id()).collect();
        slots.rebuild(&device);
        let after: Vec<_> = slots.controllers().map(|c| c.id()).collect();
        assert!(before.iter().all(|id| !after.contains(id)));
    }
}
