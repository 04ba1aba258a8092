//! Control actions from the devtool panel.
//!
//! Nothing here recomputes derived state. Poses, buttons and world changes
//! are staged and picked up by the next frame tick.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use xremu_common::settings::{HEADSET_OBJECT, LEFT_CONTROLLER_OBJECT, RIGHT_CONTROLLER_OBJECT};
use xremu_common::{EmulatorAction, EmulatorSettings, RoomDimension, UserObject};
use xremu_vr::{ButtonState, DeviceDefinition, Handedness, InputMode, Pose};

use super::{EmulatedDevice, PendingSwap, DEVICE_SWAP_TICKS};
use crate::hand_pose::library;
use crate::input::RAW_AXES;
use crate::math::quat_from_euler_xyz;

impl EmulatedDevice {
    /// Stage one control action.
    pub fn apply_action(&mut self, action: EmulatorAction) {
        debug!(action = action.name(), "control action");
        match action {
            EmulatorAction::HeadsetPoseChange {
                position,
                quaternion,
            } => self.stage_headset_pose(position, quaternion),
            EmulatorAction::ControllerPoseChange {
                object_name,
                position,
                quaternion,
            } => self.stage_controller_pose(&object_name, position, quaternion),
            EmulatorAction::ButtonStateChange {
                object_name,
                button_index,
                pressed,
                touched,
                value,
            } => {
                let state = ButtonState {
                    pressed,
                    touched: touched.unwrap_or(pressed),
                    value: value.unwrap_or(if pressed { 1.0 } else { 0.0 }),
                };
                self.stage_button(&object_name, button_index, state);
            }
            EmulatorAction::AnalogValueChange {
                object_name,
                axis_index,
                value,
            } => self.stage_axis(&object_name, axis_index, value),
            EmulatorAction::DeviceTypeChange { device_definition } => {
                self.stage_device_definition(device_definition)
            }
            EmulatorAction::StereoToggle { enabled } => self.set_stereo(enabled),
            EmulatorAction::KeyboardEvent {
                event_type,
                event_options,
            } => self
                .callbacks
                .on_keyboard_event(&event_type, &event_options.to_string()),
            EmulatorAction::ExitImmersive => self.exit_immersive(),
            EmulatorAction::RoomDimensionChange { dimension } => self.stage_room_dimension(dimension),
            EmulatorAction::InputModeChange { input_mode } => self.set_input_mode(input_mode),
            EmulatorAction::HandPoseChange { handedness, pose } => self.stage_hand_pose(handedness, &pose),
            EmulatorAction::PinchValueChange { handedness, value } => self.stage_pinch(handedness, value),
            EmulatorAction::UserObjectsChange { objects } => self.stage_user_objects(objects),
        }
    }

    /// Seed the staged state from persisted settings.
    pub fn apply_settings(&mut self, settings: &EmulatorSettings) {
        self.set_stereo(settings.stereo_on);
        self.set_input_mode(settings.input_mode);
        self.stage_hand_pose(Handedness::Left, &settings.hand_poses.left_hand);
        self.stage_hand_pose(Handedness::Right, &settings.hand_poses.right_hand);
        self.stage_room_dimension(settings.room_dimension);
        self.stage_user_objects(settings.user_objects.clone());
        for (object, transform) in &settings.default_pose {
            let rotation = &transform.rotation;
            if rotation.3 != "XYZ" {
                warn!(object = %object, order = %rotation.3, "unsupported rotation order, using XYZ");
            }
            let quaternion = quat_from_euler_xyz(rotation.0, rotation.1, rotation.2).to_array();
            match object.as_str() {
                HEADSET_OBJECT => self.stage_headset_pose(transform.position, quaternion),
                RIGHT_CONTROLLER_OBJECT | LEFT_CONTROLLER_OBJECT => {
                    self.stage_controller_pose(object, transform.position, quaternion)
                }
                _ => debug!(object = %object, "ignoring default pose"),
            }
        }
    }

    pub fn stage_headset_pose(&mut self, position: [f32; 3], quaternion: [f32; 4]) {
        self.headset_pose = Pose {
            position,
            orientation: quaternion,
        };
    }

    pub fn stage_controller_pose(&mut self, object_name: &str, position: [f32; 3], quaternion: [f32; 4]) {
        let Some(slot) = self
            .slots
            .slot_for_object(object_name)
            .and_then(|index| self.slots.slot_mut(index))
        else {
            warn!(object = object_name, "pose for unknown controller ignored");
            return;
        };
        // untracked controllers keep their gaze ray
        if slot.raw.pose.is_some() {
            slot.raw.pose = Some(Pose {
                position,
                orientation: quaternion,
            });
        }
    }

    pub fn stage_button(&mut self, object_name: &str, button_index: usize, state: ButtonState) {
        let Some(slot) = self
            .slots
            .slot_for_object(object_name)
            .and_then(|index| self.slots.slot_mut(index))
        else {
            warn!(object = object_name, "button for unknown controller ignored");
            return;
        };
        match slot.raw.buttons.get_mut(button_index) {
            Some(button) => *button = state,
            None => warn!(object = object_name, button_index, "button index out of range"),
        }
    }

    pub fn stage_axis(&mut self, object_name: &str, axis_index: usize, value: f32) {
        let Some(slot) = self
            .slots
            .slot_for_object(object_name)
            .and_then(|index| self.slots.slot_mut(index))
        else {
            warn!(object = object_name, "axis for unknown controller ignored");
            return;
        };
        if axis_index < RAW_AXES {
            slot.raw.axes[axis_index] = value;
        } else {
            warn!(object = object_name, axis_index, "axis index out of range");
        }
    }

    /// Swap the device definition.
    ///
    /// Action buttons are released now so the page observes their end
    /// events; the input sources are rebuilt after two frame ticks.
    pub fn stage_device_definition(&mut self, definition: DeviceDefinition) {
        self.slots.release_action_buttons();
        let ready_at = self.tick + DEVICE_SWAP_TICKS;
        info!(device = %definition.id, ready_at, "device swap scheduled");
        self.definition = definition.clone();
        self.pending_swap = Some(PendingSwap {
            definition,
            ready_at,
        });
    }

    pub fn set_stereo(&mut self, enabled: bool) {
        self.stereo = enabled;
    }

    pub fn set_input_mode(&mut self, mode: InputMode) {
        self.input_mode = mode;
        self.slots.apply_input_mode(mode);
    }

    /// End the active immersive session, if any.
    pub fn exit_immersive(&mut self) {
        let Some(id) = self.active_immersive else {
            debug!("exit-immersive without an immersive session");
            return;
        };
        if let Err(err) = self.end_session(id) {
            warn!(session = id.raw(), error = %err, "failed to exit immersive session");
        }
    }

    pub fn stage_room_dimension(&mut self, dimension: RoomDimension) {
        self.world.stage_room_dimension(dimension);
    }

    pub fn stage_user_objects(&mut self, objects: BTreeMap<String, UserObject>) {
        self.world.stage_user_objects(objects);
    }

    /// Select a library pose for one hand; unknown names keep the current pose.
    pub fn stage_hand_pose(&mut self, handedness: Handedness, pose: &str) {
        if !library().contains(pose) {
            warn!(pose, "unknown hand pose ignored");
            return;
        }
        match handedness {
            Handedness::Left => self.left_hand.pose = pose.to_string(),
            Handedness::Right => self.right_hand.pose = pose.to_string(),
            Handedness::None => warn!("hand pose without handedness ignored"),
        }
    }

    pub fn stage_pinch(&mut self, handedness: Handedness, value: f32) {
        let value = value.clamp(0.0, 1.0);
        match handedness {
            Handedness::Left => self.left_hand.pinch = value,
            Handedness::Right => self.right_hand.pinch = value,
            Handedness::None => warn!("pinch without handedness ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceHost;
    use crate::scheduler::ManualScheduler;
    use std::sync::Arc;
    use xremu_common::MemoryStore;
    use xremu_vr::{default_device, NoopCallbacks};

    fn device() -> EmulatedDevice {
        EmulatedDevice::new(
            default_device(),
            DeviceHost {
                scheduler: Box::new(ManualScheduler::new()),
                callbacks: Arc::new(NoopCallbacks),
                store: Box::new(MemoryStore::new()),
                origin: "o".to_string(),
            },
        )
    }

    #[test]
    fn test_button_value_defaults_follow_pressed() {
        let mut device = device();
        let action: EmulatorAction = serde_json::from_str(
            r#"{"action":"button-state-change","objectName":"right-controller","buttonIndex":1,"pressed":true}"#,
        )
        .unwrap();
        device.apply_action(action);
        let right = device.slots.slot_for_object("right-controller").unwrap();
        let button = device.slots.slots()[right].raw.buttons[1];
        assert_eq!(
            button,
            ButtonState {
                pressed: true,
                touched: true,
                value: 1.0
            }
        );
    }

    #[test]
    fn test_out_of_range_input_is_ignored() {
        let mut device = device();
        let before = device.slots.slots()[0].raw.clone();
        device.stage_button("left-controller", 99, ButtonState::default());
        device.stage_axis("left-controller", 9, 1.0);
        device.stage_button("headset", 0, ButtonState::default());
        assert_eq!(device.slots.slots()[0].raw, before);
    }

    #[test]
    fn test_unknown_hand_pose_keeps_previous() {
        let mut device = device();
        device.stage_hand_pose(Handedness::Left, "point");
        device.stage_hand_pose(Handedness::Left, "jazz-hands");
        assert_eq!(device.left_hand.pose, "point");
        device.stage_pinch(Handedness::Right, 3.0);
        assert_eq!(device.right_hand.pinch, 1.0);
    }

    #[test]
    fn test_settings_seed_staged_state() {
        let mut device = device();
        let mut settings = EmulatorSettings::default();
        settings.stereo_on = true;
        settings.input_mode = InputMode::Hands;
        device.apply_settings(&settings);
        assert!(device.stereo);
        assert_eq!(device.headset_pose.position, [0.0, 1.7, 0.0]);
        let right = device.slots.slot_for_object("right-controller").unwrap();
        let pose = device.slots.slots()[right].raw.pose.unwrap();
        assert_eq!(pose.position, [0.25, 1.5, -0.4]);
        assert!(device.slots.hands().all(|h| h.active));
    }
}
