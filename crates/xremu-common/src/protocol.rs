use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xremu_vr::{DeviceDefinition, Handedness, InputMode};

/// Control action sent by the devtool panel and relayed to the emulated device.
///
/// Every action only stages new values on the device; derived state is
/// recomputed on the next animation frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum EmulatorAction {
    /// New headset pose.
    HeadsetPoseChange {
        position: [f32; 3],
        quaternion: [f32; 4],
    },

    /// New controller pose, addressed by `right-controller` / `left-controller`.
    #[serde(rename_all = "camelCase")]
    ControllerPoseChange {
        object_name: String,
        position: [f32; 3],
        quaternion: [f32; 4],
    },

    /// Button press/touch/value change. A missing value follows `pressed`.
    #[serde(rename_all = "camelCase")]
    ButtonStateChange {
        object_name: String,
        button_index: usize,
        pressed: bool,
        #[serde(default)]
        touched: Option<bool>,
        #[serde(default)]
        value: Option<f32>,
    },

    /// Thumbstick / touchpad axis change.
    #[serde(rename_all = "camelCase")]
    AnalogValueChange {
        object_name: String,
        axis_index: usize,
        value: f32,
    },

    /// Swap the emulated device definition.
    #[serde(rename_all = "camelCase")]
    DeviceTypeChange { device_definition: DeviceDefinition },

    /// Toggle side-by-side stereo rendering.
    StereoToggle { enabled: bool },

    /// Keyboard event to be replayed on the page.
    #[serde(rename_all = "camelCase")]
    KeyboardEvent {
        event_type: String,
        #[serde(default)]
        event_options: serde_json::Value,
    },

    /// Leave the active immersive session.
    ExitImmersive,

    /// Resize the emulated room.
    RoomDimensionChange { dimension: RoomDimension },

    /// Switch between controllers and hands.
    #[serde(rename_all = "camelCase")]
    InputModeChange { input_mode: InputMode },

    /// Select a named hand pose for one hand.
    HandPoseChange { handedness: Handedness, pose: String },

    /// Pinch strength in `[0, 1]` for one hand.
    PinchValueChange { handedness: Handedness, value: f32 },

    /// Full set of user placed planes and meshes.
    UserObjectsChange {
        objects: BTreeMap<String, UserObject>,
    },
}

impl EmulatorAction {
    /// Wire name of the action, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HeadsetPoseChange { .. } => "headset-pose-change",
            Self::ControllerPoseChange { .. } => "controller-pose-change",
            Self::ButtonStateChange { .. } => "button-state-change",
            Self::AnalogValueChange { .. } => "analog-value-change",
            Self::DeviceTypeChange { .. } => "device-type-change",
            Self::StereoToggle { .. } => "stereo-toggle",
            Self::KeyboardEvent { .. } => "keyboard-event",
            Self::ExitImmersive => "exit-immersive",
            Self::RoomDimensionChange { .. } => "room-dimension-change",
            Self::InputModeChange { .. } => "input-mode-change",
            Self::HandPoseChange { .. } => "hand-pose-change",
            Self::PinchValueChange { .. } => "pinch-value-change",
            Self::UserObjectsChange { .. } => "user-objects-change",
        }
    }
}

/// Notification sent from the page side back to the devtool panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ClientAction {
    EnterImmersive,
    ExitImmersive,
}

/// Room size in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomDimension {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for RoomDimension {
    fn default() -> Self {
        Self {
            x: 6.0,
            y: 3.0,
            z: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserObjectKind {
    Plane,
    Mesh,
}

/// A plane or box mesh placed by the user in the emulated room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserObject {
    #[serde(rename = "type")]
    pub kind: UserObjectKind,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub depth: f32,
    #[serde(default)]
    pub is_vertical: bool,
    #[serde(default = "default_semantic_label")]
    pub semantic_label: String,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_semantic_label() -> String {
    "other".to_string()
}

fn default_active() -> bool {
    true
}
