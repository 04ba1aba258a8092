//! Persisted emulator settings.
//!
//! All settings live in a single JSON document under [`SETTINGS_KEY`]. Every
//! field has a default so documents written by older builds still load.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
pub use xremu_vr::devices::DEFAULT_DEVICE_KEY;
use xremu_vr::InputMode;

use crate::error::Result;
use crate::protocol::{RoomDimension, UserObject};
use crate::storage::KeyValueStore;

pub const SETTINGS_KEY: &str = "xremu-settings";

pub const HEADSET_OBJECT: &str = "headset";
pub const RIGHT_CONTROLLER_OBJECT: &str = "right-controller";
pub const LEFT_CONTROLLER_OBJECT: &str = "left-controller";

/// Euler rotation stored as `[x, y, z, order]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EulerRotation(pub f32, pub f32, pub f32, pub String);

impl Default for EulerRotation {
    fn default() -> Self {
        Self(0.0, 0.0, 0.0, "XYZ".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTransform {
    pub position: [f32; 3],
    pub rotation: EulerRotation,
}

impl DeviceTransform {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            rotation: EulerRotation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandPoses {
    #[serde(rename = "left-hand")]
    pub left_hand: String,
    #[serde(rename = "right-hand")]
    pub right_hand: String,
}

impl Default for HandPoses {
    fn default() -> Self {
        Self {
            left_hand: "relaxed".to_string(),
            right_hand: "relaxed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmulatorSettings {
    pub stereo_on: bool,
    /// Starting transform per tracked object name.
    pub default_pose: BTreeMap<String, DeviceTransform>,
    pub device_key: String,
    pub room_dimension: RoomDimension,
    /// Origins the polyfill must not be injected into.
    pub polyfill_excludes: BTreeSet<String>,
    pub input_mode: InputMode,
    pub hand_poses: HandPoses,
    pub user_objects: BTreeMap<String, UserObject>,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        let mut default_pose = BTreeMap::new();
        default_pose.insert(
            HEADSET_OBJECT.to_string(),
            DeviceTransform::at([0.0, 1.7, 0.0]),
        );
        default_pose.insert(
            RIGHT_CONTROLLER_OBJECT.to_string(),
            DeviceTransform::at([0.25, 1.5, -0.4]),
        );
        default_pose.insert(
            LEFT_CONTROLLER_OBJECT.to_string(),
            DeviceTransform::at([-0.25, 1.5, -0.4]),
        );
        Self {
            stereo_on: false,
            default_pose,
            device_key: DEFAULT_DEVICE_KEY.to_string(),
            room_dimension: RoomDimension::default(),
            polyfill_excludes: BTreeSet::new(),
            input_mode: InputMode::Controllers,
            hand_poses: HandPoses::default(),
            user_objects: BTreeMap::new(),
        }
    }
}

impl EmulatorSettings {
    /// Load settings from `store`, falling back to defaults when absent.
    ///
    /// A stored document that fails to parse is logged and replaced by the
    /// defaults instead of failing startup.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(SETTINGS_KEY) {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => {
                    debug!("loaded settings");
                    settings
                }
                Err(err) => {
                    warn!("ignoring unreadable settings: {}", err);
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    pub fn write(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        store.set(SETTINGS_KEY, serde_json::to_string(self)?)
    }

    pub fn clear(store: &mut dyn KeyValueStore) -> Result<()> {
        store.remove(SETTINGS_KEY)
    }

    pub fn is_excluded(&self, origin: &str) -> bool {
        self.polyfill_excludes.contains(origin)
    }

    pub fn set_excluded(&mut self, origin: &str, excluded: bool) {
        if excluded {
            self.polyfill_excludes.insert(origin.to_string());
        } else {
            self.polyfill_excludes.remove(origin);
        }
    }
}
