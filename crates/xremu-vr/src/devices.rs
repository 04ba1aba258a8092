//! Device definitions and the built-in catalog.
//!
//! The JSON shape matches what the devtool side sends in
//! `device-type-change`, so a definition can come from either place.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Handedness, SessionMode};

pub const DEFAULT_DEVICE_KEY: &str = "Meta Quest 3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadsetDefinition {
    pub has_position: bool,
    pub has_rotation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerDefinition {
    pub id: String,
    pub button_num: usize,
    /// `-1` when the controller has no select button.
    pub primary_button_index: i32,
    /// `-1` when the controller has no squeeze button.
    pub primary_squeeze_button_index: i32,
    pub has_position: bool,
    pub has_rotation: bool,
    pub has_squeeze_button: bool,
    pub handedness: Handedness,
}

impl ControllerDefinition {
    pub fn primary_button(&self) -> Option<usize> {
        usize::try_from(self.primary_button_index).ok()
    }

    pub fn primary_squeeze_button(&self) -> Option<usize> {
        usize::try_from(self.primary_squeeze_button_index).ok()
    }
}

/// Remapping from exposed gamepad slots to raw indices. `None` slots are
/// exposed as placeholder buttons or zero axes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputMapping {
    pub axes: Vec<Option<usize>>,
    pub buttons: Vec<Option<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDefinition {
    pub id: String,
    pub name: String,
    pub profile: String,
    pub modes: Vec<SessionMode>,
    pub headset: HeadsetDefinition,
    pub controllers: Vec<ControllerDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polyfill_input_mapping: Option<InputMapping>,
    /// Extra feature names this device supports beyond the static table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Screen size for handheld AR devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Resolution>,
}

impl DeviceDefinition {
    pub fn supports_mode(&self, mode: SessionMode) -> bool {
        self.modes.contains(&mode)
    }

    pub fn is_handheld(&self) -> bool {
        self.size.is_some()
    }
}

fn touch_controller(id: &str, handedness: Handedness) -> ControllerDefinition {
    ControllerDefinition {
        id: id.to_string(),
        button_num: 7,
        primary_button_index: 0,
        primary_squeeze_button_index: 1,
        has_position: true,
        has_rotation: true,
        has_squeeze_button: true,
        handedness,
    }
}

fn touch_mapping() -> InputMapping {
    InputMapping {
        axes: vec![Some(2), Some(3), Some(0), Some(1)],
        buttons: vec![Some(1), Some(2), None, Some(0), Some(3), Some(4), None],
    }
}

fn quest_family(name: &str, profile: &str, controller: &str, modes: Vec<SessionMode>) -> DeviceDefinition {
    DeviceDefinition {
        id: name.to_string(),
        name: name.to_string(),
        profile: profile.to_string(),
        modes,
        headset: HeadsetDefinition {
            has_position: true,
            has_rotation: true,
        },
        controllers: vec![
            touch_controller(&format!("{controller} (Left)"), Handedness::Left),
            touch_controller(&format!("{controller} (Right)"), Handedness::Right),
        ],
        polyfill_input_mapping: Some(touch_mapping()),
        features: Vec::new(),
        resolution: None,
        size: None,
    }
}

/// Built-in device definitions, default device first.
pub fn catalog() -> Vec<DeviceDefinition> {
    use SessionMode::*;

    let mut quest3 = quest_family(
        "Meta Quest 3",
        "meta-quest-touch-plus",
        "Meta Quest Touch Plus",
        vec![Inline, ImmersiveVr, ImmersiveAr],
    );
    quest3.resolution = Some(Resolution {
        width: 2064,
        height: 2208,
    });

    let phone = DeviceDefinition {
        id: "Handheld AR Phone".to_string(),
        name: "Handheld AR Phone".to_string(),
        profile: "generic-touchscreen".to_string(),
        modes: vec![Inline, ImmersiveAr],
        headset: HeadsetDefinition {
            has_position: true,
            has_rotation: true,
        },
        controllers: vec![ControllerDefinition {
            id: "Touch Screen".to_string(),
            button_num: 1,
            primary_button_index: 0,
            primary_squeeze_button_index: -1,
            has_position: false,
            has_rotation: false,
            has_squeeze_button: false,
            handedness: Handedness::None,
        }],
        polyfill_input_mapping: None,
        features: Vec::new(),
        resolution: None,
        size: Some(Resolution {
            width: 1080,
            height: 2340,
        }),
    };

    vec![
        quest3,
        quest_family(
            "Meta Quest Pro",
            "meta-quest-touch-pro",
            "Meta Quest Touch Pro",
            vec![Inline, ImmersiveVr, ImmersiveAr],
        ),
        quest_family(
            "Oculus Quest 2",
            "oculus-touch-v3",
            "Oculus Touch V3",
            vec![Inline, ImmersiveVr],
        ),
        phone,
    ]
}

pub fn device_by_key(key: &str) -> Option<DeviceDefinition> {
    catalog().into_iter().find(|d| d.id == key)
}

pub fn default_device() -> DeviceDefinition {
    match device_by_key(DEFAULT_DEVICE_KEY) {
        Some(device) => device,
        None => {
            warn!("default device missing from catalog");
            catalog().swap_remove(0)
        }
    }
}

/// Resolve `key` against the catalog, keeping the default on unknown keys.
pub fn device_or_default(key: &str) -> DeviceDefinition {
    device_by_key(key).unwrap_or_else(|| {
        warn!("unknown device key {:?}, using {}", key, DEFAULT_DEVICE_KEY);
        default_device()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_default_first() {
        let devices = catalog();
        assert_eq!(devices[0].id, DEFAULT_DEVICE_KEY);
        assert_eq!(default_device().id, DEFAULT_DEVICE_KEY);
        assert_eq!(device_or_default("Virtual Boy").id, DEFAULT_DEVICE_KEY);
    }

    #[test]
    fn test_missing_buttons_are_none() {
        let phone = device_by_key("Handheld AR Phone").unwrap();
        assert!(phone.is_handheld());
        assert_eq!(phone.controllers[0].primary_button(), Some(0));
        assert_eq!(phone.controllers[0].primary_squeeze_button(), None);
    }

    #[test]
    fn test_definition_json_shape() {
        let json = r#"{
            "id": "Test HMD",
            "name": "Test HMD",
            "profile": "oculus-touch",
            "modes": ["inline", "immersive-vr"],
            "headset": {"hasPosition": true, "hasRotation": true},
            "controllers": [{
                "id": "Touch (Left)", "buttonNum": 7, "primaryButtonIndex": 0,
                "primarySqueezeButtonIndex": 1, "hasPosition": true, "hasRotation": true,
                "hasSqueezeButton": true, "handedness": "left"
            }],
            "polyfillInputMapping": {"axes": [2, 3, 0, 1], "buttons": [1, 2, null, 0, 3, 4, null]}
        }"#;
        let def: DeviceDefinition = serde_json::from_str(json).unwrap();
        assert!(def.supports_mode(SessionMode::ImmersiveVr));
        assert!(!def.supports_mode(SessionMode::ImmersiveAr));
        assert_eq!(def.controllers[0].handedness, Handedness::Left);
        assert_eq!(def.polyfill_input_mapping.unwrap().buttons[2], None);
        assert!(def.features.is_empty());
    }
}
