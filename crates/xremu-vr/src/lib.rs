#![forbid(unsafe_code)]

pub mod adapter;
pub mod devices;
pub mod types;

pub use adapter::{
    BaseLayer, ClearMask, ClearValues, DeviceCallbacks, FrameCallback, FrameScheduler, NoopCallbacks,
};
pub use devices::{
    catalog, default_device, device_by_key, device_or_default, ControllerDefinition, DeviceDefinition,
    HeadsetDefinition, InputMapping, Resolution,
};
pub use types::{
    ButtonState, Eye, Handedness, InputMode, Pose, PoseType, Ray, ReferenceSpaceType,
    SessionMode, TargetRayMode, Viewport,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XrError {
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("buffer too small: need {needed}, got {got}")]
    Capacity { needed: usize, got: usize },
    #[error("storage error: {0}")]
    Storage(String),
}

impl XrError {
    pub fn not_supported(msg: impl std::fmt::Display) -> Self {
        Self::NotSupported(msg.to_string())
    }

    pub fn invalid_state(msg: impl std::fmt::Display) -> Self {
        Self::InvalidState(msg.to_string())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }
}

pub type XrResult<T> = Result<T, XrError>;
