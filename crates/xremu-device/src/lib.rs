//! Emulated WebXR device runtime.
//!
//! The simulation behind an emulated headset: sessions and frames, reference
//! spaces, controller and hand input, hit testing against an emulated room,
//! and persistent anchors. [`EmulatedDevice`] is the entry point.

#![forbid(unsafe_code)]

pub mod anchors;
pub mod device;
pub mod hand_pose;
pub mod hit_test;
pub mod input;
pub mod math;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod space;

pub use anchors::AnchorId;
pub use device::{
    DeviceHost, EmulatedDevice, HitTestResult, TransientHitTest, ViewerPose, XrJointPose, XrPose,
    XrView,
};
pub use hand_pose::HandJoint;
pub use hit_test::{FirstInputTargetRay, HitTestSourceId, TouchScreenRay, TransientRayStrategy};
pub use input::{InputSourceId, InputSourceInfo, SourceKind};
pub use scene::{MeshObject, Plane, PlaneOrientation, WorldObjectId};
pub use scheduler::ManualScheduler;
pub use session::{RenderState, SessionId, SessionInit, SessionState, XrEvent};
pub use space::SpaceId;
