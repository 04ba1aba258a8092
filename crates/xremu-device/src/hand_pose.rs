//! Hand skeleton poses and pinch blending.
//!
//! Poses are authored for the left hand in grip space: fingers point along
//! -Z, the palm faces -Y and the thumb sits on the +X side. Right-hand
//! joints are obtained with [`mirror_x`].

use std::collections::BTreeMap;
use std::sync::OnceLock;

use glam::{Mat4, Quat, Vec3};
use xremu_vr::Handedness;

use crate::math::{interpolate_matrix, mirror_x};

pub const DEFAULT_POSE: &str = "relaxed";
pub const PINCH_POSE: &str = "pinch";
pub const JOINT_COUNT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandJoint {
    Wrist,
    ThumbMetacarpal,
    ThumbPhalanxProximal,
    ThumbPhalanxDistal,
    ThumbTip,
    IndexFingerMetacarpal,
    IndexFingerPhalanxProximal,
    IndexFingerPhalanxIntermediate,
    IndexFingerPhalanxDistal,
    IndexFingerTip,
    MiddleFingerMetacarpal,
    MiddleFingerPhalanxProximal,
    MiddleFingerPhalanxIntermediate,
    MiddleFingerPhalanxDistal,
    MiddleFingerTip,
    RingFingerMetacarpal,
    RingFingerPhalanxProximal,
    RingFingerPhalanxIntermediate,
    RingFingerPhalanxDistal,
    RingFingerTip,
    PinkyFingerMetacarpal,
    PinkyFingerPhalanxProximal,
    PinkyFingerPhalanxIntermediate,
    PinkyFingerPhalanxDistal,
    PinkyFingerTip,
}

impl HandJoint {
    pub const ALL: [HandJoint; JOINT_COUNT] = [
        HandJoint::Wrist,
        HandJoint::ThumbMetacarpal,
        HandJoint::ThumbPhalanxProximal,
        HandJoint::ThumbPhalanxDistal,
        HandJoint::ThumbTip,
        HandJoint::IndexFingerMetacarpal,
        HandJoint::IndexFingerPhalanxProximal,
        HandJoint::IndexFingerPhalanxIntermediate,
        HandJoint::IndexFingerPhalanxDistal,
        HandJoint::IndexFingerTip,
        HandJoint::MiddleFingerMetacarpal,
        HandJoint::MiddleFingerPhalanxProximal,
        HandJoint::MiddleFingerPhalanxIntermediate,
        HandJoint::MiddleFingerPhalanxDistal,
        HandJoint::MiddleFingerTip,
        HandJoint::RingFingerMetacarpal,
        HandJoint::RingFingerPhalanxProximal,
        HandJoint::RingFingerPhalanxIntermediate,
        HandJoint::RingFingerPhalanxDistal,
        HandJoint::RingFingerTip,
        HandJoint::PinkyFingerMetacarpal,
        HandJoint::PinkyFingerPhalanxProximal,
        HandJoint::PinkyFingerPhalanxIntermediate,
        HandJoint::PinkyFingerPhalanxDistal,
        HandJoint::PinkyFingerTip,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Wrist => "wrist",
            Self::ThumbMetacarpal => "thumb-metacarpal",
            Self::ThumbPhalanxProximal => "thumb-phalanx-proximal",
            Self::ThumbPhalanxDistal => "thumb-phalanx-distal",
            Self::ThumbTip => "thumb-tip",
            Self::IndexFingerMetacarpal => "index-finger-metacarpal",
            Self::IndexFingerPhalanxProximal => "index-finger-phalanx-proximal",
            Self::IndexFingerPhalanxIntermediate => "index-finger-phalanx-intermediate",
            Self::IndexFingerPhalanxDistal => "index-finger-phalanx-distal",
            Self::IndexFingerTip => "index-finger-tip",
            Self::MiddleFingerMetacarpal => "middle-finger-metacarpal",
            Self::MiddleFingerPhalanxProximal => "middle-finger-phalanx-proximal",
            Self::MiddleFingerPhalanxIntermediate => "middle-finger-phalanx-intermediate",
            Self::MiddleFingerPhalanxDistal => "middle-finger-phalanx-distal",
            Self::MiddleFingerTip => "middle-finger-tip",
            Self::RingFingerMetacarpal => "ring-finger-metacarpal",
            Self::RingFingerPhalanxProximal => "ring-finger-phalanx-proximal",
            Self::RingFingerPhalanxIntermediate => "ring-finger-phalanx-intermediate",
            Self::RingFingerPhalanxDistal => "ring-finger-phalanx-distal",
            Self::RingFingerTip => "ring-finger-tip",
            Self::PinkyFingerMetacarpal => "pinky-finger-metacarpal",
            Self::PinkyFingerPhalanxProximal => "pinky-finger-phalanx-proximal",
            Self::PinkyFingerPhalanxIntermediate => "pinky-finger-phalanx-intermediate",
            Self::PinkyFingerPhalanxDistal => "pinky-finger-phalanx-distal",
            Self::PinkyFingerTip => "pinky-finger-tip",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|j| j.name() == name)
    }

    /// Thumb and index joints blend toward the pinch pose.
    pub fn is_pinch_joint(self) -> bool {
        let name = self.name();
        name.starts_with("thumb") || name.starts_with("index")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointPose {
    pub transform: Mat4,
    pub radius: f32,
}

#[derive(Debug, Clone)]
pub struct HandPose {
    joints: Vec<JointPose>,
}

impl HandPose {
    pub fn joint(&self, joint: HandJoint) -> &JointPose {
        &self.joints[joint.index()]
    }

    pub fn joints(&self) -> &[JointPose] {
        &self.joints
    }
}

#[derive(Debug)]
pub struct HandPoseLibrary {
    poses: BTreeMap<&'static str, HandPose>,
}

impl HandPoseLibrary {
    pub fn get(&self, name: &str) -> Option<&HandPose> {
        self.poses.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.poses.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.poses.keys().copied()
    }
}

pub fn library() -> &'static HandPoseLibrary {
    static LIBRARY: OnceLock<HandPoseLibrary> = OnceLock::new();
    LIBRARY.get_or_init(build_library)
}

/// Joint transform of `pose` for the given hand.
pub fn joint_matrix(pose: &HandPose, joint: HandJoint, handedness: Handedness) -> Mat4 {
    let transform = pose.joint(joint).transform;
    if handedness == Handedness::Right {
        mirror_x(&transform)
    } else {
        transform
    }
}

/// Joint of `pose_name` blended toward the pinch pose by `pinch`.
///
/// Only thumb and index joints move; the radius is always the base pose's.
pub fn blended_joint(
    pose_name: &str,
    joint: HandJoint,
    handedness: Handedness,
    pinch: f32,
) -> Option<JointPose> {
    let lib = library();
    let base = lib.get(pose_name)?;
    let pinch_pose = lib.get(PINCH_POSE)?;
    let from = joint_matrix(base, joint, handedness);
    let to = joint_matrix(pinch_pose, joint, handedness);
    let alpha = if joint.is_pinch_joint() { pinch } else { 0.0 };
    Some(JointPose {
        transform: interpolate_matrix(&from, &to, alpha),
        radius: base.joint(joint).radius,
    })
}

struct Finger {
    base: Vec3,
    /// Bone lengths from each joint to the next.
    lengths: &'static [f32],
    radii: &'static [f32],
}

const THUMB: Finger = Finger {
    base: Vec3::new(0.025, -0.012, 0.045),
    lengths: &[0.040, 0.032, 0.025],
    radii: &[0.019, 0.012, 0.010, 0.008],
};

const FINGERS: [Finger; 4] = [
    Finger {
        base: Vec3::new(0.020, 0.0, 0.050),
        lengths: &[0.065, 0.040, 0.025, 0.020],
        radii: &[0.021, 0.011, 0.009, 0.008, 0.007],
    },
    Finger {
        base: Vec3::new(0.002, 0.0, 0.050),
        lengths: &[0.065, 0.045, 0.028, 0.022],
        radii: &[0.021, 0.012, 0.010, 0.008, 0.007],
    },
    Finger {
        base: Vec3::new(-0.016, 0.0, 0.048),
        lengths: &[0.060, 0.041, 0.026, 0.021],
        radii: &[0.019, 0.011, 0.009, 0.008, 0.007],
    },
    Finger {
        base: Vec3::new(-0.032, -0.002, 0.045),
        lengths: &[0.055, 0.033, 0.020, 0.019],
        radii: &[0.018, 0.009, 0.008, 0.007, 0.006],
    },
];

/// Per-pose shape: a yaw per chain (thumb first) and curl angles per joint.
struct PoseShape {
    name: &'static str,
    yaw: [f32; 5],
    curls: [[f32; 4]; 5],
}

const RELAXED_FINGERS: [[f32; 4]; 4] = [
    [0.05, 0.25, 0.20, 0.12],
    [0.05, 0.30, 0.25, 0.15],
    [0.05, 0.35, 0.30, 0.18],
    [0.05, 0.40, 0.35, 0.20],
];

const SHAPES: [PoseShape; 3] = [
    PoseShape {
        name: "relaxed",
        yaw: [-0.70, 0.04, 0.0, -0.04, -0.08],
        curls: [
            [0.20, 0.15, 0.10, 0.0],
            RELAXED_FINGERS[0],
            RELAXED_FINGERS[1],
            RELAXED_FINGERS[2],
            RELAXED_FINGERS[3],
        ],
    },
    PoseShape {
        name: "point",
        yaw: [-0.40, 0.0, 0.0, -0.02, -0.04],
        curls: [
            [0.50, 0.60, 0.40, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.10, 1.40, 1.30, 0.60],
            [0.10, 1.40, 1.30, 0.60],
            [0.10, 1.40, 1.30, 0.60],
        ],
    },
    PoseShape {
        name: "pinch",
        yaw: [-0.35, 0.04, 0.0, -0.04, -0.08],
        curls: [
            [0.35, 0.45, 0.35, 0.0],
            [0.10, 0.75, 0.65, 0.45],
            RELAXED_FINGERS[1],
            RELAXED_FINGERS[2],
            RELAXED_FINGERS[3],
        ],
    },
];

fn chain(finger: &Finger, yaw: f32, curls: &[f32; 4], out: &mut Vec<JointPose>) {
    let mut rotation = Quat::from_rotation_y(yaw);
    let mut position = finger.base;
    for (i, radius) in finger.radii.iter().enumerate() {
        if let Some(length) = finger.lengths.get(i) {
            rotation *= Quat::from_rotation_x(-curls[i]);
            out.push(JointPose {
                transform: Mat4::from_rotation_translation(rotation, position),
                radius: *radius,
            });
            position += rotation * Vec3::new(0.0, 0.0, -length);
        } else {
            out.push(JointPose {
                transform: Mat4::from_rotation_translation(rotation, position),
                radius: *radius,
            });
        }
    }
}

fn build_pose(shape: &PoseShape) -> HandPose {
    let mut joints = Vec::with_capacity(JOINT_COUNT);
    joints.push(JointPose {
        transform: Mat4::from_translation(Vec3::new(0.0, 0.0, 0.06)),
        radius: 0.02,
    });
    chain(&THUMB, shape.yaw[0], &shape.curls[0], &mut joints);
    for (i, finger) in FINGERS.iter().enumerate() {
        chain(finger, shape.yaw[i + 1], &shape.curls[i + 1], &mut joints);
    }
    debug_assert_eq!(joints.len(), JOINT_COUNT);
    HandPose { joints }
}

fn build_library() -> HandPoseLibrary {
    let poses = SHAPES.iter().map(|s| (s.name, build_pose(s))).collect();
    HandPoseLibrary { poses }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_has_required_poses() {
        let lib = library();
        for name in ["relaxed", "point", "pinch"] {
            let pose = lib.get(name).unwrap();
            assert_eq!(pose.joints().len(), JOINT_COUNT);
        }
        assert!(lib.get("fist").is_none());
    }

    #[test]
    fn test_joint_names_round_trip() {
        for joint in HandJoint::ALL {
            assert_eq!(HandJoint::from_name(joint.name()), Some(joint));
        }
        assert_eq!(HandJoint::ALL[24], HandJoint::PinkyFingerTip);
        assert!(HandJoint::ThumbTip.is_pinch_joint());
        assert!(HandJoint::IndexFingerTip.is_pinch_joint());
        assert!(!HandJoint::MiddleFingerTip.is_pinch_joint());
        assert!(!HandJoint::Wrist.is_pinch_joint());
    }

    #[test]
    fn test_fingers_point_forward() {
        let pose = library().get(DEFAULT_POSE).unwrap();
        let tip = pose.joint(HandJoint::MiddleFingerTip).transform.w_axis;
        let wrist = pose.joint(HandJoint::Wrist).transform.w_axis;
        assert!(tip.z < wrist.z);
        let thumb = pose.joint(HandJoint::ThumbTip).transform.w_axis;
        assert!(thumb.x > 0.0);
    }

    #[test]
    fn test_thumb_tip_pinch_interpolation() {
        let lib = library();
        let relaxed = lib.get("relaxed").unwrap();
        let pinch = lib.get("pinch").unwrap();
        for handedness in [Handedness::Left, Handedness::Right] {
            let base = joint_matrix(relaxed, HandJoint::ThumbTip, handedness);
            let target = joint_matrix(pinch, HandJoint::ThumbTip, handedness);
            assert_ne!(base, target);

            let at0 = blended_joint("relaxed", HandJoint::ThumbTip, handedness, 0.0).unwrap();
            let at1 = blended_joint("relaxed", HandJoint::ThumbTip, handedness, 1.0).unwrap();
            assert_eq!(at0.transform, base);
            assert_eq!(at1.transform, target);

            let mut last = 0.0;
            for step in 1..10 {
                let alpha = step as f32 / 10.0;
                let joint = blended_joint("relaxed", HandJoint::ThumbTip, handedness, alpha).unwrap();
                let distance = (joint.transform.w_axis - base.w_axis).truncate().length();
                assert!(distance > last, "alpha {alpha}");
                last = distance;
            }
        }
    }

    #[test]
    fn test_non_pinch_joints_ignore_pinch() {
        let relaxed = library().get("relaxed").unwrap();
        let joint = blended_joint("relaxed", HandJoint::RingFingerTip, Handedness::Left, 1.0).unwrap();
        assert_eq!(joint.transform, relaxed.joint(HandJoint::RingFingerTip).transform);
        assert_eq!(joint.radius, relaxed.joint(HandJoint::RingFingerTip).radius);
    }

    #[test]
    fn test_right_hand_is_mirrored() {
        let relaxed = library().get("relaxed").unwrap();
        let left = joint_matrix(relaxed, HandJoint::ThumbTip, Handedness::Left);
        let right = joint_matrix(relaxed, HandJoint::ThumbTip, Handedness::Right);
        assert_eq!(right.w_axis.x, -left.w_axis.x);
        assert_eq!(right.w_axis.y, left.w_axis.y);
        assert_eq!(mirror_x(&right), left);
    }
}
