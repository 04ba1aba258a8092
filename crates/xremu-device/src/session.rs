//! Session lifecycle, feature negotiation and per-frame input events.

use std::collections::{BTreeSet, VecDeque};
use std::f32::consts::FRAC_PI_2;

use tracing::{debug, warn};
use xremu_vr::{BaseLayer, DeviceDefinition, SessionMode, XrError, XrResult};

use crate::input::{Edge, InputAction, InputEdge, InputSlots, InputSourceId};

pub const FEATURE_VIEWER: &str = "viewer";
pub const FEATURE_LOCAL: &str = "local";
pub const FEATURE_ANCHORS: &str = "anchors";
pub const FEATURE_HIT_TEST: &str = "hit-test";
pub const FEATURE_HAND_TRACKING: &str = "hand-tracking";
pub const FEATURE_DOM_OVERLAY: &str = "dom-overlay";
pub const FEATURE_PLANE_DETECTION: &str = "plane-detection";
pub const FEATURE_MESH_DETECTION: &str = "mesh-detection";

const DEPRECATED_FOVEATION: &str = "high-fixed-foveation-level";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u32);

impl SessionId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no base layer bound yet.
    Requested,
    /// Base layer bound; frames may run.
    Active,
    Ended,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInit {
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    /// Element id of the DOM overlay root, used with `dom-overlay`.
    pub dom_overlay_root: Option<String>,
}

impl SessionInit {
    pub fn required<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_features: features.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Render state sampled at frame start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub depth_near: f32,
    pub depth_far: f32,
    /// Vertical field of view for inline sessions, radians.
    pub inline_vertical_fov: f32,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_near: 0.1,
            depth_far: 1000.0,
            inline_vertical_fov: FRAC_PI_2,
        }
    }
}

/// Event delivered to a session's page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XrEvent {
    SelectStart(InputSourceId),
    Select(InputSourceId),
    SelectEnd(InputSourceId),
    SqueezeStart(InputSourceId),
    Squeeze(InputSourceId),
    SqueezeEnd(InputSourceId),
    InputSourcesChange {
        added: Vec<InputSourceId>,
        removed: Vec<InputSourceId>,
    },
    End,
}

fn edge_events(edge: &InputEdge, out: &mut Vec<XrEvent>) {
    let id = edge.source;
    match (edge.action, edge.edge) {
        (InputAction::Select, Edge::Start) => out.push(XrEvent::SelectStart(id)),
        (InputAction::Select, Edge::End) => {
            out.push(XrEvent::Select(id));
            out.push(XrEvent::SelectEnd(id));
        }
        (InputAction::Squeeze, Edge::Start) => out.push(XrEvent::SqueezeStart(id)),
        (InputAction::Squeeze, Edge::End) => {
            out.push(XrEvent::Squeeze(id));
            out.push(XrEvent::SqueezeEnd(id));
        }
    }
}

/// Static feature table extended by the device's allow-list.
pub fn is_feature_supported(device: &DeviceDefinition, name: &str) -> bool {
    let builtin = match name {
        "viewer" | "local" | "local-floor" => Some(true),
        "bounded-floor" | "unbounded" => Some(false),
        "dom-overlay" | "anchors" | "plane-detection" | "hit-test" | "hand-tracking"
        | "mesh-detection" => Some(true),
        DEPRECATED_FOVEATION => {
            warn!(feature = name, "deprecated feature requested");
            Some(true)
        }
        _ => None,
    };
    builtin.unwrap_or_else(|| device.features.iter().any(|f| f == name))
}

/// Resolve the enabled feature set for a session request.
pub fn negotiate_features(
    device: &DeviceDefinition,
    mode: SessionMode,
    init: &SessionInit,
) -> XrResult<BTreeSet<String>> {
    let mut enabled = BTreeSet::new();
    for feature in &init.required_features {
        if !is_feature_supported(device, feature) {
            return Err(XrError::not_supported(format!(
                "required feature {feature} is not supported"
            )));
        }
        enabled.insert(feature.clone());
    }
    for feature in &init.optional_features {
        if is_feature_supported(device, feature) {
            enabled.insert(feature.clone());
        } else {
            debug!(feature = %feature, "dropping unsupported optional feature");
        }
    }
    enabled.insert(FEATURE_VIEWER.to_string());
    if mode.is_immersive() {
        enabled.insert(FEATURE_LOCAL.to_string());
    }
    Ok(enabled)
}

pub struct Session {
    pub id: SessionId,
    pub mode: SessionMode,
    pub enabled_features: BTreeSet<String>,
    pub state: SessionState,
    /// Single-view handheld AR.
    pub monoscopic: bool,
    pub inline_vertical_fov: f32,
    pub target_frame_rate: Option<f32>,
    pub(crate) base_layer: Option<Box<dyn BaseLayer>>,
    pub(crate) visible_inputs: Vec<InputSourceId>,
    events: VecDeque<XrEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("enabled_features", &self.enabled_features)
            .finish()
    }
}

impl Session {
    pub fn new(id: SessionId, mode: SessionMode, enabled_features: BTreeSet<String>, monoscopic: bool) -> Self {
        Self {
            id,
            mode,
            enabled_features,
            state: SessionState::Requested,
            monoscopic,
            inline_vertical_fov: FRAC_PI_2,
            target_frame_rate: None,
            base_layer: None,
            visible_inputs: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn is_immersive(&self) -> bool {
        self.mode.is_immersive()
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.enabled_features.contains(name)
    }

    pub fn is_ended(&self) -> bool {
        self.state == SessionState::Ended
    }

    pub fn push_event(&mut self, event: XrEvent) {
        self.events.push_back(event);
    }

    pub fn take_events(&mut self) -> Vec<XrEvent> {
        self.events.drain(..).collect()
    }

    /// Derive this frame's input events.
    ///
    /// Order: edges of sources that stay visible, end events of sources
    /// that disappeared while pressed, the source-change event, then edges
    /// of newly visible sources.
    pub fn process_input(&mut self, slots: &mut InputSlots, now_visible: Vec<InputSourceId>) {
        let removed: Vec<InputSourceId> = self
            .visible_inputs
            .iter()
            .filter(|id| !now_visible.contains(id))
            .copied()
            .collect();
        let added: Vec<InputSourceId> = now_visible
            .iter()
            .filter(|id| !self.visible_inputs.contains(id))
            .copied()
            .collect();

        let mut removed_events = Vec::new();
        for &id in &removed {
            for action in slots.pressed_actions(id) {
                removed_events.push(match action {
                    InputAction::Select => XrEvent::SelectEnd(id),
                    InputAction::Squeeze => XrEvent::SqueezeEnd(id),
                });
            }
            slots.reset_latches(id);
        }

        let (fresh, persisting): (Vec<InputEdge>, Vec<InputEdge>) = slots
            .detect_edges(&now_visible)
            .into_iter()
            .partition(|edge| added.contains(&edge.source));

        let mut events = Vec::new();
        for edge in &persisting {
            edge_events(edge, &mut events);
        }
        events.extend(removed_events);
        if !added.is_empty() || !removed.is_empty() {
            events.push(XrEvent::InputSourcesChange { added, removed });
        }
        for edge in &fresh {
            edge_events(edge, &mut events);
        }
        self.events.extend(events);
        self.visible_inputs = now_visible;
    }
}
