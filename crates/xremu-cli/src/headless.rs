//! Host services for running the device without a page.

use std::io::Write;

use tracing::{debug, warn};
use xremu_common::{ClientAction, EmulatorAction};
use xremu_vr::{BaseLayer, ClearMask, ClearValues, DeviceCallbacks, SessionMode};

/// Render target that only tracks clears.
#[derive(Debug)]
pub struct HeadlessLayer {
    width: u32,
    height: u32,
    values: ClearValues,
    clears: u64,
}

impl HeadlessLayer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: ClearValues::default(),
            clears: 0,
        }
    }
}

impl BaseLayer for HeadlessLayer {
    fn framebuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear_values(&self) -> ClearValues {
        self.values
    }

    fn set_clear_values(&mut self, values: ClearValues) {
        self.values = values;
    }

    fn clear(&mut self, mask: ClearMask) {
        self.clears += 1;
        if self.clears == 1 {
            debug!(mask = mask.bits(), "first immersive clear");
        }
    }
}

/// Writes client actions to stdout, one JSON document per line.
#[derive(Debug, Default)]
pub struct StdoutCallbacks;

impl StdoutCallbacks {
    fn emit(&self, action: ClientAction) {
        match serde_json::to_string(&action) {
            Ok(line) => {
                let mut out = std::io::stdout().lock();
                if let Err(err) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                    warn!(error = %err, "failed to write client action");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode client action"),
        }
    }
}

impl DeviceCallbacks for StdoutCallbacks {
    fn on_present_start(&self, _session_id: u32, _mode: SessionMode) {
        self.emit(ClientAction::EnterImmersive);
    }

    fn on_present_end(&self, _session_id: u32) {
        self.emit(ClientAction::ExitImmersive);
    }

    fn on_keyboard_event(&self, event_type: &str, options: &str) {
        debug!(event_type, options, "keyboard event has no page to replay on");
    }
}

/// Parse one control script line.
///
/// Blank lines and `#` comments yield `None`; so do malformed lines, which
/// are logged.
pub fn parse_line(line: &str) -> Option<EmulatorAction> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(action) => Some(action),
        Err(err) => {
            warn!(error = %err, line, "ignoring malformed control message");
            None
        }
    }
}
