use bitflags::bitflags;

use crate::types::SessionMode;

bitflags! {
    /// Buffers cleared at the start of an immersive frame. Values match GL.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearMask: u32 {
        const DEPTH = 0x0000_0100;
        const STENCIL = 0x0000_0400;
        const COLOR = 0x0000_4000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: i32,
}

impl ClearValues {
    /// Transparent black, far depth, zero stencil.
    pub const OPAQUE_FRAME: ClearValues = ClearValues {
        color: [0.0, 0.0, 0.0, 0.0],
        depth: 1.0,
        stencil: 0,
    };
}

impl Default for ClearValues {
    fn default() -> Self {
        Self::OPAQUE_FRAME
    }
}

/// Render target bound to a session.
pub trait BaseLayer {
    fn framebuffer_size(&self) -> (u32, u32);
    fn clear_values(&self) -> ClearValues;
    fn set_clear_values(&mut self, values: ClearValues);
    fn clear(&mut self, mask: ClearMask);
}

pub type FrameCallback = Box<dyn FnOnce(f64)>;

/// Host animation-frame scheduler.
pub trait FrameScheduler {
    fn request_animation_frame(&mut self, callback: FrameCallback) -> u32;
    fn cancel_animation_frame(&mut self, handle: u32);
}

/// Device -> host notifications.
pub trait DeviceCallbacks: Send + Sync {
    /// An immersive session started presenting; the host moves its canvas into the overlay.
    fn on_present_start(&self, _session_id: u32, _mode: SessionMode) {}
    /// The immersive session ended; the host restores its canvas.
    fn on_present_end(&self, _session_id: u32) {}
    /// Keyboard event to replay on the page. `options` is a JSON document.
    fn on_keyboard_event(&self, _event_type: &str, _options: &str) {}
}

/// Callbacks that ignore every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl DeviceCallbacks for NoopCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_mask_gl_values() {
        let all = ClearMask::COLOR | ClearMask::DEPTH | ClearMask::STENCIL;
        assert_eq!(all.bits(), 0x4500);
        assert_eq!(ClearValues::default().depth, 1.0);
    }
}
