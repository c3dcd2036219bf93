//! Desktop for platforms without a supported window system
//!
//! Finds no windows, so tiling, login typing and spam retry all become no-ops.

use super::{ClientWindow, Desktop, Rect, WindowHandle, WindowMessage};
use tracing::debug;

#[derive(Debug, Default)]
pub struct HeadlessDesktop;

impl HeadlessDesktop {
    pub fn new() -> Self {
        Self
    }
}

impl Desktop for HeadlessDesktop {
    fn screen_size(&self) -> (i32, i32) {
        (1920, 1080)
    }

    fn locate_windows(&self, pid: u32) -> Vec<ClientWindow> {
        debug!("No window system available, PID {} has no windows", pid);
        Vec::new()
    }

    fn window_rect(&self, _window: WindowHandle) -> Option<Rect> {
        None
    }

    fn move_window(&self, _window: WindowHandle, _rect: Rect) -> bool {
        false
    }

    fn post_message(&self, _window: WindowHandle, _message: WindowMessage) -> bool {
        false
    }

    fn scan_code(&self, _vk: u16) -> u32 {
        0
    }
}
