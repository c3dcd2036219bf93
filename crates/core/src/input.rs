//! Input Injector
//!
//! Types text into a specific client window by posting key and character
//! messages to it. Posts are fire-and-forget; the only pacing is a fixed delay
//! between units so the target's message queue is not flooded.

use crate::desktop::{Desktop, WindowHandle, WindowMessage};
use crate::stop::StopSignal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const VK_TAB: u16 = 0x09;
pub const VK_RETURN: u16 = 0x0D;

/// Carriage return as delivered in WM_CHAR
const CHAR_CR: u16 = 0x0D;

/// Delays used while typing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputTiming {
    /// Between typed units
    pub per_unit: Duration,
    /// Between key-down and key-up of one press
    pub key_hold: Duration,
}

impl Default for InputTiming {
    fn default() -> Self {
        Self {
            per_unit: Duration::from_millis(20),
            key_hold: Duration::from_millis(10),
        }
    }
}

impl InputTiming {
    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            per_unit: Duration::ZERO,
            key_hold: Duration::ZERO,
        }
    }
}

/// Low-level key message lParam.
///
/// Repeat count 1, scan code in bits 16-23, and for key-up the previous-state
/// (bit 30) and transition-state (bit 31) bits.
pub fn key_lparam(scan_code: u32, key_up: bool) -> u32 {
    let mut lparam = 1 | ((scan_code & 0xFF) << 16);
    if key_up {
        lparam |= (1 << 30) | (1 << 31);
    }
    lparam
}

/// Posts synthetic keyboard input to client windows
#[derive(Clone)]
pub struct InputInjector {
    desktop: Arc<dyn Desktop>,
    timing: InputTiming,
    stop: StopSignal,
}

impl InputInjector {
    pub fn new(desktop: Arc<dyn Desktop>, timing: InputTiming, stop: StopSignal) -> Self {
        Self {
            desktop,
            timing,
            stop,
        }
    }

    fn post(&self, window: WindowHandle, message: WindowMessage) {
        if !self.desktop.post_message(window, message) {
            debug!("PostMessage to {:?} failed: {:?}", window, message);
        }
    }

    /// Post a single key-down or key-up message
    pub fn press_key(&self, window: WindowHandle, vk: u16, key_up: bool) {
        let lparam = key_lparam(self.desktop.scan_code(vk), key_up);
        let message = if key_up {
            WindowMessage::KeyUp { vk, lparam }
        } else {
            WindowMessage::KeyDown { vk, lparam }
        };
        self.post(window, message);
    }

    /// Full Enter press; the target expects a CR character between down and up
    pub fn press_enter(&self, window: WindowHandle) {
        self.press_key(window, VK_RETURN, false);
        self.post(window, WindowMessage::Char(CHAR_CR));
        self.stop.sleep(self.timing.key_hold);
        self.press_key(window, VK_RETURN, true);
    }

    pub fn press_tab(&self, window: WindowHandle) {
        self.press_key(window, VK_TAB, false);
        self.stop.sleep(self.timing.key_hold);
        self.press_key(window, VK_TAB, true);
    }

    /// Type text: TAB and CR/LF become key presses, everything else WM_CHAR.
    ///
    /// Blank text is ignored. Typing stops early if a stop is requested.
    pub fn type_text(&self, window: WindowHandle, text: &str) {
        if text.trim().is_empty() {
            warn!("Refusing to type blank text into {:?}", window);
            return;
        }

        for ch in text.chars() {
            if self.stop.is_requested() {
                return;
            }
            match ch {
                '\t' => self.press_tab(window),
                '\r' | '\n' => self.press_enter(window),
                _ => {
                    let mut units = [0u16; 2];
                    for unit in ch.encode_utf16(&mut units) {
                        self.post(window, WindowMessage::Char(*unit));
                    }
                }
            }
            self.stop.sleep(self.timing.per_unit);
        }
    }
}
