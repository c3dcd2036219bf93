//! Win32 desktop backend

use super::{ClientWindow, Desktop, Rect, WindowHandle, WindowMessage};
use tracing::debug;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT, TRUE, WPARAM};
use windows::Win32::UI::Input::KeyboardAndMouse::{IsWindowEnabled, MapVirtualKeyW, MAPVK_VK_TO_VSC};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetSystemMetrics, GetWindowRect, GetWindowThreadProcessId, IsWindowVisible,
    MoveWindow, PostMessageW, SM_CXSCREEN, SM_CYSCREEN, WM_CHAR, WM_KEYDOWN, WM_KEYUP,
};

/// Desktop backed by user32
#[derive(Debug, Default)]
pub struct Win32Desktop;

impl Win32Desktop {
    pub fn new() -> Self {
        Self
    }
}

struct EnumState {
    pid: u32,
    found: Vec<ClientWindow>,
}

unsafe extern "system" fn collect_pid_windows(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let state = &mut *(lparam.0 as *mut EnumState);

    if IsWindowVisible(hwnd).as_bool() && IsWindowEnabled(hwnd).as_bool() {
        let mut owner = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut owner));
        if owner == state.pid {
            let rect = read_rect(hwnd).unwrap_or_default();
            state.found.push(ClientWindow {
                handle: WindowHandle(hwnd.0),
                owner_pid: owner,
                rect,
            });
        }
    }

    // Keep enumerating
    TRUE
}

fn read_rect(hwnd: HWND) -> Option<Rect> {
    let mut r = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut r) }.ok()?;
    Some(Rect::new(r.left, r.top, r.right - r.left, r.bottom - r.top))
}

impl Desktop for Win32Desktop {
    fn screen_size(&self) -> (i32, i32) {
        unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) }
    }

    fn locate_windows(&self, pid: u32) -> Vec<ClientWindow> {
        let mut state = EnumState {
            pid,
            found: Vec::new(),
        };

        unsafe {
            let _ = EnumWindows(
                Some(collect_pid_windows),
                LPARAM(&mut state as *mut EnumState as isize),
            );
        }

        debug!("PID {}: {} candidate windows", pid, state.found.len());
        state.found
    }

    fn window_rect(&self, window: WindowHandle) -> Option<Rect> {
        read_rect(HWND(window.0))
    }

    fn move_window(&self, window: WindowHandle, rect: Rect) -> bool {
        unsafe {
            MoveWindow(
                HWND(window.0),
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                TRUE,
            )
            .is_ok()
        }
    }

    fn post_message(&self, window: WindowHandle, message: WindowMessage) -> bool {
        let (msg, wparam, lparam) = match message {
            WindowMessage::KeyDown { vk, lparam } => (WM_KEYDOWN, vk as usize, lparam),
            WindowMessage::KeyUp { vk, lparam } => (WM_KEYUP, vk as usize, lparam),
            WindowMessage::Char(unit) => (WM_CHAR, unit as usize, 0),
        };

        unsafe {
            PostMessageW(
                HWND(window.0),
                msg,
                WPARAM(wparam),
                LPARAM(lparam as isize),
            )
            .is_ok()
        }
    }

    fn scan_code(&self, vk: u16) -> u32 {
        unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) }
    }
}
