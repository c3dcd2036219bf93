//! Window Locator & Tiler
//!
//! Discovers the top-level windows owned by client processes and arranges
//! them into a grid. All OS access goes through the [`Desktop`] trait:
//! - `Win32Desktop` on Windows (EnumWindows / MoveWindow / PostMessageW)
//! - `HeadlessDesktop` elsewhere, which never finds a window

#[cfg(not(windows))]
mod headless;
#[cfg(windows)]
mod win32;

#[cfg(not(windows))]
pub use headless::HeadlessDesktop;
#[cfg(windows)]
pub use win32::Win32Desktop;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::stop::StopSignal;

/// Tiles smaller than this on either edge mean the window is still initializing
pub const MIN_TILE_EDGE: i32 = 50;

/// Delay between window moves
pub const TILE_THROTTLE: Duration = Duration::from_millis(30);

/// Opaque top-level window handle value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// Screen rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A visible, enabled window owned by a client process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientWindow {
    pub handle: WindowHandle,
    pub owner_pid: u32,
    pub rect: Rect,
}

/// Window message posted asynchronously to a client window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMessage {
    KeyDown { vk: u16, lparam: u32 },
    KeyUp { vk: u16, lparam: u32 },
    /// One UTF-16 code unit
    Char(u16),
}

/// OS window services used by the launcher
pub trait Desktop: Send + Sync {
    /// Primary screen size as (width, height)
    fn screen_size(&self) -> (i32, i32);

    /// Visible, enabled top-level windows owned by `pid`, in enumeration order
    fn locate_windows(&self, pid: u32) -> Vec<ClientWindow>;

    /// Current rectangle of a window, `None` if it no longer exists
    fn window_rect(&self, window: WindowHandle) -> Option<Rect>;

    /// Move and resize a window
    fn move_window(&self, window: WindowHandle, rect: Rect) -> bool;

    /// Post a message without waiting for it to be processed
    fn post_message(&self, window: WindowHandle, message: WindowMessage) -> bool;

    /// Hardware scan code for a virtual key
    fn scan_code(&self, vk: u16) -> u32;
}

/// Desktop for the current platform
pub fn platform_desktop() -> Arc<dyn Desktop> {
    #[cfg(windows)]
    {
        Arc::new(Win32Desktop::new())
    }

    #[cfg(not(windows))]
    {
        Arc::new(HeadlessDesktop::new())
    }
}

/// Grid placement for a set of windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    pub tile_width: i32,
    pub tile_height: i32,
    pub columns: usize,
    /// One cell per window, in the order the windows were given
    pub cells: Vec<Rect>,
}

/// Compute the grid for `count` windows.
///
/// The first window's rectangle sets the tile size unless it is degenerate,
/// in which case the configured resolution is used.
pub fn compute_tile_layout(
    first_rect: Option<Rect>,
    count: usize,
    screen_width: i32,
    _screen_height: i32,
    fallback_width: i32,
    fallback_height: i32,
) -> TileLayout {
    let (mut w, mut h) = match first_rect {
        Some(r) => (r.width.max(1), r.height.max(1)),
        None => (0, 0),
    };

    if w < MIN_TILE_EDGE || h < MIN_TILE_EDGE {
        w = fallback_width.max(1);
        h = fallback_height.max(1);
    }

    let columns = (screen_width / w).max(1) as usize;

    let cells = (0..count)
        .map(|i| {
            let col = (i % columns) as i32;
            let row = (i / columns) as i32;
            Rect::new(col * w, row * h, w, h)
        })
        .collect();

    TileLayout {
        tile_width: w,
        tile_height: h,
        columns,
        cells,
    }
}

/// Arrange windows left-to-right, top-to-bottom.
///
/// Returns the number of windows moved; stops early if a stop is requested.
pub fn tile_windows(
    desktop: &dyn Desktop,
    windows: &[ClientWindow],
    fallback: (i32, i32),
    throttle: Duration,
    stop: &StopSignal,
) -> usize {
    let Some(first) = windows.first() else {
        info!("No windows to tile");
        return 0;
    };

    let (screen_w, screen_h) = desktop.screen_size();
    let first_rect = desktop.window_rect(first.handle).or(Some(first.rect));
    let layout = compute_tile_layout(
        first_rect,
        windows.len(),
        screen_w,
        screen_h,
        fallback.0,
        fallback.1,
    );

    info!(
        "Tiling {} windows: {}x{} tiles, {} columns",
        windows.len(),
        layout.tile_width,
        layout.tile_height,
        layout.columns
    );

    let mut moved = 0;
    for (window, cell) in windows.iter().zip(&layout.cells) {
        if stop.is_requested() {
            break;
        }
        if desktop.move_window(window.handle, *cell) {
            moved += 1;
        } else {
            warn!("MoveWindow failed for {:?}", window.handle);
        }
        debug!("Moved {:?} to {:?}", window.handle, cell);
        if !stop.sleep(throttle) {
            break;
        }
    }

    moved
}


#[cfg(test)]
mod tests {
    use super::testing::FakeDesktop;
    use super::*;

    #[test]
    fn test_layout_uses_first_window_size() {
        let layout = compute_tile_layout(Some(Rect::new(10, 10, 400, 300)), 5, 1920, 1080, 186, 91);
        assert_eq!((layout.tile_width, layout.tile_height), (400, 300));
        assert_eq!(layout.columns, 4);
        assert_eq!(layout.cells[3], Rect::new(1200, 0, 400, 300));
        assert_eq!(layout.cells[4], Rect::new(0, 300, 400, 300));
    }

    #[test]
    fn test_layout_falls_back_for_degenerate_rect() {
        let layout = compute_tile_layout(Some(Rect::new(0, 0, 49, 300)), 2, 1000, 800, 186, 91);
        assert_eq!((layout.tile_width, layout.tile_height), (186, 91));
        assert_eq!(layout.columns, 5);

        let layout = compute_tile_layout(None, 1, 1000, 800, 186, 91);
        assert_eq!(layout.tile_width, 186);
    }

    #[test]
    fn test_layout_has_at_least_one_column() {
        let layout = compute_tile_layout(Some(Rect::new(0, 0, 3000, 200)), 3, 1920, 1080, 186, 91);
        assert_eq!(layout.columns, 1);
        assert_eq!(layout.cells[2], Rect::new(0, 400, 3000, 200));
    }

    #[test]
    fn test_layout_grid_property() {
        for width in [60, 186, 500, 1919] {
            let layout = compute_tile_layout(Some(Rect::new(0, 0, width, 100)), 17, 1920, 1080, 186, 91);
            let cols = std::cmp::max(1, 1920 / width) as usize;
            assert_eq!(layout.columns, cols);
            for (i, cell) in layout.cells.iter().enumerate() {
                assert_eq!(cell.x, (i % cols) as i32 * width);
                assert_eq!(cell.y, (i / cols) as i32 * 100);
            }
        }
    }

    #[test]
    fn test_tile_windows_moves_in_order() {
        let mut desktop = FakeDesktop::new((800, 600));
        desktop.add_window(1, 11, Rect::new(0, 0, 300, 200));
        desktop.add_window(2, 22, Rect::new(50, 50, 300, 200));
        desktop.add_window(3, 33, Rect::new(90, 90, 300, 200));
        let windows: Vec<_> = [1, 2, 3]
            .iter()
            .flat_map(|pid| desktop.locate_windows(*pid))
            .collect();

        let moved = tile_windows(&desktop, &windows, (186, 91), Duration::ZERO, &StopSignal::new());
        assert_eq!(moved, 3);

        let moves = desktop.moves.lock().clone();
        assert_eq!(moves[0], (WindowHandle(11), Rect::new(0, 0, 300, 200)));
        assert_eq!(moves[1], (WindowHandle(22), Rect::new(300, 0, 300, 200)));
        assert_eq!(moves[2], (WindowHandle(33), Rect::new(0, 200, 300, 200)));
    }

    #[test]
    fn test_tile_windows_empty_and_stopped() {
        let desktop = FakeDesktop::new((800, 600));
        assert_eq!(tile_windows(&desktop, &[], (186, 91), Duration::ZERO, &StopSignal::new()), 0);

        let mut desktop = FakeDesktop::new((800, 600));
        desktop.add_window(1, 11, Rect::new(0, 0, 300, 200));
        let stop = StopSignal::new();
        stop.request();
        let windows = desktop.locate_windows(1);
        assert_eq!(tile_windows(&desktop, &windows, (186, 91), Duration::ZERO, &stop), 0);
    }
}
