// window.rs — Game window placement after a resolution change.
//
// The engine's window (class "VVideoClass") is resized so its client area
// matches the applied resolution, then docked on the desktop according to
// the configured DockPosition.

use crate::config::DockPosition;

/// Top-left corner for a `window`-sized window docked on a `screen`-sized desktop.
pub fn dock_origin(position: DockPosition, screen: (i32, i32), window: (i32, i32)) -> (i32, i32) {
    let (screen_w, screen_h) = screen;
    let (window_w, window_h) = window;
    let left = 0;
    let center = (screen_w - window_w) / 2;
    let right = screen_w - window_w;
    let top = 0;
    let middle = (screen_h - window_h) / 2;
    let bottom = screen_h - window_h;

    match position {
        DockPosition::Center => (center, middle),
        DockPosition::TopLeft => (left, top),
        DockPosition::TopCenter => (center, top),
        DockPosition::TopRight => (right, top),
        DockPosition::MiddleLeft => (left, middle),
        DockPosition::MiddleRight => (right, middle),
        DockPosition::BottomLeft => (left, bottom),
        DockPosition::BottomCenter => (center, bottom),
        DockPosition::BottomRight => (right, bottom),
    }
}

// ============================================================
// Win32 (Windows only)
// ============================================================

#[cfg(windows)]
pub use native::{desktop_resolution, resize_game_window};

#[cfg(windows)]
mod native {
    use super::dock_origin;
    use crate::config::DockPosition;
    use crate::presentation::Resolution;
    use winapi::shared::windef::RECT;
    use winapi::um::winuser::{
        AdjustWindowRectEx, FindWindowA, GetMenu, GetSystemMetrics, GetWindowLongA, SetWindowPos,
        GWL_EXSTYLE, GWL_STYLE, SM_CXSCREEN, SM_CYSCREEN, SWP_NOACTIVATE, SWP_NOZORDER,
    };

    const GAME_WINDOW_CLASS: &[u8] = b"VVideoClass\0";

    /// Primary display size.
    pub fn desktop_resolution() -> Resolution {
        unsafe { Resolution::new(GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) }
    }

    /// Size the game window's client area to `width` x `height` and dock it.
    pub fn resize_game_window(width: i32, height: i32, dock: DockPosition) {
        unsafe {
            let hwnd = FindWindowA(GAME_WINDOW_CLASS.as_ptr() as _, std::ptr::null());
            if hwnd.is_null() {
                tracing::warn!("game window not found");
                return;
            }

            let style = GetWindowLongA(hwnd, GWL_STYLE) as u32;
            let ex_style = GetWindowLongA(hwnd, GWL_EXSTYLE) as u32;
            let has_menu = !GetMenu(hwnd).is_null();

            let mut rect = RECT { left: 0, top: 0, right: width, bottom: height };
            AdjustWindowRectEx(&mut rect, style, has_menu as i32, ex_style);
            let outer = (rect.right - rect.left, rect.bottom - rect.top);

            let screen = desktop_resolution();
            let (x, y) = dock_origin(dock, (screen.width, screen.height), outer);

            if SetWindowPos(hwnd, std::ptr::null_mut(), x, y, outer.0, outer.1,
                SWP_NOZORDER | SWP_NOACTIVATE) == 0
            {
                tracing::warn!("SetWindowPos failed");
                return;
            }
            tracing::info!(
                "window resized to {width}x{height} (outer {}x{}) at ({x}, {y}), {dock:?}",
                outer.0, outer.1
            );
        }
    }
}
