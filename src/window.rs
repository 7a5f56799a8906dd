use std::collections::BTreeSet;
use std::fmt;

use crate::options::WindowOptions;

pub const DEFAULT_WIDTH: i32 = 1024;
pub const DEFAULT_HEIGHT: i32 = 768;
pub const DEFAULT_TITLE: &str = "Native Host";

/// Logical window identifier. Allocated from a monotonically increasing
/// counter and never reused within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque native window handle (an `HWND` on Windows, a counter in the
/// in-memory backend). Only meaningful to the backend that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub isize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Clamp to the 1x1 minimum a renderer surface accepts.
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn origin(&self) -> Point {
        Point { x: self.x, y: self.y }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Position that centers `size` inside this rectangle, never left of or
    /// above its origin.
    pub fn center(&self, size: Size) -> Point {
        Point {
            x: self
                .x
                .saturating_add((self.width.saturating_sub(size.width) / 2).max(0)),
            y: self
                .y
                .saturating_add((self.height.saturating_sub(size.height) / 2).max(0)),
        }
    }
}

/// Lifecycle of a native window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Requested,
    Created,
    Visible,
    Hidden,
    Destroyed,
}

/// Orthogonal minimize/maximize sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
}

/// Everything the host knows about one logical window.
#[derive(Debug, Clone)]
pub struct WindowRecord {
    pub id: WindowId,
    pub handle: Option<NativeHandle>,
    pub phase: WindowPhase,
    pub show_state: ShowState,
    pub size: Size,
    pub position: Option<Point>,
    pub title: String,
    pub frameless: bool,
    pub location: Option<String>,
    pub dev_tools: bool,
    pub context_menu: bool,
    pub rpc_namespace: Option<String>,
    pub rpc_methods: BTreeSet<String>,
}

impl WindowRecord {
    pub fn from_options(id: WindowId, options: &WindowOptions) -> Self {
        Self {
            id,
            handle: None,
            phase: WindowPhase::Requested,
            show_state: ShowState::Normal,
            size: Size::new(
                options.width.unwrap_or(DEFAULT_WIDTH),
                options.height.unwrap_or(DEFAULT_HEIGHT),
            ),
            position: match (options.x, options.y) {
                (Some(x), Some(y)) => Some(Point { x, y }),
                _ => None,
            },
            title: options
                .title
                .clone()
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            frameless: options.frameless.unwrap_or(false),
            location: options.url.clone().filter(|url| !url.trim().is_empty()),
            dev_tools: options.dev_tools.unwrap_or(false),
            context_menu: options.context_menu.unwrap_or(true),
            rpc_namespace: options.rpc_namespace.clone(),
            rpc_methods: options.rpc_methods.iter().flatten().cloned().collect(),
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.phase, WindowPhase::Requested | WindowPhase::Destroyed)
    }

    pub fn has_rpc_manifest(&self) -> bool {
        self.rpc_namespace.is_some() || !self.rpc_methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_defaults_follow_host_conventions() {
        let record = WindowRecord::from_options(WindowId(1), &WindowOptions::default());
        assert_eq!(record.size, Size::new(1024, 768));
        assert_eq!(record.title, DEFAULT_TITLE);
        assert!(record.context_menu);
        assert!(!record.dev_tools);
        assert!(!record.frameless);
        assert_eq!(record.position, None);
        assert_eq!(record.phase, WindowPhase::Requested);
        assert!(!record.has_rpc_manifest());
    }

    #[test]
    fn partial_position_is_ignored() {
        let options = WindowOptions {
            x: Some(10),
            ..Default::default()
        };
        let record = WindowRecord::from_options(WindowId(2), &options);
        assert_eq!(record.position, None);
    }

    #[test]
    fn center_never_goes_negative() {
        let screen = Rect { x: 0, y: 0, width: 1920, height: 1080 };
        assert_eq!(screen.center(Size::new(800, 600)), Point { x: 560, y: 240 });
        assert_eq!(screen.center(Size::new(4000, 3000)), Point { x: 0, y: 0 });
    }

    #[test]
    fn center_saturates_on_extreme_sizes() {
        let screen = Rect { x: 0, y: 0, width: 1920, height: 1080 };
        assert_eq!(screen.center(Size::new(i32::MAX, i32::MAX)), Point { x: 0, y: 0 });
        let centered = screen.center(Size::new(i32::MIN, i32::MIN));
        assert!(centered.x > 0 && centered.y > 0);

        let far = Rect { x: i32::MAX - 10, y: i32::MAX - 10, width: 1920, height: 1080 };
        assert_eq!(far.center(Size::new(0, 0)), Point { x: i32::MAX, y: i32::MAX });
    }

    #[test]
    fn clamp_keeps_surfaces_at_least_one_pixel() {
        assert_eq!(Size::new(0, -4).clamped(), Size::new(1, 1));
        assert_eq!(Size::new(30, 40).clamped(), Size::new(30, 40));
    }
}
