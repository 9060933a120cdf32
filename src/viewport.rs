//! Headless scroll surface for the chat log and the scroll-preservation
//! policy applied around every patch.
//!
//! The chat log is laid out as a column of message rows of equal height.
//! `scroll_height` is the content height (never less than the visible
//! `client_height`), and `scroll_top` is clamped to `[0, scroll_height -
//! client_height]` the way a browser clamps assignments to `scrollTop`.

use serde::{Deserialize, Serialize};

/// Geometry of the visible log pane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportGeometry {
    /// Visible height of the pane in pixels.
    pub client_height: f64,
    /// Height of a single message row in pixels.
    pub row_height: f64,
}

impl Default for ViewportGeometry {
    fn default() -> Self {
        Self {
            client_height: 480.0,
            row_height: 48.0,
        }
    }
}

/// A point-in-time reading of the scroll surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Whether the visible window reaches within `threshold` pixels of
    /// the bottom of the content.
    pub fn is_at_bottom(&self, threshold: f64) -> bool {
        self.scroll_top + self.client_height >= self.scroll_height - threshold
    }
}

/// The scroll surface of the chat log element.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    geometry: ViewportGeometry,
    rows: usize,
    scroll_top: f64,
}

impl Viewport {
    /// A freshly laid-out surface with `rows` messages, scrolled to the top.
    pub fn new(geometry: ViewportGeometry, rows: usize) -> Self {
        Self {
            geometry,
            rows,
            scroll_top: 0.0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn client_height(&self) -> f64 {
        self.geometry.client_height
    }

    pub fn scroll_height(&self) -> f64 {
        (self.rows as f64 * self.geometry.row_height).max(self.geometry.client_height)
    }

    pub fn max_scroll_top(&self) -> f64 {
        (self.scroll_height() - self.geometry.client_height).max(0.0)
    }

    /// Assign `scroll_top`, clamped into the scrollable range.
    pub fn set_scroll_top(&mut self, top: f64) {
        self.scroll_top = top.clamp(0.0, self.max_scroll_top());
    }

    /// Equivalent of `el.scrollTop = el.scrollHeight`.
    pub fn scroll_to_bottom(&mut self) {
        self.set_scroll_top(self.scroll_height());
    }

    /// Re-run layout for a new row count, keeping `scroll_top` in range.
    pub fn relayout(&mut self, rows: usize) {
        self.rows = rows;
        self.set_scroll_top(self.scroll_top);
    }

    pub fn metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            scroll_top: self.scroll_top,
            scroll_height: self.scroll_height(),
            client_height: self.geometry.client_height,
        }
    }
}

// ---------------------------------------------------------------------------
// Scroll preservation
// ---------------------------------------------------------------------------

/// State captured immediately before a patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollState {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub at_bottom: bool,
    pub message_count: usize,
}

impl ScrollState {
    /// Capture from the chat log's metrics, if the log exists. A missing
    /// log reads as an unscrolled, not-at-bottom surface.
    pub fn capture(metrics: Option<ScrollMetrics>, message_count: usize, threshold: f64) -> Self {
        match metrics {
            Some(m) => Self {
                scroll_top: m.scroll_top,
                scroll_height: m.scroll_height,
                at_bottom: m.is_at_bottom(threshold),
                message_count,
            },
            None => Self {
                scroll_top: 0.0,
                scroll_height: 0.0,
                at_bottom: false,
                message_count,
            },
        }
    }
}

/// What to do with the new log's scroll position after a patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollAction {
    /// Scroll to the maximum `scroll_top` once layout has settled.
    PinToBottom,
    /// Put `scroll_top` back where the reader left it.
    Restore(f64),
}

/// New messages, or a reader already following the tail, pin the log to
/// the bottom. Anyone reading history keeps their place.
pub fn plan(before: &ScrollState, new_message_count: usize) -> ScrollAction {
    if new_message_count > before.message_count || before.at_bottom {
        ScrollAction::PinToBottom
    } else {
        ScrollAction::Restore(before.scroll_top)
    }
}
