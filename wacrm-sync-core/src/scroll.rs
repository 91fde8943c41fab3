//! Scroll Position Tracker
//!
//! Decides between following new messages and preserving the reader's
//! position. The tracker never touches a view: it consumes viewport metrics
//! and emits [`ScrollSignal`]s on a channel the UI layer drains.
//!
//! ## Rules
//!
//! - Within `near_bottom_threshold_px` of the bottom the view follows new
//!   messages (`should_auto_scroll`); further up the user is reading history
//!   (`is_user_scrolling`).
//! - Entering the near-top zone emits one `NearTop` per crossing, which the
//!   service turns into a history page load.
//! - After switching conversations the first rendered page scrolls to the
//!   bottom exactly once.

use crate::config::SyncConfig;
use tokio::sync::mpsc;
use tracing::debug;

/// Viewport geometry in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Distance between the bottom of the viewport and the end of the content
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }
}

/// Signals for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollSignal {
    UserScrollingChanged(bool),
    AutoScrollChanged(bool),
    /// The viewport reached the top: older messages should be loaded
    NearTop { conversation_id: String },
    /// Scroll to the newest message
    ScrollToBottom { conversation_id: String },
}

/// Auto-scroll vs preserve-position state
#[derive(Debug)]
pub struct ScrollPositionTracker {
    near_bottom_threshold: f64,
    near_top_threshold: f64,
    conversation_id: Option<String>,
    is_user_scrolling: bool,
    should_auto_scroll: bool,
    near_top: bool,
    initial_scroll_pending: bool,
    signal_tx: mpsc::UnboundedSender<ScrollSignal>,
}

impl ScrollPositionTracker {
    /// Create a tracker and the receiver for its signals
    pub fn new(config: &SyncConfig) -> (Self, mpsc::UnboundedReceiver<ScrollSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let tracker = Self {
            near_bottom_threshold: config.near_bottom_threshold_px,
            near_top_threshold: config.near_top_threshold_px,
            conversation_id: None,
            is_user_scrolling: false,
            should_auto_scroll: true,
            near_top: false,
            initial_scroll_pending: false,
            signal_tx,
        };

        (tracker, signal_rx)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn is_user_scrolling(&self) -> bool {
        self.is_user_scrolling
    }

    pub fn should_auto_scroll(&self) -> bool {
        self.should_auto_scroll
    }

    /// Feed the current viewport geometry
    pub fn update(&mut self, metrics: ScrollMetrics) {
        let near_bottom = metrics.distance_from_bottom() <= self.near_bottom_threshold;

        if self.is_user_scrolling == near_bottom {
            self.is_user_scrolling = !near_bottom;
            self.signal(ScrollSignal::UserScrollingChanged(self.is_user_scrolling));
        }
        if self.should_auto_scroll != near_bottom {
            self.should_auto_scroll = near_bottom;
            self.signal(ScrollSignal::AutoScrollChanged(near_bottom));
        }

        let near_top = metrics.scroll_top <= self.near_top_threshold;
        let entered_top = near_top && !self.near_top;
        self.near_top = near_top;

        // The first page renders scrolled to the top until the initial scroll lands
        if entered_top && !self.initial_scroll_pending {
            if let Some(conversation_id) = self.conversation_id.clone() {
                debug!("Near top of {}", conversation_id);
                self.signal(ScrollSignal::NearTop { conversation_id });
            }
        }
    }

    /// Reset for a newly opened conversation
    pub fn switch_conversation(&mut self, conversation_id: impl Into<String>) {
        let conversation_id = conversation_id.into();
        debug!("Scroll tracking switched to {}", conversation_id);

        self.conversation_id = Some(conversation_id);
        self.is_user_scrolling = false;
        self.should_auto_scroll = true;
        self.near_top = false;
        self.initial_scroll_pending = true;
    }

    /// Stop tracking
    pub fn clear(&mut self) {
        self.conversation_id = None;
        self.initial_scroll_pending = false;
        self.near_top = false;
    }

    /// The first page of `conversation_id` was rendered
    ///
    /// Returns whether a scroll to the bottom was requested.
    pub fn initial_page_rendered(&mut self, conversation_id: &str) -> bool {
        if !self.initial_scroll_pending || self.conversation_id.as_deref() != Some(conversation_id) {
            return false;
        }

        self.initial_scroll_pending = false;
        self.signal(ScrollSignal::ScrollToBottom {
            conversation_id: conversation_id.to_string(),
        });
        true
    }

    /// A message was appended to the active conversation
    ///
    /// Returns whether a scroll to the bottom was requested.
    pub fn on_new_message(&mut self, outgoing: bool) -> bool {
        if !(self.should_auto_scroll || outgoing) {
            return false;
        }
        let Some(conversation_id) = self.conversation_id.clone() else {
            return false;
        };

        self.signal(ScrollSignal::ScrollToBottom { conversation_id });
        true
    }

    /// Offset that keeps the viewport anchored after older content was prepended
    pub fn preserved_offset(previous_top: f64, previous_height: f64, new_height: f64) -> f64 {
        (previous_top + (new_height - previous_height)).max(0.0)
    }

    fn signal(&self, signal: ScrollSignal) {
        let _ = self.signal_tx.send(signal);
    }
}
