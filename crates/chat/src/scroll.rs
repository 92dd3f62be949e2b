/// Distance from the bottom that still counts as following the tail.
pub const AUTO_SCROLL_THRESHOLD_PX: f32 = 50.0;

/// Geometry of the scrollable message list at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f32,
    pub viewport_height: f32,
    pub scroll_height: f32,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f32, viewport_height: f32, scroll_height: f32) -> Self {
        Self {
            scroll_top,
            viewport_height,
            scroll_height,
        }
    }

    pub fn is_near_bottom(&self, threshold: f32) -> bool {
        self.scroll_top + self.viewport_height >= self.scroll_height - threshold
    }
}

/// Decides when the message list should jump to its tail.
///
/// Follow mode pauses once the user scrolls away from the bottom and resumes
/// when they come back within the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollCoordinator {
    follow_bottom: bool,
    threshold: f32,
}

impl ScrollCoordinator {
    pub fn new() -> Self {
        Self::with_threshold(AUTO_SCROLL_THRESHOLD_PX)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            follow_bottom: true,
            threshold,
        }
    }

    pub fn is_following_bottom(&self) -> bool {
        self.follow_bottom
    }

    pub fn on_user_scroll(&mut self, metrics: ScrollMetrics) -> bool {
        self.follow_bottom = metrics.is_near_bottom(self.threshold);
        self.follow_bottom
    }

    /// New scroll top after messages or fragments were added, if following.
    pub fn on_content_changed(&self, metrics: ScrollMetrics) -> Option<f32> {
        self.follow_bottom.then_some(metrics.scroll_height)
    }

    pub fn scroll_to_bottom(&self, metrics: ScrollMetrics) -> Option<f32> {
        self.on_content_changed(metrics)
    }

    /// Scroll top that keeps the same content in view after older content was
    /// prepended above it.
    pub fn preserve_anchor(&self, before: ScrollMetrics, after: ScrollMetrics) -> f32 {
        after.scroll_height - before.scroll_height + before.scroll_top
    }

    pub fn reset(&mut self) {
        self.follow_bottom = true;
    }
}

impl Default for ScrollCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
