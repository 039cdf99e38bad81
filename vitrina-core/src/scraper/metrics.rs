use serde::Serialize;

/// Counters accumulated over the life of a scraping session. Context counters
/// are paired so a leak shows up as `contexts_opened != contexts_closed` once
/// the session is quiet.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionMetrics {
    pub browsers_launched: u64,
    pub contexts_opened: u64,
    pub contexts_closed: u64,
    pub pages_navigated: u64,
    pub blocked_pages: u64,
    pub items_extracted: u64,
    pub items_dropped: u64,
}

impl SessionMetrics {
    pub fn record_browser_launch(&mut self) {
        self.browsers_launched = self.browsers_launched.saturating_add(1);
    }

    pub fn record_context_open(&mut self) {
        self.contexts_opened = self.contexts_opened.saturating_add(1);
    }

    pub fn record_context_close(&mut self) {
        self.contexts_closed = self.contexts_closed.saturating_add(1);
    }

    pub fn record_navigation(&mut self) {
        self.pages_navigated = self.pages_navigated.saturating_add(1);
    }

    pub fn record_blocked_page(&mut self) {
        self.blocked_pages = self.blocked_pages.saturating_add(1);
    }

    pub fn record_items_extracted(&mut self, count: u64) {
        self.items_extracted = self.items_extracted.saturating_add(count);
    }

    pub fn record_items_dropped(&mut self, count: u64) {
        self.items_dropped = self.items_dropped.saturating_add(count);
    }

    /// Contexts opened but not yet closed. Zero once all work has drained.
    pub fn contexts_in_flight(&self) -> u64 {
        self.contexts_opened.saturating_sub(self.contexts_closed)
    }
}
