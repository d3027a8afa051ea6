use serde::{Deserialize, Serialize};
use tracing::trace;

/// Page navigation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageAction {
    First,
    Previous,
    Next,
    Last,
    /// Zero-based page number
    Absolute(usize),
}

/// Pagination window into the display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub start: usize,
    /// Rows per page, `None` shows everything
    pub length: Option<usize>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            start: 0,
            length: Some(10),
        }
    }
}

impl Pagination {
    pub fn new(length: Option<usize>) -> Self {
        Self {
            start: 0,
            // A zero page length would never advance
            length: length.map(|l| l.max(1)),
        }
    }

    /// Build from the external `-1 = all` convention
    pub fn from_signed_length(length: i64) -> Self {
        if length < 0 {
            Self::new(None)
        } else {
            Self::new(Some(length as usize))
        }
    }

    /// External `-1 = all` form of the page length
    pub fn signed_length(&self) -> i64 {
        self.length.map_or(-1, |l| l as i64)
    }

    /// Start of the last page that still holds rows
    pub fn last_page_start(&self, total: usize) -> usize {
        match self.length {
            Some(length) if total > 0 => ((total - 1) / length) * length,
            _ => 0,
        }
    }

    /// Apply a navigation action. Returns true when the start moved.
    pub fn navigate(&mut self, action: PageAction, total: usize) -> bool {
        let previous = self.start;
        self.start = match self.length {
            None => 0,
            Some(length) => match action {
                PageAction::First => 0,
                PageAction::Previous => self.start.saturating_sub(length),
                PageAction::Next => {
                    let next = self.start + length;
                    if next < total {
                        next
                    } else {
                        self.start
                    }
                }
                PageAction::Last => self.last_page_start(total),
                PageAction::Absolute(page) => {
                    let start = page.saturating_mul(length);
                    if start < total {
                        start
                    } else {
                        self.last_page_start(total)
                    }
                }
            },
        };
        trace!(target: "Pagination", "{:?}: {} -> {} of {}", action, previous, self.start, total);
        self.start != previous
    }

    /// Pull the start back into `[0, total)` after the display order shrank
    pub fn clamp(&mut self, total: usize) {
        if self.start >= total {
            self.start = self.last_page_start(total);
        }
    }

    /// Exclusive end of the visible window
    pub fn visible_end(&self, total: usize) -> usize {
        match self.length {
            Some(length) => (self.start + length).min(total),
            None => total,
        }
    }

    /// Zero-based current page and total page count
    pub fn page_info(&self, total: usize) -> (usize, usize) {
        match self.length {
            Some(length) => (self.start / length, total.div_ceil(length)),
            None => (0, usize::from(total > 0)),
        }
    }
}
