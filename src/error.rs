//! Error types for the view core

/// Errors surfaced by the row store and the view coordinator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewError {
    /// A row identity, handle or column index does not resolve to anything live.
    #[error("{what} {index} is out of range")]
    IndexOutOfRange { what: &'static str, index: usize },

    /// A regex search term failed to compile. The scope it belongs to matches nothing.
    #[error("Invalid search pattern '{pattern}': {reason}")]
    InvalidSearchPattern { pattern: String, reason: String },

    /// Row payload shape does not fit the configured columns.
    #[error("Row data has {found} values but the table has {expected} columns")]
    InvalidRowData { expected: usize, found: usize },
}

impl ViewError {
    pub fn row(index: usize) -> Self {
        Self::IndexOutOfRange {
            what: "Row",
            index,
        }
    }

    pub fn column(index: usize) -> Self {
        Self::IndexOutOfRange {
            what: "Column",
            index,
        }
    }

    pub fn handle(index: usize) -> Self {
        Self::IndexOutOfRange {
            what: "Visual handle",
            index,
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSearchPattern {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }
}

pub type ViewResult<T> = Result<T, ViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(ViewError::row(7).to_string(), "Row 7 is out of range");
        assert_eq!(ViewError::column(2).to_string(), "Column 2 is out of range");
        assert_eq!(
            ViewError::InvalidRowData {
                expected: 3,
                found: 2
            }
            .to_string(),
            "Row data has 2 values but the table has 3 columns"
        );
    }
}
