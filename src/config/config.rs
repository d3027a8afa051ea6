use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::datavalue_compare::BlankPolicy;
use crate::data::filter_engine::SearchCriteria;
use crate::data::sort_engine::SortKey;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub search: SearchConfig,
    pub sort: SortConfig,
    pub paging: PagingConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Split terms on whitespace and require every token
    pub smart: bool,

    /// Treat search terms as regular expressions
    pub regex: bool,

    /// Fold case before matching
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Where blank cells sort: "low", "first" or "last"
    pub blanks: BlankPolicy,

    /// Keys applied before any user sort
    pub fixed_pre: Vec<SortKey>,

    /// Keys applied after any user sort
    pub fixed_post: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Rows per page, -1 shows every row
    pub page_length: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Truncate cell text wider than this in table output
    pub max_cell_width: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            smart: true,
            regex: false,
            case_insensitive: true,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self { page_length: 10 }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { max_cell_width: 40 }
    }
}

impl ViewConfig {
    /// Load config from the default location, falling back to defaults when
    /// no file exists yet
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: ViewConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default config file path
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("datagrid").join("config.toml"))
    }

    /// Search criteria for a term using the configured defaults
    pub fn search_criteria(&self, term: impl Into<String>) -> SearchCriteria {
        SearchCriteria::new(term)
            .with_regex(self.search.regex)
            .with_smart(self.search.smart)
    }

    /// Create a default config file with comments
    pub fn create_default_with_comments() -> String {
        r#"# datagrid configuration file
# Location: ~/.config/datagrid/config.toml (Linux)
#           ~/Library/Application Support/datagrid/config.toml (macOS)
#           %APPDATA%\datagrid\config.toml (Windows)

[search]
# Split the search term on whitespace; every word must match somewhere in the row
smart = true

# Treat search terms as regular expressions
regex = false

# Ignore case when matching
case_insensitive = true

[sort]
# Where empty and unparseable cells go: "low", "first" or "last"
# "low" sorts them below every value, so they flip with the direction
blanks = "low"

# Sort keys that always apply before/after the user's sort, e.g.
# fixed_pre = [{ column = 0, order = "asc" }]
fixed_pre = []
fixed_post = []

[paging]
# Rows per page, -1 shows everything
page_length = 10

[display]
# Longer cell text is truncated in table output
max_cell_width = 40
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sort_engine::SortOrder;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ViewConfig::default();
        assert!(config.search.smart);
        assert!(config.search.case_insensitive);
        assert_eq!(config.paging.page_length, 10);
        assert_eq!(config.sort.blanks, BlankPolicy::Low);
    }

    #[test]
    fn test_commented_template_parses_to_defaults() {
        let parsed: ViewConfig = toml::from_str(&ViewConfig::create_default_with_comments()).unwrap();
        assert_eq!(parsed, ViewConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: ViewConfig = toml::from_str(
            r#"
[sort]
blanks = "last"
fixed_pre = [{ column = 2, order = "desc" }]

[paging]
page_length = -1
"#,
        )
        .unwrap();
        assert_eq!(parsed.sort.blanks, BlankPolicy::Last);
        assert_eq!(parsed.sort.fixed_pre[0].column, 2);
        assert_eq!(parsed.sort.fixed_pre[0].order, SortOrder::Descending);
        assert_eq!(parsed.paging.page_length, -1);
        assert!(parsed.search.smart);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ViewConfig::default();
        config.search.regex = true;
        config.display.max_cell_width = 12;
        config.save_to(&path).unwrap();

        assert_eq!(ViewConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[paging]\npage_length = \"many\"\n").unwrap();
        assert!(ViewConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_search_criteria_uses_defaults() {
        let mut config = ViewConfig::default();
        config.search.smart = false;
        let criteria = config.search_criteria("a b");
        assert_eq!(criteria.term, "a b");
        assert!(!criteria.smart);
        assert!(!criteria.regex);
    }
}
