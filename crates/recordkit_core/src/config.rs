//! Engine configuration.
//!
//! Every option has a default, so an empty JSON object is a valid config.

use serde::Deserialize;

/// Target text encoding for string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    #[default]
    Utf8,
    /// Non-ASCII characters are replaced with `?`.
    Ascii,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Create missing tables on the first schema-missing failure.
    pub auto_create_tables: bool,
    /// Alternate lookup field tried before the primary key.
    pub handle_field: String,
    pub charset: Charset,
    /// Enables point-lookup caching for unique/primary fields.
    pub cache_enabled: bool,
    /// Table used by types that never declare one.
    pub default_table: String,
    /// Default delimiter for set/list fields.
    pub list_delimiter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_create_tables: true,
            handle_field: "Handle".to_string(),
            charset: Charset::Utf8,
            cache_enabled: true,
            default_table: "records".to_string(),
            list_delimiter: ",".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with_auto_create_tables(mut self, enabled: bool) -> Self {
        self.auto_create_tables = enabled;
        self
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Charset, EngineConfig};

    #[test]
    fn empty_json_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").expect("empty object parses");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_json_overrides_named_options() {
        let config =
            EngineConfig::from_json_str(r#"{"auto_create_tables": false, "charset": "ascii"}"#)
                .expect("partial config parses");
        assert!(!config.auto_create_tables);
        assert_eq!(config.charset, Charset::Ascii);
        assert_eq!(config.handle_field, "Handle");
    }
}
