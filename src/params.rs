//! Params-file loading
//!
//! A params file overrides top-level param defaults, playing the role of
//! the caller's argument block for the root module. TOML and JSON are
//! both accepted, chosen by file extension (TOML when in doubt).

use anyhow::{Context, Result};
use indexmap::IndexMap;
use resource::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamsFormat {
    Toml,
    Json,
}

impl ParamsFormat {
    fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    fn parse(self, text: &str) -> Result<IndexMap<String, Value>> {
        match self {
            Self::Toml => toml::from_str(text).context("invalid TOML params file"),
            Self::Json => serde_json::from_str(text).context("invalid JSON params file"),
        }
    }
}

/// Load param overrides, or an empty map when no file was given
pub fn load_overrides(path: Option<&Path>) -> Result<IndexMap<String, Value>> {
    let Some(path) = path else {
        return Ok(IndexMap::new());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("could not read params file {}", path.display()))?;
    ParamsFormat::detect(path).parse(&text)
}
