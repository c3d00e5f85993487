//! Layered settings: built-in defaults, an optional config file and
//! `TREEPLEX__SECTION__KEY` environment variables, in that order.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tenant::StorageMode;

pub const DEFAULT_CONFIG_FILE: &str = "treeplex.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub rewrite: RewriteSettings,
    pub extensions: ExtensionSettings,
    pub search: SearchSettings,
    pub graph: GraphSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for database files. In-memory databases when absent.
    pub data_dir: Option<PathBuf>,
    /// File name of the database monolithic tenants share.
    pub shared_database: String,
    pub default_mode: StorageMode,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            shared_database: "shared.sqlite".into(),
            default_mode: StorageMode::Separate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteSettings {
    pub quote_identifiers: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionSettings {
    /// Extensions treated as absent even when the catalog lists them.
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub fuzzy_threshold: f64,
    pub semantic_threshold: f64,
    pub semantic_embedding_kind: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: 25,
            fuzzy_threshold: 0.3,
            semantic_threshold: 0.5,
            semantic_embedding_kind: "text".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub max_depth: usize,
    pub max_generations: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_generations: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".into(),
        }
    }
}

impl Settings {
    /// Reads `path` if it exists, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let settings = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("TREEPLEX")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("extensions.disabled")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
