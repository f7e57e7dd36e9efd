//! Compiler configuration
//!
//! Settings are resolved once by the surrounding service and passed into the
//! compiler by value. Precedence: explicit override > server config > built-in
//! default.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// Legacy environment override for the iteration ignore-list (comma separated)
pub const ENV_ARRAY_IGNORE_NODE: &str = "AQL_ARRAY_IGNORE_NODE";
/// Legacy environment override for the iteration depth
pub const ENV_ARRAY_DEPTH: &str = "AQL_ARRAY_DEPTH";

/// Configuration for the AQL path compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Max distinct iteration markers inserted per path
    #[serde(default = "default_iteration_depth")]
    pub iteration_depth: usize,

    /// Multi-valued nodes never iterated, matched as `^<item>.*` against the
    /// last segment of the multi-valued archetype path
    #[serde(default = "default_iteration_ignore")]
    pub iteration_ignore: Vec<String>,

    /// Degrade to untyped output instead of failing on missing type info
    #[serde(default)]
    pub ignore_unresolved_introspect: bool,

    /// SQL column holding the entry JSON document
    #[serde(default = "default_entry_column")]
    pub entry_column: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            iteration_depth: default_iteration_depth(),
            iteration_ignore: default_iteration_ignore(),
            ignore_unresolved_introspect: false,
            entry_column: default_entry_column(),
        }
    }
}

fn default_iteration_depth() -> usize {
    1
}

fn default_iteration_ignore() -> Vec<String> {
    vec!["content".to_string(), "events".to_string()]
}

fn default_entry_column() -> String {
    r#""ehr"."entry"."entry""#.to_string()
}

impl CompilerConfig {
    /// Merge server settings and overrides on top of the built-in defaults.
    pub fn resolve(server: &ServerAqlSettings, overrides: &AqlOverrides) -> CompileResult<Self> {
        let mut config = Self::default();

        if let Some(depth) = server.iteration_depth {
            config.iteration_depth = depth;
        }
        if let Some(ignore) = &server.iteration_ignore {
            config.iteration_ignore = ignore.clone();
        }
        if let Some(ignore_unresolved) = server.ignore_unresolved_introspect {
            config.ignore_unresolved_introspect = ignore_unresolved;
        }
        if let Some(column) = &server.entry_column {
            config.entry_column = column.clone();
        }

        if let Some(ignore) = &overrides.array_ignore_node {
            config.iteration_ignore = split_list(ignore);
        }
        if let Some(depth) = overrides.array_depth {
            config.iteration_depth = depth;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_iteration_depth(mut self, depth: usize) -> Self {
        self.iteration_depth = depth;
        self
    }

    pub fn with_iteration_ignore<I, S>(mut self, ignore: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.iteration_ignore = ignore.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ignore_unresolved_introspect(mut self, ignore: bool) -> Self {
        self.ignore_unresolved_introspect = ignore;
        self
    }

    pub fn with_entry_column(mut self, column: impl Into<String>) -> Self {
        self.entry_column = column.into();
        self
    }

    pub fn validate(&self) -> CompileResult<()> {
        if self.iteration_depth == 0 {
            return Err(CompileError::InvalidConfig(
                "aql.iteration_depth must be >= 1".into(),
            ));
        }
        if self.entry_column.trim().is_empty() {
            return Err(CompileError::InvalidConfig(
                "aql.entry_column must not be empty".into(),
            ));
        }
        self.ignore_patterns()?;
        Ok(())
    }

    /// Compile the ignore-list into anchored patterns.
    pub fn ignore_patterns(&self) -> CompileResult<Vec<Regex>> {
        self.iteration_ignore
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(|item| {
                let item = item.trim_start_matches('^').trim_start_matches('/');
                Regex::new(&format!("^{item}.*")).map_err(|e| {
                    CompileError::InvalidConfig(format!("invalid iteration ignore '{item}': {e}"))
                })
            })
            .collect()
    }
}

/// The `[aql]` table of the server configuration file.
///
/// Every field is optional; absent fields fall back to the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerAqlSettings {
    #[serde(default)]
    pub iteration_depth: Option<usize>,
    #[serde(default)]
    pub iteration_ignore: Option<Vec<String>>,
    #[serde(default)]
    pub ignore_unresolved_introspect: Option<bool>,
    #[serde(default)]
    pub entry_column: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerConfigDocument {
    #[serde(default)]
    aql: ServerAqlSettings,
}

impl ServerAqlSettings {
    /// Read the `[aql]` table out of a full server TOML document.
    pub fn from_toml_str(content: &str) -> CompileResult<Self> {
        let doc: ServerConfigDocument = toml::from_str(content)
            .map_err(|e| CompileError::InvalidConfig(format!("toml parse error: {e}")))?;
        Ok(doc.aql)
    }
}

/// Literal overrides that win over the server configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AqlOverrides {
    /// Comma separated ignore-list
    pub array_ignore_node: Option<String>,
    pub array_depth: Option<usize>,
}

impl AqlOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> CompileResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CompileResult<Self> {
        let array_ignore_node = lookup(ENV_ARRAY_IGNORE_NODE);
        let array_depth = match lookup(ENV_ARRAY_DEPTH) {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
                CompileError::InvalidConfig(format!("{ENV_ARRAY_DEPTH}='{raw}': {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            array_ignore_node,
            array_depth,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

pub mod loader {
    use super::{AqlOverrides, CompilerConfig, ServerConfigDocument};
    use crate::error::{CompileError, CompileResult};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Load the compiler configuration.
    ///
    /// Layers, lowest precedence first: built-in defaults, the `[aql]` table of
    /// the TOML file at `path` (or `ehrbase.toml` when absent), `EHRBASE__AQL__*`
    /// environment variables, then the legacy `AQL_ARRAY_IGNORE_NODE` /
    /// `AQL_ARRAY_DEPTH` overrides.
    pub fn load_compiler_config(path: Option<&str>) -> CompileResult<CompilerConfig> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("ehrbase.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., EHRBASE__AQL__ITERATION_DEPTH=2
        builder = builder.add_source(
            Environment::with_prefix("EHRBASE")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("aql.iteration_ignore"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CompileError::InvalidConfig(format!("config build error: {e}")))?;
        let doc: ServerConfigDocument = cfg
            .try_deserialize()
            .map_err(|e| CompileError::InvalidConfig(format!("config deserialize error: {e}")))?;

        let overrides = AqlOverrides::from_env()?;
        let config = CompilerConfig::resolve(&doc.aql, &overrides)?;

        tracing::debug!(
            depth = config.iteration_depth,
            ignore = ?config.iteration_ignore,
            ignore_unresolved = config.ignore_unresolved_introspect,
            "Loaded AQL compiler configuration"
        );
        Ok(config)
    }
}
