//! Translation options.
//!
//! Options are plain serde structs with defaults, so they can be built in
//! code, loaded from a TOML file, or overridden from `PHOTONQL_*`
//! environment variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Oldest server version whose operator vocabulary the output must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServerVersion {
    #[serde(rename = "4.2")]
    V4_2,
    #[serde(rename = "4.4")]
    V4_4,
    #[serde(rename = "5.0")]
    V5_0,
    #[serde(rename = "6.0")]
    V6_0,
    #[serde(rename = "6.3")]
    V6_3,
    #[serde(rename = "7.0")]
    V7_0,
}

impl ServerVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerVersion::V4_2 => "4.2",
            ServerVersion::V4_4 => "4.4",
            ServerVersion::V5_0 => "5.0",
            ServerVersion::V6_0 => "6.0",
            ServerVersion::V6_3 => "6.3",
            ServerVersion::V7_0 => "7.0",
        }
    }

    /// `$first`/`$last` array operators and `$replaceAll`
    pub fn supports_first_last(self) -> bool {
        self >= ServerVersion::V4_4
    }

    pub fn supports_replace_all(self) -> bool {
        self >= ServerVersion::V4_4
    }

    /// `$getField` and `$dateAdd`
    pub fn supports_get_field(self) -> bool {
        self >= ServerVersion::V5_0
    }

    pub fn supports_date_add(self) -> bool {
        self >= ServerVersion::V5_0
    }

    /// `$bitAnd`/`$bitOr`/`$bitXor`
    pub fn supports_bitwise(self) -> bool {
        self >= ServerVersion::V6_3
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        ServerVersion::V7_0
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "4.2" => Ok(ServerVersion::V4_2),
            "4.4" => Ok(ServerVersion::V4_4),
            "5.0" => Ok(ServerVersion::V5_0),
            "6.0" => Ok(ServerVersion::V6_0),
            "6.3" => Ok(ServerVersion::V6_3),
            "7.0" => Ok(ServerVersion::V7_0),
            other => Err(Error::Config(format!("unknown server version: {}", other))),
        }
    }
}

/// Options for one translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationOptions {
    /// Target server version
    pub compatibility_level: ServerVersion,
    /// Run the simplifier before rendering
    pub simplify: bool,
    /// Render disjoint `$and` filters as a single document
    pub implicit_and: bool,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            compatibility_level: ServerVersion::default(),
            simplify: true,
            implicit_and: true,
        }
    }
}

impl TranslationOptions {
    pub fn with_compatibility_level(mut self, level: ServerVersion) -> Self {
        self.compatibility_level = level;
        self
    }

    pub fn without_simplification(mut self) -> Self {
        self.simplify = false;
        self
    }

    /// Load options from an optional file, then `PHOTONQL_*` environment
    /// variables (later sources win)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "loading translation options");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix("PHOTONQL").try_parsing(true));
        builder
            .build()
            .and_then(|settings| settings.try_deserialize::<TranslationOptions>())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse options from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Render the options as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
