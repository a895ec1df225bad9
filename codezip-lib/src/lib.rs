use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory walked when no source is configured.
pub const DEFAULT_SOURCE: &str = "lib";
/// Archive written when no output is configured.
pub const DEFAULT_OUTPUT: &str = "codes.zip";
/// Suffix used when no suffix is configured.
pub const DEFAULT_SUFFIX: &str = ".dart";

/// Settings as read from the environment, a config file or the command line.
/// Every field is optional so that layers can be merged field by field.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub source: Option<String>,
    pub output: Option<String>,
    pub suffix: Option<String>,
    pub config: Option<String>,
    pub skip: Option<Vec<String>>,
    pub dry: Option<bool>,
}

impl Config {
    /// Fills in every unset field with its built-in default.
    pub fn with_defaults(mut self) -> Self {
        self.source.get_or_insert_with(|| DEFAULT_SOURCE.to_string());
        self.output.get_or_insert_with(|| DEFAULT_OUTPUT.to_string());
        self.suffix.get_or_insert_with(|| DEFAULT_SUFFIX.to_string());
        self.skip.get_or_insert_with(Vec::new);
        self.dry.get_or_insert(false);
        self
    }

    /// Resolves the config into the task for a single run.
    pub fn to_task(&self) -> ArchiveTask {
        ArchiveTask {
            source: PathBuf::from(self.source.as_deref().unwrap_or(DEFAULT_SOURCE)),
            output: PathBuf::from(self.output.as_deref().unwrap_or(DEFAULT_OUTPUT)),
            suffix: self
                .suffix
                .clone()
                .unwrap_or_else(|| DEFAULT_SUFFIX.to_string()),
            skip: self.skip.clone().unwrap_or_default(),
            dry: self.dry.unwrap_or(false),
        }
    }
}

/// Everything one archiving run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveTask {
    pub source: PathBuf,
    pub output: PathBuf,
    pub suffix: String,
    pub skip: Vec<String>,
    pub dry: bool,
}

impl ArchiveTask {
    /// Name of the output archive as shown to the user.
    pub fn output_name(&self) -> String {
        self.output.display().to_string()
    }
}
