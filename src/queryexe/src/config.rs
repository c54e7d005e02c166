use common::QueryError;
use std::fs;
use std::path::Path;

/// Execution settings.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExecConfig {
    /// Let filters and projections move into scans whose entities accept them.
    pub pushdown: bool,
    /// Log the rewritten plan before building the data-flow graph.
    pub debug_rewrites: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            pushdown: true,
            debug_rewrites: false,
        }
    }
}

impl ExecConfig {
    /// Reads a json config file. Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, QueryError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
