use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine tuning. Pool amounts are fixed constants and not configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Optional cap on supervisor links followed above the closer. Unset walks
    /// the whole chain.
    pub max_chain_depth:  Option<usize>,
    /// Store the walked chain on the pool for audit.
    pub capture_snapshot: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chain_depth:  None,
            capture_snapshot: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidArgument(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chain_depth == Some(0) {
            return Err(Error::InvalidArgument("max_chain_depth must be at least 1".into()));
        }
        Ok(())
    }
}
