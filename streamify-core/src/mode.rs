//! Runtime mode configuration for Streamify.

use serde::{Deserialize, Serialize};

/// Runtime mode for Streamify services.
///
/// Controls which download engine backs the handle manager: local content
/// directories in production, the deterministic simulated swarm in
/// development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RuntimeMode {
    /// Production mode - serves content through the directory engine
    Production,
    /// Development mode - uses the simulated engine for offline development
    #[default]
    Development,
}

impl RuntimeMode {
    /// Check if running in development mode.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "PRODUCTION"),
            Self::Development => write!(f, "DEVELOPMENT"),
        }
    }
}

impl std::str::FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            _ => Err(format!(
                "Invalid runtime mode: '{s}'. Valid options are: production, development"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_mode_parsing() {
        assert_eq!("prod".parse::<RuntimeMode>(), Ok(RuntimeMode::Production));
        assert_eq!("Development".parse::<RuntimeMode>(), Ok(RuntimeMode::Development));
        assert!("staging".parse::<RuntimeMode>().is_err());
        assert!(RuntimeMode::default().is_development());
    }
}
