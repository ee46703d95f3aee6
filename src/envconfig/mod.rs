use std::env;
use std::path::PathBuf;

pub const APP_ROOT_VAR: &str = "RANKMODEL_APP_ROOT";
pub const LOG_VAR: &str = "RANKMODEL_LOG";

pub struct EnvConfig {
    /// Application package root holding `models/` and the generated directories.
    pub app_root: PathBuf,
    /// A `tracing` filter directive.
    pub log: String,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            app_root: env::var(APP_ROOT_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            log: env::var(LOG_VAR)
                .ok()
                .filter(|filter| !filter.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Command line values win over the environment.
    pub fn with_overrides(mut self, app_root: Option<PathBuf>, log: Option<String>) -> Self {
        if let Some(app_root) = app_root {
            self.app_root = app_root;
        }
        if let Some(log) = log {
            self.log = log;
        }
        self
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win() {
        let config = EnvConfig {
            app_root: PathBuf::from("."),
            log: "info".into(),
        }
        .with_overrides(Some(PathBuf::from("/app")), None);
        assert_eq!(config.app_root, PathBuf::from("/app"));
        assert_eq!(config.log, "info");
    }
}
