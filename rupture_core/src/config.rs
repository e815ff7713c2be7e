use crate::executor::CommandExecutorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Stop dispatching after this many cases. `None` runs until interrupted.
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

pub fn default_max_workers() -> usize {
    4
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_iterations: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    #[serde(default = "default_target_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Where per-case input files are staged. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

pub fn default_target_path() -> PathBuf {
    PathBuf::from("./objdump")
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: default_target_path(),
            timeout_ms: None,
            scratch_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_dir")]
    pub dir: PathBuf,
}

pub fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./corpus")
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: default_corpus_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CrashesConfig {
    #[serde(default = "default_crash_dir")]
    pub dir: PathBuf,
}

pub fn default_crash_dir() -> PathBuf {
    PathBuf::from("./crashes")
}

impl Default for CrashesConfig {
    fn default() -> Self {
        Self {
            dir: default_crash_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RuptureConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub crashes: CrashesConfig,
}

impl RuptureConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Rejects values that parse but cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fuzzer.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "fuzzer.max-workers must be at least 1".to_string(),
            ));
        }
        if self.target.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "target.timeout-ms must be positive; omit it to wait forever".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.target.timeout_ms.map(Duration::from_millis)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.target
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn executor_config(&self) -> CommandExecutorConfig {
        CommandExecutorConfig {
            target: self.target.path.clone(),
            scratch_dir: self.scratch_dir(),
            timeout: self.timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_config_uses_defaults() {
        let config: RuptureConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuptureConfig::default());
        assert_eq!(config.fuzzer.max_workers, 4);
        assert_eq!(config.fuzzer.max_iterations, None);
        assert_eq!(config.target.path, PathBuf::from("./objdump"));
        assert_eq!(config.corpus.dir, PathBuf::from("./corpus"));
        assert_eq!(config.crashes.dir, PathBuf::from("./crashes"));
        assert_eq!(config.timeout(), None);
        assert_eq!(config.scratch_dir(), std::env::temp_dir());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_config_is_parsed() {
        let config: RuptureConfig = toml::from_str(
            r#"
            [fuzzer]
            max-workers = 8
            max-iterations = 1000

            [target]
            path = "/opt/bin/objdump"
            timeout-ms = 250
            scratch-dir = "/var/tmp/rupture"

            [corpus]
            dir = "seeds"

            [crashes]
            dir = "out/crashes"
            "#,
        )
        .unwrap();

        assert_eq!(config.fuzzer.max_workers, 8);
        assert_eq!(config.fuzzer.max_iterations, Some(1000));
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));

        let exec_config = config.executor_config();
        assert_eq!(exec_config.target, PathBuf::from("/opt/bin/objdump"));
        assert_eq!(exec_config.scratch_dir, PathBuf::from("/var/tmp/rupture"));
        assert_eq!(config.corpus.dir, PathBuf::from("seeds"));
        assert_eq!(config.crashes.dir, PathBuf::from("out/crashes"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<RuptureConfig, _> = toml::from_str(
            r#"
            [fuzzer]
            threads = 2
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn zero_workers_and_zero_timeout_are_invalid() {
        let mut config = RuptureConfig::default();
        config.fuzzer.max_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RuptureConfig::default();
        config.target.timeout_ms = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file_reads_and_reports_errors() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("config.toml");
        std::fs::write(&good, "[fuzzer]\nmax-workers = 2\n").unwrap();
        let config = RuptureConfig::load_from_file(&good).unwrap();
        assert_eq!(config.fuzzer.max_workers, 2);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[fuzzer\n").unwrap();
        assert!(matches!(
            RuptureConfig::load_from_file(&bad),
            Err(ConfigError::Parse { .. })
        ));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            RuptureConfig::load_from_file(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
