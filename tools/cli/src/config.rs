//! Run configuration: JSON file, then command line overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use driveup_upload::{Backoff, UploaderConfig};

use crate::RunArgs;

const CONFIG_FILE: &str = "config.json";
const APP_DIR: &str = "driveup";

/// Everything a run needs besides the directory and folder name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// OAuth client secrets file.
    pub credentials: PathBuf,
    /// Authorized-user token file, created on first consent.
    pub token: PathBuf,
    /// Allow the browser consent flow.
    pub interactive: bool,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Upload behavior.
    #[serde(flatten)]
    pub uploader: UploaderConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            credentials: PathBuf::from("credentials.json"),
            token: PathBuf::from("token.json"),
            interactive: true,
            request_timeout_secs: 300,
            uploader: UploaderConfig::default(),
        }
    }
}

impl UploadConfig {
    /// Default location of the config file, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `explicit`, or from the default location when it exists,
    /// or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply command line flags on top of the file values.
    pub fn with_overrides(mut self, args: &RunArgs) -> Self {
        if let Some(path) = &args.credentials {
            self.credentials = path.clone();
        }
        if let Some(path) = &args.token {
            self.token = path.clone();
        }
        if let Some(parent) = &args.parent {
            self.uploader.parent_id = Some(parent.clone());
        }
        if args.no_browser {
            self.interactive = false;
        }
        if args.preserve_structure {
            self.uploader.preserve_structure = true;
        }
        if args.follow_links {
            self.uploader.walk.follow_links = true;
        }

        let retry = &mut self.uploader.retry;
        if let Some(max_attempts) = args.max_attempts {
            retry.max_attempts = max_attempts;
        }

        if args.fixed_delay {
            let delay_ms = args.retry_delay_ms.unwrap_or(match retry.backoff {
                Backoff::Fixed { delay_ms } => delay_ms,
                Backoff::Exponential { initial_ms, .. } => initial_ms,
            });
            retry.backoff = Backoff::Fixed { delay_ms };
        } else if let Some(delay_ms) = args.retry_delay_ms {
            match &mut retry.backoff {
                Backoff::Fixed { delay_ms: current } => *current = delay_ms,
                Backoff::Exponential { initial_ms, .. } => *initial_ms = delay_ms,
            }
        }

        self
    }

    /// Reject values that cannot work, before any network activity.
    pub fn validate(&self) -> Result<()> {
        self.uploader.validate()?;

        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }

        Ok(())
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use clap::Parser;
    use tempfile::TempDir;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["driveup", "run", "--directory", "/tmp/photos"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
        }
    }

    #[test]
    fn test_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.credentials, PathBuf::from("credentials.json"));
        assert_eq!(config.token, PathBuf::from("token.json"));
        assert!(config.interactive);
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.uploader.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "token": "/secrets/token.json",
                "preserve_structure": true,
                "walk": {"follow_links": true},
                "retry": {"max_attempts": 5, "backoff": {"strategy": "fixed", "delay_ms": 250}}
            }"#,
        )
        .unwrap();

        let config = UploadConfig::load(Some(&path)).unwrap();
        assert_eq!(config.token, PathBuf::from("/secrets/token.json"));
        assert_eq!(config.credentials, PathBuf::from("credentials.json"));
        assert!(config.uploader.preserve_structure);
        assert!(config.uploader.walk.follow_links);
        assert_eq!(config.uploader.retry.max_attempts, 5);
        assert_eq!(
            config.uploader.retry.backoff,
            Backoff::Fixed { delay_ms: 250 }
        );
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(UploadConfig::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = UploadConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn test_flags_override_file_values() {
        let args = run_args(&[
            "--credentials",
            "/c.json",
            "--token",
            "/t.json",
            "--parent",
            "folder-1",
            "--max-attempts",
            "7",
            "--no-browser",
            "--preserve-structure",
            "--follow-links",
        ]);

        let config = UploadConfig::default().with_overrides(&args);
        assert_eq!(config.credentials, PathBuf::from("/c.json"));
        assert_eq!(config.token, PathBuf::from("/t.json"));
        assert_eq!(config.uploader.parent_id.as_deref(), Some("folder-1"));
        assert_eq!(config.uploader.retry.max_attempts, 7);
        assert!(!config.interactive);
        assert!(config.uploader.preserve_structure);
        assert!(config.uploader.walk.follow_links);
    }

    #[test]
    fn test_retry_delay_flags() {
        let exponential = UploadConfig::default().with_overrides(&run_args(&["--retry-delay-ms", "500"]));
        assert!(matches!(
            exponential.uploader.retry.backoff,
            Backoff::Exponential { initial_ms: 500, .. }
        ));

        let fixed = UploadConfig::default()
            .with_overrides(&run_args(&["--fixed-delay", "--retry-delay-ms", "200"]));
        assert_eq!(fixed.uploader.retry.backoff, Backoff::Fixed { delay_ms: 200 });

        let fixed_default = UploadConfig::default().with_overrides(&run_args(&["--fixed-delay"]));
        assert_eq!(
            fixed_default.uploader.retry.backoff,
            Backoff::Fixed { delay_ms: 1_000 }
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero = UploadConfig::default().with_overrides(&run_args(&["--max-attempts", "0"]));
        assert!(zero.validate().is_err());

        let no_timeout = UploadConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(no_timeout.validate().is_err());
    }
}
