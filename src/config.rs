use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

use crate::window_manager::ClosePolicy;

/// Environment variable naming the main script when no argument is given.
pub const MAIN_SCRIPT_ENV: &str = "NATIVE_HOST_MAIN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing main script. Set NATIVE_HOST_MAIN or pass path as first argument.")]
    MissingScript,
}

/// CLI arguments
#[derive(Parser, Debug, Default)]
#[command(name = "native-host", version)]
#[command(about = "Run an application's main script with native windows, trays and dialogs")]
pub struct Cli {
    /// Main script; falls back to NATIVE_HOST_MAIN
    pub script: Option<PathBuf>,

    /// Use the in-memory platform even when a native one is available
    #[arg(long, env = "NATIVE_HOST_HEADLESS")]
    pub headless: bool,

    /// Keep running after the last window closes
    #[arg(long)]
    pub keep_alive: bool,

    /// Log filter directive, e.g. `native_host=debug`
    #[arg(long, value_name = "FILTER")]
    pub log: Option<String>,
}

/// Resolved startup settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub script: PathBuf,
    pub headless: bool,
    pub close_policy: ClosePolicy,
    pub log_filter: Option<String>,
}

impl HostConfig {
    /// Combine parsed arguments with the value of [`MAIN_SCRIPT_ENV`], which
    /// the caller reads.
    pub fn from_cli(cli: Cli, env_script: Option<PathBuf>) -> Result<Self, ConfigError> {
        let script = resolve_script_path(cli.script.as_deref(), env_script.as_deref())
            .ok_or(ConfigError::MissingScript)?;
        let close_policy = if cli.keep_alive {
            ClosePolicy::KeepRunning
        } else {
            ClosePolicy::QuitWhenLastWindowCloses
        };
        Ok(Self {
            script,
            headless: cli.headless,
            close_policy,
            log_filter: cli.log,
        })
    }
}

/// First existing file among the argument and the environment value, made
/// absolute.
pub fn resolve_script_path(argument: Option<&Path>, env: Option<&Path>) -> Option<PathBuf> {
    [argument, env]
        .into_iter()
        .flatten()
        .filter(|candidate| !candidate.as_os_str().is_empty())
        .find(|candidate| candidate.is_file())
        .map(|found| std::fs::canonicalize(found).unwrap_or_else(|_| found.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script_in(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "console.log('hi')").unwrap();
        path
    }

    #[test]
    fn argument_wins_when_it_exists() {
        let dir = TempDir::new().unwrap();
        let arg = script_in(&dir, "arg.js");
        let env = script_in(&dir, "env.js");
        let resolved = resolve_script_path(Some(&arg), Some(&env)).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "arg.js");
        assert!(resolved.is_absolute());
    }

    #[test]
    fn missing_argument_falls_back_to_environment() {
        let dir = TempDir::new().unwrap();
        let env = script_in(&dir, "env.js");
        let missing = dir.path().join("nope.js");
        let resolved = resolve_script_path(Some(&missing), Some(&env)).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "env.js");
    }

    #[test]
    fn directories_and_empty_values_are_not_scripts() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_script_path(Some(dir.path()), Some(Path::new(""))), None);
        assert_eq!(resolve_script_path(None, None), None);
    }

    #[test]
    fn missing_script_reports_the_startup_message() {
        let err = HostConfig::from_cli(Cli::default(), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing main script. Set NATIVE_HOST_MAIN or pass path as first argument."
        );
    }

    #[test]
    fn cli_flags_map_onto_the_config() {
        let dir = TempDir::new().unwrap();
        let script = script_in(&dir, "main.js");
        let args: Vec<std::ffi::OsString> = vec![
            "native-host".into(),
            script.into_os_string(),
            "--keep-alive".into(),
            "--headless".into(),
            "--log".into(),
            "debug".into(),
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        let config = HostConfig::from_cli(cli, None).unwrap();
        assert!(config.headless);
        assert_eq!(config.close_policy, ClosePolicy::KeepRunning);
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn closing_the_last_window_quits_by_default() {
        let dir = TempDir::new().unwrap();
        let script = script_in(&dir, "main.js");
        let config = HostConfig::from_cli(
            Cli {
                script: Some(script),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(config.close_policy, ClosePolicy::QuitWhenLastWindowCloses);
    }
}
