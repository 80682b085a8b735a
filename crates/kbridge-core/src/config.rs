//! Configuration resolution for kbridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/kbridge/settings.json)
//! 3. Project config (.kbridge/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete kbridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            session: SessionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which kernel to launch and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Runtime-name tag identifying the kernel (e.g. `groovy`).
    pub name: String,
    /// Command line used to spawn the kernel process.
    pub argv: Vec<String>,
    /// Extra environment variables for the kernel process.
    pub env: HashMap<String, String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "groovy".to_string(),
            argv: vec!["groovy-kernel".to_string(), "--stdio".to_string()],
            env: HashMap::new(),
        }
    }
}

/// How the engine handle decides that a freshly spawned kernel is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// Use whatever the engine advertises.
    #[default]
    Auto,
    /// Probe with `kernel_info_request` and fail on timeout.
    KernelInfo,
    /// Wait a fixed settle period and carry on.
    Settle,
}

/// Per-session relay tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-event wait while draining kernel output.
    pub drain_timeout_ms: u64,
    /// Upper bound on the readiness probe.
    pub startup_timeout_secs: u64,
    /// Upper bound on waiting for a shell reply. `None` waits until the
    /// kernel replies or its process goes away.
    pub reply_timeout_secs: Option<u64>,
    pub readiness: ReadinessMode,
    /// Settle period for [`ReadinessMode::Settle`].
    pub settle_ms: u64,
    /// Forwarded as `allow_stdin` in execute requests.
    pub allow_stdin: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 1000,
            startup_timeout_secs: 60,
            reply_timeout_secs: Some(300),
            readiness: ReadinessMode::Auto,
            settle_ms: 500,
            allow_stdin: true,
        }
    }
}

impl SessionConfig {
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_secs.map(Duration::from_secs)
    }

    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".kbridge").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Load defaults overlaid with a single explicit settings file, then apply
/// environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let mut config = Config::default();
    let file = load_config_file(path)?;
    merge_config(&mut config, file);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".kbridge").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/kbridge/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("kbridge").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.kernel.name = overlay.kernel.name;
    if !overlay.kernel.argv.is_empty() {
        base.kernel.argv = overlay.kernel.argv;
    }
    base.kernel.env.extend(overlay.kernel.env);

    base.session = overlay.session;
    base.log_level = overlay.log_level;
}

/// Apply `KBRIDGE_*` overrides. `lookup` is the variable source so callers
/// (and tests) need not touch the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("KBRIDGE_KERNEL_NAME") {
        config.kernel.name = val;
    }
    if let Some(val) = lookup("KBRIDGE_KERNEL_CMD") {
        let argv: Vec<String> = val.split_whitespace().map(String::from).collect();
        if !argv.is_empty() {
            config.kernel.argv = argv;
        }
    }
    if let Some(n) = lookup("KBRIDGE_DRAIN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.session.drain_timeout_ms = n;
    }
    if let Some(val) = lookup("KBRIDGE_REPLY_TIMEOUT_SECS") {
        if val == "none" {
            config.session.reply_timeout_secs = None;
        } else if let Ok(n) = val.parse() {
            config.session.reply_timeout_secs = Some(n);
        }
    }
    if let Some(val) = lookup("KBRIDGE_LOG_LEVEL") {
        config.log_level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_drain_timeout_is_one_second() {
        let config = Config::default();
        assert_eq!(config.session.drain_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn default_kernel_is_groovy() {
        let config = Config::default();
        assert_eq!(config.kernel.name, "groovy");
        assert_eq!(config.session.readiness, ReadinessMode::Auto);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"kernel":{"name":"scala","argv":["scala-kernel"]},"log_level":"debug"}"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.kernel.name, "scala");
        assert_eq!(config.kernel.argv, vec!["scala-kernel".to_string()]);
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".kbridge")).unwrap();
        std::fs::write(
            dir.path().join(".kbridge").join("settings.json"),
            r#"{"kernel":{"name":"clojure","argv":["clj-kernel"]},
                "session":{"drain_timeout_ms":250,"reply_timeout_secs":null,
                           "readiness":"settle","allow_stdin":false}}"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.kernel.name, "clojure");
        assert_eq!(config.session.drain_timeout_ms, 250);
        assert_eq!(config.session.reply_timeout(), None);
        assert_eq!(config.session.readiness, ReadinessMode::Settle);
        assert!(!config.session.allow_stdin);
        assert_eq!(config.session.settle_ms, 500);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let vars: HashMap<&str, &str> = [
            ("KBRIDGE_KERNEL_CMD", "java -jar kernel.jar"),
            ("KBRIDGE_DRAIN_TIMEOUT_MS", "50"),
            ("KBRIDGE_REPLY_TIMEOUT_SECS", "none"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.kernel.argv, vec!["java", "-jar", "kernel.jar"]);
        assert_eq!(config.session.drain_timeout_ms, 50);
        assert_eq!(config.session.reply_timeout_secs, None);
        assert_eq!(config.kernel.name, "groovy");
    }

    #[test]
    fn unparsable_env_value_is_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| {
            (k == "KBRIDGE_DRAIN_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert_eq!(config.session.drain_timeout_ms, 1000);
    }
}
