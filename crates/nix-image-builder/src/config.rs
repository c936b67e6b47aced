//! Builder configuration
//!
//! Two layers:
//! - [`BuildConfig`] / [`DockerNixConfig`]: per-request configuration the host
//!   decodes from caller input and hands to the builder.
//! - [`BuilderSettings`]: process-level settings (binaries, load strategy),
//!   read from the environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::platform::resolve_system;
use crate::Result;

/// Builder id used in the `builder` tag of tagged configuration.
pub const DOCKER_NIX_BUILDER: &str = "docker:nix";

/// Default number of load attempts for [`LoadStrategy::Retry`].
pub const DEFAULT_LOAD_ATTEMPTS: u32 = 2;

/// Default delay between load attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default pre-read delay for [`LoadStrategy::PreDelay`], in milliseconds.
pub const DEFAULT_PRE_DELAY_MS: u64 = 100;

/// Caller-supplied configuration for the docker:nix builder.
///
/// Empty strings are treated the same as unset values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerNixConfig {
    /// Whether the host should use this builder at all
    pub enabled: bool,
    /// Flake attribute under `legacyPackages.<system>` (default `<plan>-image`)
    pub name: Option<String>,
    /// Nix system, e.g. `x86_64-linux` (default derived from the host CPU)
    pub system: Option<String>,
}

/// Configuration with every default filled in, fixed for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub name: String,
    pub system: String,
}

/// Default flake attribute for a plan.
pub fn default_image_name(plan: &str) -> String {
    format!("{plan}-image")
}

impl DockerNixConfig {
    /// Fill in the image name and Nix system.
    ///
    /// Fails with `UnsupportedArchitecture` when no system is configured and
    /// `host_arch` is not in the system table.
    pub fn resolve(&self, plan: &str, host_arch: &str) -> Result<ResolvedConfig> {
        let system = resolve_system(self.system.as_deref(), host_arch)?;
        let name = match self.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => default_image_name(plan),
        };
        Ok(ResolvedConfig { name, system })
    }
}

/// Configuration as handed across the plugin boundary.
///
/// Matching is exhaustive: the docker:nix builder accepts only
/// [`BuildConfig::DockerNix`] and rejects everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildConfig {
    DockerNix(DockerNixConfig),
    /// Configuration addressed to some other builder
    Other {
        builder: String,
        settings: serde_json::Value,
    },
}

impl BuildConfig {
    /// Name of the builder this configuration is addressed to.
    pub fn kind(&self) -> &str {
        match self {
            BuildConfig::DockerNix(_) => DOCKER_NIX_BUILDER,
            BuildConfig::Other { builder, .. } => builder,
        }
    }

    /// Decode caller JSON.
    ///
    /// The optional `builder` field selects the variant; an object without it
    /// is read as docker:nix configuration.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let builder = value
            .get("builder")
            .and_then(|b| b.as_str())
            .map(str::to_string);

        match builder.as_deref() {
            None | Some(DOCKER_NIX_BUILDER) => {
                let config: DockerNixConfig = serde_json::from_value(value)?;
                Ok(BuildConfig::DockerNix(config))
            }
            Some(other) => Ok(BuildConfig::Other {
                builder: other.to_string(),
                settings: value,
            }),
        }
    }

    /// Read and decode a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        let value: serde_json::Value = serde_json::from_slice(&content)?;
        Self::from_value(value)
    }
}

/// How the image archive is loaded into the runtime.
///
/// The delays mask timing races between the nix store and the runtime; they
/// are tunables, not measured constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Up to `attempts` tries, sleeping `delay_ms` between them
    Retry { attempts: u32, delay_ms: u64 },
    /// Sleep `delay_ms` once, then make a single attempt
    PreDelay { delay_ms: u64 },
}

impl Default for LoadStrategy {
    fn default() -> Self {
        LoadStrategy::Retry {
            attempts: DEFAULT_LOAD_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl LoadStrategy {
    /// Total attempts this strategy allows (at least one).
    pub fn max_attempts(&self) -> u32 {
        match self {
            LoadStrategy::Retry { attempts, .. } => (*attempts).max(1),
            LoadStrategy::PreDelay { .. } => 1,
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            LoadStrategy::Retry { delay_ms, .. } | LoadStrategy::PreDelay { delay_ms } => {
                Duration::from_millis(*delay_ms)
            }
        }
    }
}

/// Process-level builder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderSettings {
    /// Program used for `nix build`
    pub nix_program: String,
    /// Program used for `docker load` / `docker images` / `docker tag`
    pub docker_program: String,
    /// Load strategy
    pub load: LoadStrategy,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        BuilderSettings {
            nix_program: "nix".to_string(),
            docker_program: "docker".to_string(),
            load: LoadStrategy::default(),
        }
    }
}

impl BuilderSettings {
    /// Read settings from `NIX_IMAGE_*` environment variables.
    ///
    /// - `NIX_IMAGE_NIX_BIN`, `NIX_IMAGE_DOCKER_BIN`: program names
    /// - `NIX_IMAGE_LOAD_ATTEMPTS`, `NIX_IMAGE_LOAD_DELAY_MS`: retry strategy
    /// - `NIX_IMAGE_PRE_DELAY_MS`: selects the pre-delay strategy
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let nix_program = lookup("NIX_IMAGE_NIX_BIN").unwrap_or(defaults.nix_program);
        let docker_program = lookup("NIX_IMAGE_DOCKER_BIN").unwrap_or(defaults.docker_program);

        let load = match parse_var::<u64, _>(&lookup, "NIX_IMAGE_PRE_DELAY_MS") {
            Some(delay_ms) => LoadStrategy::PreDelay { delay_ms },
            None => LoadStrategy::Retry {
                attempts: parse_var(&lookup, "NIX_IMAGE_LOAD_ATTEMPTS")
                    .unwrap_or(DEFAULT_LOAD_ATTEMPTS),
                delay_ms: parse_var(&lookup, "NIX_IMAGE_LOAD_DELAY_MS")
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
            },
        };

        BuilderSettings {
            nix_program,
            docker_program,
            load,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuilderError;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_name_defaults_to_plan_image() {
        let config = DockerNixConfig::default();
        let resolved = config.resolve("mytest", "x86_64").unwrap();
        assert_eq!(resolved.name, "mytest-image");
        assert_eq!(resolved.system, "x86_64-linux");
    }

    #[test]
    fn test_empty_name_counts_as_unset() {
        let config = DockerNixConfig {
            name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.resolve("p", "aarch64").unwrap().name, "p-image");
    }

    #[test]
    fn test_explicit_values_kept() {
        let config = DockerNixConfig {
            enabled: true,
            name: Some("custom".to_string()),
            system: Some("aarch64-darwin".to_string()),
        };
        let resolved = config.resolve("p", "x86_64").unwrap();
        assert_eq!(resolved.name, "custom");
        assert_eq!(resolved.system, "aarch64-darwin");
    }

    #[test]
    fn test_resolve_rejects_unknown_arch() {
        let err = DockerNixConfig::default().resolve("p", "s390x").unwrap_err();
        assert!(matches!(err, BuilderError::UnsupportedArchitecture(_)));
    }

    #[test]
    fn test_from_value_untagged_is_docker_nix() {
        let config =
            BuildConfig::from_value(serde_json::json!({"enabled": true, "name": "img"})).unwrap();
        assert_eq!(
            config,
            BuildConfig::DockerNix(DockerNixConfig {
                enabled: true,
                name: Some("img".to_string()),
                system: None,
            })
        );
    }

    #[test]
    fn test_from_value_tagged_docker_nix() {
        let config = BuildConfig::from_value(serde_json::json!({
            "builder": "docker:nix",
            "system": "x86_64-linux"
        }))
        .unwrap();
        assert_eq!(config.kind(), DOCKER_NIX_BUILDER);
    }

    #[test]
    fn test_from_value_other_builder() {
        let config = BuildConfig::from_value(serde_json::json!({
            "builder": "docker:go",
            "go_version": "1.22"
        }))
        .unwrap();
        match config {
            BuildConfig::Other { builder, settings } => {
                assert_eq!(builder, "docker:go");
                assert_eq!(settings["go_version"], "1.22");
            }
            other => panic!("expected Other, got {:?}", other),
        }
    }

    #[test]
    fn test_from_value_wrong_shape() {
        let err = BuildConfig::from_value(serde_json::json!({"enabled": "yes"})).unwrap_err();
        assert!(matches!(err, BuilderError::Json(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("builder.json");
        std::fs::write(&path, r#"{"enabled": true, "system": "aarch64-linux"}"#).unwrap();

        let config = BuildConfig::from_file(&path).unwrap();
        match config {
            BuildConfig::DockerNix(cfg) => {
                assert!(cfg.enabled);
                assert_eq!(cfg.system.as_deref(), Some("aarch64-linux"));
            }
            other => panic!("expected DockerNix, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_default() {
        let settings = BuilderSettings::default();
        assert_eq!(settings.nix_program, "nix");
        assert_eq!(settings.docker_program, "docker");
        assert_eq!(
            settings.load,
            LoadStrategy::Retry {
                attempts: 2,
                delay_ms: 1_000
            }
        );
    }

    #[test]
    fn test_settings_from_lookup_retry() {
        let settings = BuilderSettings::from_lookup(lookup_from(&[
            ("NIX_IMAGE_NIX_BIN", "/run/current-system/sw/bin/nix"),
            ("NIX_IMAGE_LOAD_ATTEMPTS", "5"),
            ("NIX_IMAGE_LOAD_DELAY_MS", "250"),
        ]));
        assert_eq!(settings.nix_program, "/run/current-system/sw/bin/nix");
        assert_eq!(settings.docker_program, "docker");
        assert_eq!(
            settings.load,
            LoadStrategy::Retry {
                attempts: 5,
                delay_ms: 250
            }
        );
    }

    #[test]
    fn test_settings_pre_delay_selects_hardened_strategy() {
        let settings = BuilderSettings::from_lookup(lookup_from(&[
            ("NIX_IMAGE_PRE_DELAY_MS", "300"),
            ("NIX_IMAGE_LOAD_ATTEMPTS", "5"),
        ]));
        assert_eq!(settings.load, LoadStrategy::PreDelay { delay_ms: 300 });
    }

    #[test]
    fn test_settings_invalid_number_falls_back() {
        let settings =
            BuilderSettings::from_lookup(lookup_from(&[("NIX_IMAGE_LOAD_ATTEMPTS", "many")]));
        assert_eq!(settings.load.max_attempts(), DEFAULT_LOAD_ATTEMPTS);
    }

    #[test]
    fn test_strategy_bounds() {
        let zero = LoadStrategy::Retry {
            attempts: 0,
            delay_ms: 10,
        };
        assert_eq!(zero.max_attempts(), 1);
        assert_eq!(
            LoadStrategy::PreDelay { delay_ms: 100 }.delay(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_strategy_serde_shape() {
        let json = serde_json::to_value(LoadStrategy::PreDelay { delay_ms: 100 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"strategy": "pre_delay", "delay_ms": 100})
        );
    }
}
