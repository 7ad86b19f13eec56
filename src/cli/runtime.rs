use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{resolve_config_path, AppConfig};

pub const LOCAL_ENV_FILE: &str = "config/local.env";

/// Load `KEY=VALUE` lines from `config/local.env` into the process
/// environment. Variables that are already set win over the file.
pub fn load_local_env_overrides() {
    load_env_file(Path::new(LOCAL_ENV_FILE));
}

fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (key, value) in parse_env_lines(&contents) {
                if env::var(&key).is_ok() {
                    continue;
                }
                env::set_var(key, value);
            }
            info!(path = %path.display(), "loaded environment overrides");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read environment overrides");
        }
    }
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = idx + 1, "invalid local.env entry; skipping");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        pairs.push((key.to_string(), unescape_value(value.trim())));
    }
    pairs
}

fn unescape_value(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

/// `RUST_LOG` wins when set; otherwise `level`, or debug with `--debug`.
/// Logs go to stderr so command output on stdout stays parseable.
pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    /// False when the file was missing and defaults were used.
    pub from_file: bool,
}

/// Read the configuration file (defaults when it does not exist) and apply
/// environment overrides on top.
pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = resolve_config_path(config_path.map(PathBuf::as_path));

    let (mut config, from_file) = if fs::try_exists(&config_path).await.unwrap_or(false) {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config = AppConfig::from_yaml_str(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        info!("Loaded configuration from: {}", config_path.display());
        (config, true)
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        (AppConfig::default(), false)
    };

    config.apply_env_overrides();
    Ok(LoadedConfig {
        config,
        path: config_path,
        from_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_env_lines() {
        let pairs = parse_env_lines(
            "# comment\n\nWEBPILOT_MODEL=gpt-4o-mini\nexport WEBPILOT_API_KEY = \"sk-a\\nb\"\nQUOTED='x y'\nbroken line\n=novalue\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("WEBPILOT_MODEL".to_string(), "gpt-4o-mini".to_string()),
                ("WEBPILOT_API_KEY".to_string(), "sk-a\nb".to_string()),
                ("QUOTED".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn unescape_leaves_bare_values_alone() {
        assert_eq!(unescape_value("plain"), "plain");
        assert_eq!(unescape_value("\""), "\"");
        assert_eq!(unescape_value("\"a\\tb\""), "a\tb");
    }

    #[test]
    fn existing_variables_win_over_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.env");
        stdfs::write(
            &path,
            "WEBPILOT_TEST_PRESET=from-file\nWEBPILOT_TEST_FRESH=from-file\n",
        )
        .unwrap();
        env::set_var("WEBPILOT_TEST_PRESET", "from-env");
        env::remove_var("WEBPILOT_TEST_FRESH");

        load_env_file(&path);

        assert_eq!(env::var("WEBPILOT_TEST_PRESET").unwrap(), "from-env");
        assert_eq!(env::var("WEBPILOT_TEST_FRESH").unwrap(), "from-file");
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert!(!loaded.from_file);
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.agent.max_steps, 100);
    }

    #[tokio::test]
    async fn reports_parse_errors_with_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        stdfs::write(&path, "agent: [not, a, map]\n").unwrap();
        let err = load_config(Some(&path)).await.err().unwrap();
        assert!(format!("{err:#}").contains("broken.yaml"));
    }
}
