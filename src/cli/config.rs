use std::path::Path;

use crate::cli::context::CliContext;
use crate::cli::output::{render_structured, OutputFormat};
use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::{Map, Value as JsonValue};
use tokio::fs;
use tracing::info;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (API keys masked)
    Show,

    /// Set a value in the configuration file, e.g. `agent.max_steps 20`
    Set {
        /// Dotted configuration key
        key: String,

        /// Value; parsed as JSON when possible, otherwise taken as a string
        value: String,
    },

    /// Print a value from the configuration file
    Get {
        /// Dotted configuration key
        key: String,
    },

    /// Write a configuration file with every default spelled out
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration file and environment overrides
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path().to_path_buf();
    match args.action {
        ConfigAction::Show => {
            let shown = ctx.config().redacted();
            match render_structured(&shown, ctx.output())? {
                Some(rendered) => println!("{rendered}"),
                None => {
                    println!("Current configuration ({}):", path.display());
                    println!("{}", shown.to_yaml()?);
                }
            }
        }
        ConfigAction::Set { key, value } => {
            set_config_value(&path, &key, &value).await?;
            info!("Updated configuration key {}", key);
            println!("Saved configuration to {}", path.display());
        }
        ConfigAction::Get { key } => {
            let value = get_config_value(&path, &key).await?;
            match ctx.output() {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&value)?),
                _ => print!("{}", serde_yaml::to_string(&value)?),
            }
        }
        ConfigAction::Init { force } => {
            if !force && fs::try_exists(&path).await? {
                bail!(
                    "{} already exists; pass --force to overwrite it",
                    path.display()
                );
            }
            save_config_file(&path, &AppConfig::default()).await?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Validate => {
            let exists = fs::try_exists(&path).await?;
            let mut config = load_config_file(&path).await?;
            config.apply_env_overrides();
            config
                .validate()
                .with_context(|| format!("validating {}", path.display()))?;
            if exists {
                println!("Configuration file {} is valid", path.display());
            } else {
                println!(
                    "No configuration file at {}; defaults are valid",
                    path.display()
                );
            }
        }
    }

    Ok(())
}

async fn set_config_value(path: &Path, key: &str, raw: &str) -> Result<AppConfig> {
    let config = load_config_file(path).await?;
    let mut json = serde_json::to_value(&config)?;
    let segments = split_key(key)?;
    set_json_value(&mut json, &segments, parse_cli_value(raw))?;
    let updated: AppConfig = serde_json::from_value(json)
        .with_context(|| format!("{key} cannot be set to {raw}"))?;
    updated.validate()?;
    save_config_file(path, &updated).await?;
    Ok(updated)
}

async fn get_config_value(path: &Path, key: &str) -> Result<JsonValue> {
    let config = load_config_file(path).await?;
    let json = serde_json::to_value(&config)?;
    let segments = split_key(key)?;
    match get_json_value(&json, &segments) {
        Some(value) => Ok(value.clone()),
        None => bail!("{} not found in configuration", key),
    }
}

async fn load_config_file(path: &Path) -> Result<AppConfig> {
    if fs::try_exists(path).await? {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config =
            AppConfig::from_yaml_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    } else {
        Ok(AppConfig::default())
    }
}

async fn save_config_file(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let serialized = config.to_yaml()?;
    fs::write(path, serialized)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn parse_cli_value(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        bail!("configuration key cannot be empty");
    }
    Ok(segments)
}

fn set_json_value(target: &mut JsonValue, path: &[&str], value: JsonValue) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        bail!("configuration key cannot be empty");
    };
    let mut current = target;
    for segment in parents {
        current = ensure_object(current, segment)?
            .entry((*segment).to_string())
            .or_insert(JsonValue::Null);
    }
    ensure_object(current, last)?.insert((*last).to_string(), value);
    Ok(())
}

fn ensure_object<'a>(
    value: &'a mut JsonValue,
    segment: &str,
) -> Result<&'a mut Map<String, JsonValue>> {
    if value.is_null() {
        *value = JsonValue::Object(Map::new());
    }
    match value {
        JsonValue::Object(map) => Ok(map),
        _ => bail!(
            "{} resolves to a non-object value; cannot assign nested configuration",
            segment
        ),
    }
}

fn get_json_value<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path {
        match current {
            JsonValue::Object(map) => {
                current = map.get(*segment)?;
            }
            _ => return None,
        }
    }
    Some(current)
}
