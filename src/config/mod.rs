// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

/// Prefix for structured overrides, e.g. `STOREFRONT__DATABASE__MAX_CONNECTIONS=20`.
pub const ENV_PREFIX: &str = "STOREFRONT";

/// Plain variables the service has always honoured, mapped onto config keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DATABASE_URL", "database.url"),
    ("REDIS_URL", "cache.url"),
    ("REDIS_HOST", "cache.host"),
    ("REDIS_PORT", "cache.port"),
    ("REDIS_DB", "cache.db"),
    ("REDIS_PASSWORD", "cache.password"),
    ("PORT", "server.port"),
];

/// Load configuration from an optional file (YAML or JSON) layered under
/// the environment.
pub async fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config> {
    let file = match path {
        Some(path) => {
            let path = path.as_ref();
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Some((contents, format_for(path)))
        }
        None => None,
    };

    let config = build_config(file, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn format_for(path: &Path) -> FileFormat {
    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        _ => FileFormat::Json,
    }
}

fn build_config<F>(file: Option<(String, FileFormat)>, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = config::Config::builder();

    if let Some((contents, format)) = file {
        builder = builder.add_source(File::from_str(&contents, format));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    builder = apply_legacy_env(builder, &lookup)?;

    builder
        .build()
        .context("Failed to assemble configuration")?
        .try_deserialize::<Config>()
        .context("Failed to parse configuration")
}

fn apply_legacy_env<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: &F,
) -> Result<ConfigBuilder<DefaultState>>
where
    F: Fn(&str) -> Option<String>,
{
    for &(var, key) in LEGACY_ENV {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            builder = builder
                .set_override(key, value)
                .with_context(|| format!("Invalid value for {var}"))?;
        }
    }

    if let Some(origins) = lookup("CORS_ORIGINS").filter(|v| !v.is_empty()) {
        let origins: Vec<String> = origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        builder = builder
            .set_override("server.cors_origins", origins)
            .context("Invalid value for CORS_ORIGINS")?;
    }

    Ok(builder)
}
