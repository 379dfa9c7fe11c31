use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::BackfillError;

pub const DEFAULT_CONFIG_FILE: &str = "aip-backfill.json";
pub const API_KEY_ENV: &str = "AIP_BACKFILL_API_KEY";
pub const DB_PASSWORD_ENV: &str = "AIP_BACKFILL_DB_PASSWORD";
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub storage_service: StorageServiceEntry,
    pub database: DatabaseEntry,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub delete_temporary_files: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageServiceEntry {
    pub url: String,
    pub user: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseEntry {
    Mysql {
        host: String,
        #[serde(default)]
        port: Option<u16>,
        user: String,
        #[serde(default)]
        password: Option<String>,
        name: String,
        #[serde(default)]
        culture: Option<String>,
    },
    Sqlite {
        path: String,
        #[serde(default)]
        culture: Option<String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub database_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageServiceConfig {
    pub base_url: String,
    pub user: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Mysql(MysqlTarget),
    Sqlite(Utf8PathBuf),
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub target: DatabaseTarget,
    pub culture: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub storage_service: StorageServiceConfig,
    pub database: DatabaseConfig,
    pub cache_dir: Utf8PathBuf,
    pub delete_temporary_files: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BackfillError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(BackfillError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BackfillError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BackfillError::ConfigParse(err.to_string()))?;

        let overrides = ConfigOverrides {
            api_key: env_value(API_KEY_ENV),
            database_password: env_value(DB_PASSWORD_ENV),
        };
        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, BackfillError> {
        let base_url = normalize_base_url(&config.storage_service.url)?;

        let user = config.storage_service.user.trim().to_string();
        if user.is_empty() {
            return Err(BackfillError::InvalidConfig(
                "storage_service.user must not be empty".to_string(),
            ));
        }

        let api_key = overrides
            .api_key
            .or(config.storage_service.api_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                BackfillError::InvalidConfig("storage service API key is missing".to_string())
            })?;

        let database = resolve_database(config.database, overrides.database_password)?;

        let cache_dir = match config.cache_dir {
            Some(dir) if !dir.trim().is_empty() => Utf8PathBuf::from(dir.trim()),
            _ => default_cache_dir()?,
        };

        Ok(ResolvedConfig {
            storage_service: StorageServiceConfig {
                base_url,
                user,
                api_key,
                timeout: Duration::from_secs(config.storage_service.timeout_secs.unwrap_or(60)),
            },
            database,
            cache_dir,
            delete_temporary_files: config.delete_temporary_files,
        })
    }
}

fn resolve_database(
    entry: DatabaseEntry,
    password_override: Option<String>,
) -> Result<DatabaseConfig, BackfillError> {
    let (target, culture) = match entry {
        DatabaseEntry::Mysql {
            host,
            port,
            user,
            password,
            name,
            culture,
        } => {
            let host = required(&host, "database.host")?;
            let user = required(&user, "database.user")?;
            let name = required(&name, "database.name")?;
            let target = MysqlTarget {
                host,
                port: port.unwrap_or(DEFAULT_MYSQL_PORT),
                user,
                password: password_override.or(password),
                name,
            };
            (DatabaseTarget::Mysql(target), culture)
        }
        DatabaseEntry::Sqlite { path, culture } => {
            let path = required(&path, "database.path")?;
            (DatabaseTarget::Sqlite(Utf8PathBuf::from(path)), culture)
        }
    };
    Ok(DatabaseConfig {
        target,
        culture: culture
            .filter(|culture| !culture.trim().is_empty())
            .unwrap_or_else(|| "en".to_string()),
    })
}

fn required(value: &str, field: &str) -> Result<String, BackfillError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BackfillError::InvalidConfig(format!(
            "{field} must not be empty"
        )));
    }
    Ok(value.to_string())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn normalize_base_url(url: &str) -> Result<String, BackfillError> {
    let trimmed = url.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(BackfillError::InvalidConfig(format!(
            "storage service URL must be http(s): {trimmed}"
        )));
    }
    if trimmed.ends_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/"))
    }
}

pub fn default_cache_dir() -> Result<Utf8PathBuf, BackfillError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("aip-backfill").join("mets")).ok()
        })
        .ok_or_else(|| BackfillError::Filesystem("unable to resolve cache directory".to_string()))
}
