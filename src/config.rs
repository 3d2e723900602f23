use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::capture::upload::{StorageConfig, DEFAULT_VIDEO_BUCKET};
use crate::location::Fix;
use crate::models::alert::AlertContext;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub storage: StorageConfig,
    pub context: AlertContext,
    pub gpsd_addr: Option<String>,
    pub fixed_position: Option<Fix>,
    pub media_source: Option<PathBuf>,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "postgres".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "postgres".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let storage = StorageConfig {
            base_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| "http://localhost:54321".to_string()),
            service_key: env::var("SUPABASE_SERVICE_KEY").unwrap_or_default(),
            bucket: env::var("SOS_VIDEO_BUCKET")
                .unwrap_or_else(|_| DEFAULT_VIDEO_BUCKET.to_string()),
        };

        let context = AlertContext {
            team_id: parse_optional("SOS_TEAM_ID", optional_var("SOS_TEAM_ID"))?,
            team_name: optional_var("SOS_TEAM_NAME"),
            event_id: parse_optional("SOS_EVENT_ID", optional_var("SOS_EVENT_ID"))?,
        };

        let position = fixed_position(
            parse_optional("SOS_LATITUDE", optional_var("SOS_LATITUDE"))?,
            parse_optional("SOS_LONGITUDE", optional_var("SOS_LONGITUDE"))?,
        )?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            storage,
            context,
            gpsd_addr: optional_var("GPSD_ADDR"),
            fixed_position: position,
            media_source: optional_var("SOS_MEDIA_SOURCE").map(PathBuf::from),
            log_level,
        })
    }
}

/// Unset and blank variables are both treated as absent.
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_optional<T>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", name, v))
        })
        .transpose()
}

fn fixed_position(latitude: Option<f64>, longitude: Option<f64>) -> Result<Option<Fix>> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Ok(Some(Fix {
            latitude,
            longitude,
        })),
        (None, None) => Ok(None),
        _ => anyhow::bail!("SOS_LATITUDE and SOS_LONGITUDE must be set together"),
    }
}
