use std::{env, path::PathBuf, str::FromStr};

use url::Url;

use crate::error::Error;

pub const DEFAULT_MAX_VIDEO_UPLOAD_BYTES: u64 = 1 << 30;
pub const DEFAULT_MAX_THUMBNAIL_UPLOAD_BYTES: u64 = 10 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailStorage {
    Disk,
    Memory,
}

impl FromStr for ThumbnailStorage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(Self::Disk),
            "memory" => Ok(Self::Memory),
            _ => Err(Error::ConfigError(format!(
                "THUMBNAIL_STORAGE must be 'disk' or 'memory', got '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3 compatible storage, `None` for AWS.
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub database_url: String,
    pub max_db_connections: usize,
    pub s3: S3Config,
    pub assets_root: PathBuf,
    pub thumbnail_storage: ThumbnailStorage,
    pub api_base_url: Url,
    pub staging_dir: PathBuf,
    pub max_video_upload_bytes: u64,
    pub max_thumbnail_upload_bytes: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl Config {
    /// Reads the configuration from environment variables, expects `.env` to be loaded already.
    pub fn from_env() -> Result<Self, Error> {
        let port = parse_var::<u16>("API_PORT")?;
        let cert_path = env::var("CERT_PATH").ok();
        let key_path = env::var("KEY_PATH").ok();

        let api_base_url = match env::var("API_BASE_URL") {
            Ok(url) => Url::parse(&url)
                .map_err(|e| Error::ConfigError(format!("API_BASE_URL is not valid: {e}")))?,
            Err(_) => {
                let protocol = if cert_path.is_some() { "https" } else { "http" };
                Url::parse(&format!("{protocol}://localhost:{port}/"))
                    .map_err(|e| Error::InvalidUrlError(e.to_string()))?
            }
        };

        Ok(Config {
            port,
            jwt_secret: require_var("JWT_SECRET")?,
            database_url: require_var("DATABASE_URL")?,
            max_db_connections: parse_var_or("MAX_DB_CONNECTIONS", 25)?,
            s3: S3Config {
                bucket: require_var("S3_BUCKET")?,
                region: require_var("S3_REGION")?,
                endpoint: env::var("S3_ENDPOINT").ok(),
                access_key: require_var("AWS_ACCESS_KEY_ID")?,
                secret_key: require_var("AWS_SECRET_ACCESS_KEY")?,
            },
            assets_root: env::var("ASSETS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets")),
            thumbnail_storage: parse_var_or("THUMBNAIL_STORAGE", ThumbnailStorage::Disk)?,
            api_base_url,
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            max_video_upload_bytes: parse_var_or(
                "MAX_VIDEO_UPLOAD_BYTES",
                DEFAULT_MAX_VIDEO_UPLOAD_BYTES,
            )?,
            max_thumbnail_upload_bytes: parse_var_or(
                "MAX_THUMBNAIL_UPLOAD_BYTES",
                DEFAULT_MAX_THUMBNAIL_UPLOAD_BYTES,
            )?,
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| String::from("ffmpeg")),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| String::from("ffprobe")),
            cert_path,
            key_path,
        })
    }
}

fn require_var(name: &str) -> Result<String, Error> {
    env::var(name)
        .map_err(|_| Error::ConfigError(format!("Missing environment variable {name} must be set")))
}

fn parse_var<T: FromStr>(name: &str) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    let value = require_var(name)?;
    value
        .parse::<T>()
        .map_err(|e| Error::ConfigError(format!("{name} is not valid ('{value}'): {e}")))
}

fn parse_var_or<T: FromStr>(name: &str, default: T) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| Error::ConfigError(format!("{name} is not valid ('{value}'): {e}"))),
        Err(_) => Ok(default),
    }
}
