use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::AppError;
use crate::services::upload::DEFAULT_MAX_TOTAL_CHUNKS;

/// Where finished assets and renditions are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    Local,
    S3,
}

impl FromStr for BlobBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(BlobBackend::Local),
            "s3" => Ok(BlobBackend::S3),
            other => Err(AppError::InvalidArgument(format!(
                "unknown BLOB_BACKEND '{}' (expected 'local' or 's3')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket_name: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub staging_dir: PathBuf,
    pub work_dir: PathBuf,
    pub blob_backend: BlobBackend,
    pub blob_dir: PathBuf,
    pub s3: Option<S3Settings>,
    pub upload_session_ttl: Duration,
    pub cleanup_interval: Duration,
    pub max_chunk_bytes: usize,
    pub max_total_chunks: u32,
    /// Upper bound on concurrently encoding qualities of one job.
    pub max_parallel_encodes: usize,
    /// Length of one encode unit; stop requests are honored between units.
    pub segment_secs: u64,
    /// Interval recommended to status pollers.
    pub poll_interval: Duration,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: "sqlite://data/media.db?mode=rwc".to_string(),
            staging_dir: PathBuf::from("data/staging"),
            work_dir: PathBuf::from("data/work"),
            blob_backend: BlobBackend::Local,
            blob_dir: PathBuf::from("data/blobs"),
            s3: None,
            upload_session_ttl: Duration::from_secs(6 * 60 * 60),
            cleanup_interval: Duration::from_secs(300),
            max_chunk_bytes: 64 * 1024 * 1024,
            max_total_chunks: DEFAULT_MAX_TOTAL_CHUNKS,
            max_parallel_encodes: 3,
            segment_secs: 6,
            poll_interval: Duration::from_millis(1500),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let blob_backend = match lookup("BLOB_BACKEND") {
            Some(v) => v.parse()?,
            None => defaults.blob_backend,
        };

        let s3 = match lookup("S3_BUCKET_NAME") {
            Some(bucket_name) => Some(S3Settings {
                bucket_name,
                region: lookup("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: lookup("S3_ENDPOINT"),
                access_key_id: lookup("AWS_ACCESS_KEY_ID"),
                secret_access_key: lookup("AWS_SECRET_ACCESS_KEY"),
            }),
            None => None,
        };

        if blob_backend == BlobBackend::S3 && s3.is_none() {
            return Err(AppError::InvalidArgument(
                "S3_BUCKET_NAME must be set when BLOB_BACKEND=s3".to_string(),
            ));
        }

        let max_parallel_encodes: usize =
            parse_or(&lookup, "MAX_PARALLEL_ENCODES", defaults.max_parallel_encodes)?;
        let segment_secs: u64 = parse_or(&lookup, "SEGMENT_SECS", defaults.segment_secs)?;
        if max_parallel_encodes == 0 || segment_secs == 0 {
            return Err(AppError::InvalidArgument(
                "MAX_PARALLEL_ENCODES and SEGMENT_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            staging_dir: lookup("STAGING_DIR").map(PathBuf::from).unwrap_or(defaults.staging_dir),
            work_dir: lookup("WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
            blob_backend,
            blob_dir: lookup("BLOB_DIR").map(PathBuf::from).unwrap_or(defaults.blob_dir),
            s3,
            upload_session_ttl: Duration::from_secs(parse_or(
                &lookup,
                "UPLOAD_SESSION_TTL_SECS",
                defaults.upload_session_ttl.as_secs(),
            )?),
            cleanup_interval: Duration::from_secs(parse_or(
                &lookup,
                "CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval.as_secs(),
            )?),
            max_chunk_bytes: parse_or(&lookup, "MAX_CHUNK_BYTES", defaults.max_chunk_bytes)?,
            max_total_chunks: parse_or(&lookup, "MAX_TOTAL_CHUNKS", defaults.max_total_chunks)?,
            max_parallel_encodes,
            segment_secs,
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            ffmpeg_bin: lookup("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: lookup("FFPROBE_BIN").unwrap_or(defaults.ffprobe_bin),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::InvalidArgument(format!("{} has an invalid value: '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Process-wide config, set once by the binary.
pub fn init_config(config: Config) -> &'static Config {
    CONFIG.get_or_init(|| config)
}
