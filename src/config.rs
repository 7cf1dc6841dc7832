use anyhow::{anyhow, Result};
use std::str::FromStr;
use url::Url;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystem {
    Local,
    Hadoop,
}

impl FromStr for FileSystem {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(FileSystem::Local),
            "hadoop" | "hdfs" | "webhdfs" => Ok(FileSystem::Hadoop),
            other => Err(anyhow!("FILE_SYSTEM must be 'local' or 'hadoop', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_address: String,
    /// Root prefix for stored objects inside the backend
    pub parent_directory: String,
    pub tmp_directory: String,
    pub log_directory: String,
    pub max_file_size_mb: u64,
    pub allowed_file_types: Vec<String>,
    pub file_system: FileSystem,
    pub local_storage_root: String,
    pub hadoop_namenode_url: Option<String>,
    pub hadoop_username: Option<String>,
    pub hadoop_base_path: Option<String>,
    pub hadoop_max_retries: u32,
    pub backend_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let max_file_size_mb = parse_or(get("MAX_FILE_SIZE_MB"), "MAX_FILE_SIZE_MB", 50u64)?;
        if max_file_size_mb == 0 {
            return Err(anyhow!("MAX_FILE_SIZE_MB must be greater than zero"));
        }
        if max_file_size_mb.checked_mul(BYTES_PER_MB).is_none() {
            return Err(anyhow!(
                "MAX_FILE_SIZE_MB is too large: {} MB does not fit in a byte count",
                max_file_size_mb
            ));
        }

        let allowed_file_types: Vec<String> = string_or("ALLOWED_FILE_TYPES", "pdf,jpg,jpeg,png")
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if allowed_file_types.is_empty() {
            return Err(anyhow!("ALLOWED_FILE_TYPES must list at least one extension"));
        }

        let file_system = match get("FILE_SYSTEM") {
            Some(value) => value.parse()?,
            None => FileSystem::Local,
        };

        let hadoop_namenode_url = get("HADOOP_NAMENODE_URL");
        if let Some(url) = &hadoop_namenode_url {
            Url::parse(url).map_err(|e| anyhow!("HADOOP_NAMENODE_URL '{}' is not a valid URL: {}", url, e))?;
        }

        let hadoop_base_path = get("HADOOP_BASE_PATH");
        if let Some(base) = &hadoop_base_path {
            if !base.starts_with('/') {
                return Err(anyhow!("HADOOP_BASE_PATH must be absolute, got '{}'", base));
            }
        }

        let backend_timeout_seconds = parse_or(get("BACKEND_TIMEOUT_SECONDS"), "BACKEND_TIMEOUT_SECONDS", 30u64)?;
        if backend_timeout_seconds == 0 {
            return Err(anyhow!("BACKEND_TIMEOUT_SECONDS must be greater than zero"));
        }

        Ok(Config {
            database_url: string_or("DATABASE_URL", "sqlite://document_manager.db"),
            server_address: string_or("SERVER_ADDRESS", "0.0.0.0:8000"),
            parent_directory: string_or("PARENT_DIRECTORY", "uploads"),
            tmp_directory: string_or("TMP_DIRECTORY", "tmp"),
            log_directory: string_or("LOG_DIRECTORY", "logs"),
            max_file_size_mb,
            allowed_file_types,
            file_system,
            local_storage_root: string_or("LOCAL_STORAGE_ROOT", "."),
            hadoop_namenode_url,
            hadoop_username: get("HADOOP_USERNAME"),
            hadoop_base_path,
            hadoop_max_retries: parse_or(get("HADOOP_MAX_RETRIES"), "HADOOP_MAX_RETRIES", 3u32)?,
            backend_timeout_seconds,
        })
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}
