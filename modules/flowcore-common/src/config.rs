use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Where serialized session output is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStorageMode {
    /// Inline in `flow_sessions.output`.
    Db,
    /// One object per session in external storage, URL in `flow_sessions.output_url`.
    Storage,
}

impl FromStr for SessionStorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "db" => Ok(SessionStorageMode::Db),
            "storage" | "s3" => Ok(SessionStorageMode::Storage),
            other => anyhow::bail!("unknown session storage mode: {other}"),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Session output
    pub session_storage: SessionStorageMode,
    pub sessions_bucket: String,

    // Post-commit hooks
    pub post_commit_timeout_per_scene: Duration,
    pub post_commit_scene_timeout: Duration,

    // Batching
    pub insert_batch_size: usize,
    pub interrupt_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            session_storage: SessionStorageMode::Db,
            sessions_bucket: "flowcore-sessions".to_string(),
            post_commit_timeout_per_scene: Duration::from_secs(60),
            post_commit_scene_timeout: Duration::from_secs(60),
            insert_batch_size: 1000,
            interrupt_batch_size: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            session_storage: match env::var("FLOWCORE_SESSION_STORAGE") {
                Ok(v) => v.parse()?,
                Err(_) => defaults.session_storage,
            },
            sessions_bucket: env::var("FLOWCORE_SESSIONS_BUCKET")
                .unwrap_or(defaults.sessions_bucket),
            post_commit_timeout_per_scene: secs_env(
                "FLOWCORE_POST_COMMIT_TIMEOUT_PER_SCENE_SECS",
                defaults.post_commit_timeout_per_scene,
            )?,
            post_commit_scene_timeout: secs_env(
                "FLOWCORE_POST_COMMIT_SCENE_TIMEOUT_SECS",
                defaults.post_commit_scene_timeout,
            )?,
            insert_batch_size: parsed_env("FLOWCORE_INSERT_BATCH_SIZE", defaults.insert_batch_size)?,
            interrupt_batch_size: parsed_env(
                "FLOWCORE_INTERRUPT_BATCH_SIZE",
                defaults.interrupt_batch_size,
            )?,
        };

        config.log_summary();
        Ok(config)
    }

    /// Timeout for one batched post-commit transaction covering `scenes` scenes.
    pub fn post_commit_batch_timeout(&self, scenes: usize) -> Duration {
        let scenes = u32::try_from(scenes.max(1)).unwrap_or(u32::MAX);
        self.post_commit_timeout_per_scene.saturating_mul(scenes)
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  SESSION_STORAGE: {:?}", self.session_storage);
        tracing::info!("  SESSIONS_BUCKET: {}", self.sessions_bucket);
        tracing::info!(
            "  POST_COMMIT_TIMEOUT_PER_SCENE: {}s",
            self.post_commit_timeout_per_scene.as_secs()
        );
        tracing::info!(
            "  POST_COMMIT_SCENE_TIMEOUT: {}s",
            self.post_commit_scene_timeout.as_secs()
        );
        tracing::info!("  INSERT_BATCH_SIZE: {}", self.insert_batch_size);
        tracing::info!("  INTERRUPT_BATCH_SIZE: {}", self.interrupt_batch_size);
    }
}

fn parsed_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{key} must be a number, got {v:?}")),
        Err(_) => Ok(default),
    }
}

fn secs_env(key: &str, default: Duration) -> Result<Duration> {
    let secs = parsed_env(key, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}
