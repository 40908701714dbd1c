//! Render execution on the blocking pool
//!
//! Renders are CPU bound, so the scheduler runs each one with
//! `spawn_blocking` and bounds how many are admitted at once instead of
//! owning its own threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use folio_cache::config::{env_usize, ConfigError};
use folio_cache::RenderKey;
use folio_render::{RenderError, RenderResult, RenderedImage};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;

/// Callback that produces the image for a key.
///
/// The scheduler invokes this on the blocking pool. The token is cancelled
/// once every waiter for the key has left; executors should check it before
/// expensive steps and return [`RenderError::Cancelled`] if set.
pub type RenderExecutor =
    Arc<dyn Fn(&RenderKey, &CancellationToken) -> RenderResult<RenderedImage> + Send + Sync>;

/// Default bound on renders executing at once
pub const DEFAULT_MAX_CONCURRENT_RENDERS: usize = 3;

/// Configuration for the render scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of renders executing at once.
    /// Default: 3.
    pub max_concurrent_renders: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent_renders: DEFAULT_MAX_CONCURRENT_RENDERS }
    }
}

impl SchedulerConfig {
    pub fn new(max_concurrent_renders: usize) -> Self {
        Self { max_concurrent_renders }
    }

    /// Load from `FOLIO_MAX_CONCURRENT_RENDERS` on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = env_usize("FOLIO_MAX_CONCURRENT_RENDERS")? {
            config.max_concurrent_renders = value;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_renders == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_renders".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Run one render, converting a panic in the executor into a decode failure.
pub(crate) fn run_render(
    executor: &RenderExecutor,
    key: &RenderKey,
    token: &CancellationToken,
) -> RenderResult<RenderedImage> {
    if token.is_cancelled() {
        return Err(RenderError::Cancelled);
    }
    match panic::catch_unwind(AssertUnwindSafe(|| executor(key, token))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%key, %message, "render panicked");
            Err(RenderError::DecodeFailure(format!("render panicked: {message}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_render::{QualityMode, RgbaImage};
    use serial_test::serial;

    fn key() -> RenderKey {
        RenderKey::new("doc", 3, QualityMode::Export)
    }

    fn executor(
        f: impl Fn(&RenderKey, &CancellationToken) -> RenderResult<RenderedImage> + Send + Sync + 'static,
    ) -> RenderExecutor {
        Arc::new(f)
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent_renders, 3);
        assert!(config.validate().is_ok());
        assert!(SchedulerConfig::new(0).validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let previous = std::env::var("FOLIO_MAX_CONCURRENT_RENDERS").ok();
        std::env::set_var("FOLIO_MAX_CONCURRENT_RENDERS", "8");
        let config = SchedulerConfig::from_env();
        match previous {
            Some(v) => std::env::set_var("FOLIO_MAX_CONCURRENT_RENDERS", v),
            None => std::env::remove_var("FOLIO_MAX_CONCURRENT_RENDERS"),
        }
        assert_eq!(config.unwrap().max_concurrent_renders, 8);
    }

    #[test]
    fn test_run_render_success() {
        let executor = executor(|_, _| Ok(RenderedImage::new(RgbaImage::new(4, 4))));
        let image = run_render(&executor, &key(), &CancellationToken::new()).unwrap();
        assert_eq!(image.width(), 4);
    }

    #[test]
    fn test_run_render_skips_cancelled() {
        let executor = executor(|_, _| panic!("must not run"));
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(run_render(&executor, &key(), &token), Err(RenderError::Cancelled)));
    }

    #[test]
    fn test_run_render_converts_panic() {
        let executor = executor(|_, _| panic!("corrupt stream"));
        match run_render(&executor, &key(), &CancellationToken::new()) {
            Err(RenderError::DecodeFailure(message)) => assert!(message.contains("corrupt stream")),
            other => panic!("expected decode failure, got {other:?}"),
        }
    }
}
