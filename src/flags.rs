//! Feature flags
//!
//! Process-wide cache of boolean flags, replaced wholesale by `refresh`.
//! A key missing from the cache reads as enabled.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Flag gating automatic external payouts
pub const PAYOUTS_FLAG: &str = "payouts";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlagError {
    #[error("Flag source unavailable: {0}")]
    SourceUnavailable(String),
}

#[async_trait]
pub trait FlagSource: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, bool>, FlagError>;
}

/// Flags held in memory, editable at runtime
#[derive(Debug, Default)]
pub struct StaticFlagSource {
    flags: RwLock<HashMap<String, bool>>,
}

impl StaticFlagSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, enabled: bool) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), enabled);
    }
}

#[async_trait]
impl FlagSource for StaticFlagSource {
    async fn load(&self) -> Result<HashMap<String, bool>, FlagError> {
        Ok(self
            .flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

pub struct FeatureFlags {
    source: Arc<dyn FlagSource>,
    cache: RwLock<HashMap<String, bool>>,
}

impl FeatureFlags {
    pub fn new(source: Arc<dyn FlagSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(true)
    }

    /// Reload every flag from the source. On failure the old values stay.
    pub async fn refresh(&self) -> Result<usize, FlagError> {
        let flags = match self.source.load().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(error = %e, "Flag refresh failed, keeping cached values");
                return Err(e);
            }
        };

        let count = flags.len();
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = flags;
        info!(count, "Feature flags refreshed");
        Ok(count)
    }

    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
