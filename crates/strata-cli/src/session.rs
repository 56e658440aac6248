use std::sync::Arc;

use anyhow::{Context, Result, bail};
use strata_cache::config::loader;
use strata_cache::{KeySpace, RedisTier, StrataConfig, TieredCache, connect_redis};

use crate::cli::Cli;

/// Resolved configuration plus a live connection to the shared tier.
pub struct Session {
    pub config: StrataConfig,
    pub redis: RedisTier,
    pub keys: KeySpace,
}

impl Session {
    pub fn load_config(cli: &Cli) -> Result<StrataConfig> {
        let mut config = loader::load_config(cli.config.as_deref())
            .map_err(anyhow::Error::msg)
            .context("Failed to load configuration")?;
        if let Some(namespace) = &cli.namespace {
            config.cache.namespace = namespace.clone();
        }
        if let Some(url) = &cli.redis_url {
            config.redis.url = url.clone();
        }
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub async fn open(config: StrataConfig) -> Result<Self> {
        // Every command talks to the shared tier, so it is required here
        // regardless of redis.enabled.
        let mut redis_config = config.redis.clone();
        redis_config.enabled = true;

        let Some(redis) = connect_redis(&redis_config).await else {
            bail!("Cannot connect to Redis at {}", redis_config.url);
        };

        Ok(Self {
            keys: KeySpace::new(config.cache.namespace.clone()),
            config,
            redis,
        })
    }

    /// Build a cache facade over the shared tier that does not listen for
    /// invalidations; the CLI only issues them.
    pub async fn cache(&self) -> Result<TieredCache> {
        let cache = TieredCache::builder(self.config.cache.clone())
            .name("cli")
            .remote(Arc::new(self.redis.clone()))
            .subscribe(false)
            .build()
            .await?;
        Ok(cache)
    }
}
