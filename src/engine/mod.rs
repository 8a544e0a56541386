//! Domain block/allow engine.
//!
//! A [`Blocklist`] owns two [`SuffixTable`]s, one for blocked names and one for
//! allowed names. Queries are classified against snapshots of both tables while
//! reloads build replacement sets off to the side and swap them in.

mod loader;
mod matcher;
mod policy;
mod scheduler;
mod table;

pub use loader::{ListLoader, StandardLoader};
pub use matcher::{matches, normalize, ROOT};
pub use policy::{classify, Classification, Decision, LOCALHOST};
pub use scheduler::{ReloadHandle, ReloadTrigger, Reloadable, SchedulerState};
pub use table::{DomainSet, SuffixTable};

use crate::config::BlocklistConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// One filter stage: its immutable settings plus the live block and allow tables.
pub struct Blocklist {
    config: BlocklistConfig,
    block: SuffixTable,
    allow: SuffixTable,
    loader: Arc<dyn ListLoader>,
}

impl Blocklist {
    /// Creates an engine with empty tables. Call [`Blocklist::reload`] to populate them.
    pub fn new(config: BlocklistConfig, loader: Arc<dyn ListLoader>) -> Self {
        Self {
            config,
            block: SuffixTable::new(),
            allow: SuffixTable::new(),
            loader,
        }
    }

    pub fn config(&self) -> &BlocklistConfig {
        &self.config
    }

    pub fn block_table(&self) -> &SuffixTable {
        &self.block
    }

    pub fn allow_table(&self) -> &SuffixTable {
        &self.allow
    }

    /// Classifies an already normalized name.
    pub fn classify(&self, name: &str) -> Classification {
        classify(name, &self.block, &self.allow)
    }

    /// Rebuilds both tables from their sources.
    ///
    /// Both lists are fetched and parsed before either table is touched, so a
    /// failure leaves the installed tables exactly as they were.
    pub async fn reload(&self) -> Result<()> {
        let bootstrap = self.config.bootstrap_dns;

        let block: DomainSet = self
            .loader
            .load(&self.config.location, bootstrap)
            .await
            .with_context(|| format!("Failed to load blocklist {}", self.config.location))?
            .into_iter()
            .collect();

        let allow: Option<DomainSet> = match &self.config.allowlist {
            Some(location) => Some(
                self.loader
                    .load(location, bootstrap)
                    .await
                    .with_context(|| format!("Failed to load allowlist {}", location))?
                    .into_iter()
                    .collect(),
            ),
            None => None,
        };

        info!(
            "Loaded blocklist {} with {} entries",
            self.config.location,
            block.len()
        );
        self.block.replace(block);

        if let Some(allow) = allow {
            info!("Loaded allowlist with {} entries", allow.len());
            self.allow.replace(allow);
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Reloadable for Blocklist {
    async fn reload(&self) -> Result<()> {
        Blocklist::reload(self).await
    }

    fn name(&self) -> &str {
        &self.config.location
    }
}
