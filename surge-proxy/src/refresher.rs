//! Priority snapshot refresher.
//!
//! Polls the configured lookup endpoint on a fixed interval and installs each
//! successfully fetched snapshot into the scheduler. A failed fetch keeps the
//! previous snapshot in place.

use reqwest::Client;
use serde_json::Value;
use surge_core::{PrioritySnapshot, Scheduler};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LookupConfig;
use crate::error::ProxyError;
use crate::metrics;

/// Periodic fetcher of the external priority snapshot
pub struct PriorityRefresher {
    client: Client,
    lookup: LookupConfig,
    scheduler: Scheduler,
}

impl PriorityRefresher {
    pub fn new(client: Client, lookup: LookupConfig, scheduler: Scheduler) -> Self {
        Self { client, lookup, scheduler }
    }

    /// Fetch once and install the result, returning the number of entries
    pub async fn refresh_once(&self) -> Result<usize, ProxyError> {
        let records: Vec<Value> = self
            .client
            .get(&self.lookup.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let LookupConfig { key_field, value_field, .. } = &self.lookup;
        let snapshot = PrioritySnapshot::from_records(&records, key_field, value_field);
        let entries = snapshot.len();
        if entries < records.len() {
            debug!(
                skipped = records.len() - entries,
                "Priority records without usable key or value skipped"
            );
        }
        self.scheduler.update_priorities(snapshot);
        Ok(entries)
    }

    /// Run the refresh loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                url = %self.lookup.url,
                interval_ms = self.lookup.refresh_ms,
                "Starting priority refresher"
            );
            let mut interval = tokio::time::interval(self.lookup.refresh_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                match self.refresh_once().await {
                    Ok(entries) => {
                        debug!(entries, "Priority snapshot refreshed");
                        metrics::record_priority_refresh(Some(entries));
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            url = %self.lookup.url,
                            "Priority refresh failed, keeping previous snapshot"
                        );
                        metrics::record_priority_refresh(None);
                    }
                }
            }
        })
    }
}
