//! Polling engine.
//!
//! Ties the stores, the portal driver and the messenger together. The
//! scheduler ticks on a fixed interval; each tick processes every
//! registered user in its own task with its own browser session, so one
//! user's slow or failing fetch never delays or aborts anyone else's.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::Config;
use crate::diff;
use crate::messaging::Messenger;
use crate::parser;
use crate::portal::PortalClient;
use crate::setup::{self, SessionRegistry, SetupOutcome};
use crate::storage::GradeStore;
use crate::types::UserId;

/// Result of one per-user poll cycle.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Fetch failed or came back empty; snapshot untouched.
    Skipped,
    /// Fetch succeeded, nothing new; snapshot refreshed.
    NoChanges,
    /// This many new records were reported; snapshot refreshed.
    Notified(usize),
}

pub struct Engine {
    store: GradeStore,
    portal: Arc<dyn PortalClient>,
    messenger: Arc<dyn Messenger>,
    registry: SessionRegistry,
    config: Config,
}

impl Engine {
    pub fn new(
        store: GradeStore,
        portal: Arc<dyn PortalClient>,
        messenger: Arc<dyn Messenger>,
        config: Config,
    ) -> Self {
        Self {
            store,
            portal,
            messenger,
            registry: SessionRegistry::new(),
            config,
        }
    }

    pub fn store(&self) -> &GradeStore {
        &self.store
    }

    /// Run the polling loop forever.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        loop {
            ticker.tick().await;
            Arc::clone(&self).poll_all_users().await;
        }
    }

    /// One full poll cycle over every registered user. Per-user failures
    /// are logged and contained.
    pub async fn poll_all_users(self: Arc<Self>) {
        let user_ids = match self.store.list_user_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("poll cycle aborted, could not list users: {e:#}");
                return;
            }
        };
        debug!("poll cycle over {} users", user_ids.len());

        let handles: Vec<_> = user_ids
            .into_iter()
            .map(|user_id| {
                let engine = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = engine.poll_user(user_id).await {
                        warn!("poll failed for user {user_id}: {e:#}");
                    }
                })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("poll task panicked: {e}");
            }
        }
    }

    /// Poll one user: fetch, parse, diff against the stored snapshot,
    /// notify the deltas, then overwrite the snapshot. The snapshot is
    /// written even when delivery fails, so a transient messaging error
    /// cannot cause the same records to be re-reported next cycle.
    pub async fn poll_user(&self, user_id: UserId) -> Result<PollOutcome> {
        let Some(credential) = self.store.get_credential(user_id)? else {
            return Ok(PollOutcome::Skipped);
        };

        let fragments = match self
            .portal
            .fetch_records(&credential.email, &credential.secret)
            .await
        {
            Ok(fragments) => fragments,
            Err(e) => {
                // Transient by policy: skip this cycle, retry on the next.
                debug!("fetch failed for user {user_id}: {e}");
                return Ok(PollOutcome::Skipped);
            }
        };

        let current = parser::parse_fragments(&fragments);
        if current.is_empty() {
            // A page that rendered empty must not wipe the baseline.
            debug!("fetch for user {user_id} yielded no records, skipping");
            return Ok(PollOutcome::Skipped);
        }

        let previous = self
            .store
            .get_snapshot(user_id)?
            .map(|s| s.records)
            .unwrap_or_default();

        let fresh = diff::new_records(&previous, &current);
        let outcome = if fresh.is_empty() {
            PollOutcome::NoChanges
        } else {
            let lines: Vec<String> = fresh.iter().map(|r| r.to_line()).collect();
            let text = format!("New grades came in:\n{}", lines.join("\n"));
            if let Err(e) = self.messenger.send_direct_message(user_id, &text).await {
                warn!("failed to deliver {} new grades to user {user_id}: {e:#}", fresh.len());
            } else {
                info!("reported {} new grades to user {user_id}", fresh.len());
            }
            PollOutcome::Notified(fresh.len())
        };

        self.store
            .save_snapshot(user_id, &current)
            .context("failed to store snapshot")?;
        Ok(outcome)
    }

    /// Start an interactive credential setup conversation for this user.
    pub async fn begin_setup(&self, user_id: UserId) -> SetupOutcome {
        setup::run_setup(
            &self.store,
            self.portal.as_ref(),
            self.messenger.as_ref(),
            &self.registry,
            user_id,
            self.config.reply_timeout(),
        )
        .await
    }

    /// On-demand full grade listing. Unlike the silent polling path, an
    /// explicit request gets a short diagnostic when the fetch fails. Does
    /// not touch the snapshot.
    pub async fn grades_text(&self, user_id: UserId) -> String {
        let credential = match self.store.get_credential(user_id) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return "You haven't set up your credentials yet. Run setup first.".to_string()
            }
            Err(e) => {
                warn!("credential lookup failed for user {user_id}: {e:#}");
                return "Something went wrong. Please try again later.".to_string();
            }
        };

        match self
            .portal
            .fetch_records(&credential.email, &credential.secret)
            .await
        {
            Ok(fragments) => {
                let records = parser::parse_fragments(&fragments);
                if records.is_empty() {
                    return "No grades found. Please check later.".to_string();
                }
                let mut lines: Vec<String> = records.iter().map(|r| r.to_line()).collect();
                lines.sort();
                format!("Your grades are:\n{}", lines.join("\n"))
            }
            Err(e) => format!("Couldn't fetch your grades right now ({e}). Please try again later."),
        }
    }

    /// On-demand per-class term averages.
    pub async fn averages_text(&self, user_id: UserId) -> String {
        let credential = match self.store.get_credential(user_id) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return "You haven't set up your credentials yet. Run setup first.".to_string()
            }
            Err(e) => {
                warn!("credential lookup failed for user {user_id}: {e:#}");
                return "Something went wrong. Please try again later.".to_string();
            }
        };

        match self
            .portal
            .fetch_averages(&credential.email, &credential.secret)
            .await
        {
            Ok(averages) if averages.is_empty() => {
                "No averages found. Please check later.".to_string()
            }
            Ok(averages) => {
                let lines: Vec<String> = averages.iter().map(|a| a.to_line()).collect();
                format!("Your averages are:\n{}", lines.join("\n"))
            }
            Err(e) => {
                format!("Couldn't fetch your averages right now ({e}). Please try again later.")
            }
        }
    }

    /// Delete everything stored for this user.
    pub fn forget(&self, user_id: UserId) -> Result<String> {
        if self.store.get_credential(user_id)?.is_none() {
            return Ok("You don't have any credentials stored.".to_string());
        }
        self.store
            .delete_user(user_id)
            .context("failed to delete user data")?;
        info!("deleted stored data for user {user_id}");
        Ok("Your credentials and grade history have been deleted.".to_string())
    }
}
