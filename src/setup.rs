//! Interactive credential collection.
//!
//! A setup session is a short private conversation: ask for the portal
//! email, ask for the password, persist the credential, then try one fetch
//! to verify it and seed the user's baseline snapshot. At most one session
//! per user may be live; the registry rejects, not queues, a second
//! attempt. Sessions are purely in-memory and die with the process.

use log::{info, warn};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::messaging::Messenger;
use crate::parser;
use crate::portal::PortalClient;
use crate::storage::GradeStore;
use crate::types::{Credential, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    AwaitingEmail,
    AwaitingPassword,
    Verifying,
    Done,
}

/// Terminal result of one setup conversation.
#[derive(Debug, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Credential stored and verified; baseline snapshot holds this many
    /// records.
    Completed(usize),
    /// Credential stored but the verification fetch failed; the user keeps
    /// the credential and polling will retry.
    CompletedUnverified,
    /// The user already has a stored credential.
    AlreadyRegistered,
    /// A session for this user is already live.
    Conflict,
    /// The user stopped replying within the window.
    TimedOut,
    /// Storage or messaging failed mid-session.
    Failed,
}

/// Process-wide registry of live setup sessions, keyed by user id. A slot
/// is held through an RAII guard, so it is released on every exit path.
#[derive(Default)]
pub struct SessionRegistry {
    active: Mutex<HashSet<UserId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session slot for `user_id`. `None` when a session is
    /// already live for this user.
    pub fn try_acquire(&self, user_id: UserId) -> Option<SessionGuard<'_>> {
        let mut active = self.active.lock().unwrap();
        if !active.insert(user_id) {
            return None;
        }
        Some(SessionGuard {
            registry: self,
            user_id,
        })
    }

    pub fn is_active(&self, user_id: UserId) -> bool {
        self.active.lock().unwrap().contains(&user_id)
    }
}

pub struct SessionGuard<'a> {
    registry: &'a SessionRegistry,
    user_id: UserId,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.registry.active.lock().unwrap().remove(&self.user_id);
    }
}

/// Run one setup conversation for `user_id`. Sends all user-facing prompts
/// and status messages itself; the returned outcome is for the caller's
/// bookkeeping.
pub async fn run_setup(
    store: &GradeStore,
    portal: &dyn PortalClient,
    messenger: &dyn Messenger,
    registry: &SessionRegistry,
    user_id: UserId,
    reply_timeout: Duration,
) -> SetupOutcome {
    match store.get_credential(user_id) {
        Ok(Some(_)) => {
            let _ = messenger
                .send_direct_message(
                    user_id,
                    "You already have credentials stored. Ask me to forget them before setting up again.",
                )
                .await;
            return SetupOutcome::AlreadyRegistered;
        }
        Ok(None) => {}
        Err(e) => {
            warn!("setup for user {user_id}: credential lookup failed: {e:#}");
            let _ = messenger
                .send_direct_message(user_id, "Something went wrong during setup. Please try again.")
                .await;
            return SetupOutcome::Failed;
        }
    }

    let Some(_guard) = registry.try_acquire(user_id) else {
        let _ = messenger
            .send_direct_message(
                user_id,
                "You're already in the setup process. Please finish it or wait a few minutes.",
            )
            .await;
        return SetupOutcome::Conflict;
    };

    // Slot held from here on; the guard releases it on every return path.
    let mut stage = SetupStage::AwaitingEmail;
    info!("setup session started for user {user_id}");

    if messenger
        .send_direct_message(
            user_id,
            "I'll need your portal login to check your grades.\nPlease enter your email for the student portal:",
        )
        .await
        .is_err()
    {
        return SetupOutcome::Failed;
    }

    let Some(email) = messenger.await_next_direct_message(user_id, reply_timeout).await else {
        let _ = messenger
            .send_direct_message(user_id, "Setup timed out. Ask me again when you're ready.")
            .await;
        info!("setup session for user {user_id} timed out at {stage:?}");
        return SetupOutcome::TimedOut;
    };

    stage = SetupStage::AwaitingPassword;
    if messenger
        .send_direct_message(user_id, "Now enter your password:")
        .await
        .is_err()
    {
        return SetupOutcome::Failed;
    }

    let Some(secret) = messenger.await_next_direct_message(user_id, reply_timeout).await else {
        let _ = messenger
            .send_direct_message(user_id, "Setup timed out. Ask me again when you're ready.")
            .await;
        info!("setup session for user {user_id} timed out at {stage:?}");
        return SetupOutcome::TimedOut;
    };

    stage = SetupStage::Verifying;
    info!("setup session for user {user_id} entering {stage:?}");
    let credential = Credential {
        user_id,
        email,
        secret,
    };
    if let Err(e) = store.save_credential(&credential) {
        warn!("setup for user {user_id}: failed to store credential: {e:#}");
        let _ = messenger
            .send_direct_message(user_id, "Something went wrong during setup. Please try again.")
            .await;
        return SetupOutcome::Failed;
    }

    let _ = messenger
        .send_direct_message(
            user_id,
            "Your credentials have been saved. Testing them now, please wait...",
        )
        .await;

    match portal
        .fetch_records(&credential.email, &credential.secret)
        .await
    {
        Ok(fragments) => {
            let records = parser::parse_fragments(&fragments);
            if let Err(e) = store.save_snapshot(user_id, &records) {
                warn!("setup for user {user_id}: failed to store baseline: {e:#}");
            }
            stage = SetupStage::Done;
            info!(
                "setup session for user {user_id} reached {stage:?} with {} records",
                records.len()
            );
            let text = if records.is_empty() {
                "Setup complete, but no grades were found. That's normal if nothing is posted yet."
                    .to_string()
            } else {
                format!(
                    "Your setup is complete! Found {} current grades. I'll message you when new ones come in.",
                    records.len()
                )
            };
            let _ = messenger.send_direct_message(user_id, &text).await;
            SetupOutcome::Completed(records.len())
        }
        Err(e) => {
            // Keep the credential: a flaky portal must not lock the user
            // out, polling will verify on the next cycle.
            warn!("setup for user {user_id}: verification fetch failed: {e}");
            let _ = messenger
                .send_direct_message(
                    user_id,
                    &format!(
                        "Your credentials are saved, but the test fetch failed ({e}). I'll keep trying on the regular schedule."
                    ),
                )
                .await;
            SetupOutcome::CompletedUnverified
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_is_exclusive() {
        let registry = SessionRegistry::new();
        let guard = registry.try_acquire(1);
        assert!(guard.is_some());
        assert!(registry.try_acquire(1).is_none());
        assert!(registry.try_acquire(2).is_some());
    }

    #[test]
    fn test_slot_released_on_drop() {
        let registry = SessionRegistry::new();
        {
            let _guard = registry.try_acquire(1).unwrap();
            assert!(registry.is_active(1));
        }
        assert!(!registry.is_active(1));
        assert!(registry.try_acquire(1).is_some());
    }
}
