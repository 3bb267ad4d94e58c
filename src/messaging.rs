//! Messaging-platform seam.
//!
//! The engine only ever needs two operations from the chat platform: send a
//! direct message and wait (bounded) for the next one from a specific user.
//! Command routing, gateways and tokens live with the platform adapter, not
//! here.

use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::types::UserId;

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_direct_message(&self, user_id: UserId, text: &str) -> anyhow::Result<()>;

    /// Next private message from this exact user, or `None` on timeout.
    async fn await_next_direct_message(&self, user_id: UserId, timeout: Duration)
        -> Option<String>;
}

type InboundRx = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>;

struct UserChannel {
    tx: mpsc::UnboundedSender<String>,
    rx: InboundRx,
}

/// In-process messenger backed by per-user channels. Platform adapters feed
/// inbound messages through [`ChannelMessenger::push_inbound`]; outbound
/// messages are logged and recorded. Tests and local runs use this
/// directly.
#[derive(Default)]
pub struct ChannelMessenger {
    channels: Mutex<HashMap<UserId, UserChannel>>,
    outbound: Mutex<Vec<(UserId, String)>>,
}

impl ChannelMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound private message from `user_id` to whoever is
    /// waiting on it.
    pub fn push_inbound(&self, user_id: UserId, text: impl Into<String>) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.entry(user_id).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            UserChannel {
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            }
        });
        let _ = channel.tx.send(text.into());
    }

    /// Everything sent so far, in send order.
    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.outbound.lock().unwrap().clone()
    }

    fn receiver_for(&self, user_id: UserId) -> InboundRx {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.entry(user_id).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            UserChannel {
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            }
        });
        Arc::clone(&channel.rx)
    }
}

#[async_trait]
impl Messenger for ChannelMessenger {
    async fn send_direct_message(&self, user_id: UserId, text: &str) -> anyhow::Result<()> {
        info!("DM to {user_id}: {text}");
        self.outbound.lock().unwrap().push((user_id, text.to_string()));
        Ok(())
    }

    async fn await_next_direct_message(
        &self,
        user_id: UserId,
        timeout: Duration,
    ) -> Option<String> {
        let rx = self.receiver_for(user_id);
        let mut rx = rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }
}
