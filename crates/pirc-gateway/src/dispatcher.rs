use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::ws::Utf8Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use pirc_db::Database;
use pirc_db::models::NewMessage;
use pirc_types::events::{ClientFrame, SYSTEM_CHANNEL, ServerFrame};
use pirc_types::models::MessageKind;

use crate::registry::{ConnectionId, FrameSender, Identity, Recipient, SessionRegistry};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("{field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("persistence failed: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// Routes inbound chat events to live connections and writes their durable
/// side effects through to the store.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: SessionRegistry,
    db: Arc<Database>,
    /// Held across a nickname-changing registry mutation and its presence
    /// write, so the stored online flags follow registry order.
    presence: Mutex<()>,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                db,
                presence: Mutex::new(()),
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Register a new connection, mark its nickname online, then greet it.
    /// The welcome goes to this connection only.
    pub async fn connect(&self, tx: FrameSender, requested_nick: Option<String>) -> Identity {
        let presence = self.inner.presence.lock().await;
        let identity = self.inner.registry.register(tx.clone(), requested_nick).await;

        let nickname = identity.nickname.clone();
        if let Err(e) = self.store(move |db| db.set_user_online(&nickname, true)).await {
            warn!("Failed to mark {} online: {}", identity.nickname, e);
        }
        drop(presence);

        let welcome = Recipient { id: identity.id, tx };
        self.deliver(std::slice::from_ref(&welcome), &ServerFrame::welcome());

        identity
    }

    /// Apply one client event. Delivery to selected recipients happens even
    /// when the durable write fails; the failure is still returned.
    pub async fn handle(&self, id: ConnectionId, frame: ClientFrame) -> Result<(), DispatchError> {
        match frame {
            ClientFrame::Nick { content } => self.rename(id, &content).await,
            ClientFrame::Join { channel } => self.join(id, &channel).await,
            ClientFrame::Part { channel } => self.part(id, &channel).await,
            ClientFrame::Message { channel, content } => {
                self.message(id, &channel, &content).await
            }
        }
    }

    /// Transport-close path. Safe to call more than once; only the first
    /// call emits notices.
    pub async fn disconnect(&self, id: ConnectionId) {
        let _presence = self.inner.presence.lock().await;
        let Some(departed) = self.inner.registry.unregister(id).await else {
            return;
        };

        for (channel, remaining) in &departed.channels {
            self.deliver(remaining, &ServerFrame::disconnected(channel, &departed.nickname));
        }
        info!(
            "{} ({}) left {} channel(s) on disconnect",
            departed.nickname,
            id,
            departed.channels.len()
        );

        if departed.nickname_still_live {
            return;
        }
        let nickname = departed.nickname.clone();
        if let Err(e) = self.store(move |db| db.set_user_online(&nickname, false)).await {
            warn!("Failed to mark {} offline: {}", departed.nickname, e);
        }
    }

    /// Send a frame to a single connection, best-effort.
    pub async fn send_to(&self, id: ConnectionId, frame: &ServerFrame) -> bool {
        match self.inner.registry.sender(id).await {
            Some(tx) => self.deliver(&[Recipient { id, tx }], frame) == 1,
            None => false,
        }
    }

    async fn rename(&self, id: ConnectionId, content: &str) -> Result<(), DispatchError> {
        let nick = required("nick", content)?.to_string();
        let _presence = self.inner.presence.lock().await;
        let renamed = self
            .inner
            .registry
            .rename(id, &nick)
            .await
            .ok_or(DispatchError::UnknownConnection(id))?;

        info!("{} is now known as {} ({})", renamed.old, nick, id);
        self.deliver(&renamed.everyone, &ServerFrame::nick_change(&renamed.old, &nick));

        let old = renamed.old;
        let retire_old = !renamed.old_still_live && old != nick;
        self.store(move |db| {
            db.set_user_online(&nick, true)?;
            if retire_old {
                db.set_user_online(&old, false)?;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn join(&self, id: ConnectionId, channel: &str) -> Result<(), DispatchError> {
        let channel = channel_name(channel)?.to_string();
        let Some(change) = self.inner.registry.join(id, &channel).await else {
            debug!("{} already in {} (or gone), ignoring join", id, channel);
            return Ok(());
        };

        debug!("{} joined {} ({} members)", change.nickname, channel, change.members.len());
        self.deliver(&change.members, &ServerFrame::joined(&channel, &change.nickname));

        self.store(move |db| db.create_channel(&channel, None)).await?;
        Ok(())
    }

    async fn part(&self, id: ConnectionId, channel: &str) -> Result<(), DispatchError> {
        let channel = channel_name(channel)?;
        let Some(change) = self.inner.registry.part(id, channel).await else {
            debug!("{} not in {}, ignoring part", id, channel);
            return Ok(());
        };

        debug!("{} left {} ({} members)", change.nickname, channel, change.members.len());
        self.deliver(&change.members, &ServerFrame::parted(channel, &change.nickname));
        Ok(())
    }

    /// Persist first so history reflects every broadcast message; the
    /// recipient set is fixed before the write starts.
    async fn message(&self, id: ConnectionId, channel: &str, content: &str) -> Result<(), DispatchError> {
        let channel = channel_name(channel)?.to_string();
        if content.trim().is_empty() {
            return Err(DispatchError::Invalid {
                field: "content",
                reason: "must not be empty",
            });
        }

        let nickname = self
            .inner
            .registry
            .nickname(id)
            .await
            .ok_or(DispatchError::UnknownConnection(id))?;
        let recipients = self.inner.registry.recipients_of(&channel).await;

        let (chan, sender, body) = (channel.clone(), nickname.clone(), content.to_string());
        let stored = self
            .store(move |db| {
                db.insert_message(&NewMessage {
                    channel: Some(&chan),
                    sender: Some(&sender),
                    content: &body,
                    kind: MessageKind::Privmsg,
                })
            })
            .await;

        let at = stored.as_ref().map(|m| m.created_at).unwrap_or_else(|_| Utc::now());
        let delivered = self.deliver(&recipients, &ServerFrame::chat(&channel, &nickname, content, at));
        debug!("{} -> {}: delivered to {}/{}", nickname, channel, delivered, recipients.len());

        stored?;
        Ok(())
    }

    /// Serialize once and push to every recipient without waiting. Full or
    /// closed queues drop the frame for that recipient only.
    fn deliver(&self, recipients: &[Recipient], frame: &ServerFrame) -> usize {
        let text = match serde_json::to_string(frame) {
            Ok(text) => Utf8Bytes::from(text),
            Err(e) => {
                warn!("Failed to encode outbound frame: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for recipient in recipients {
            match recipient.tx.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound queue full for {}, dropping frame", recipient.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} already closing, dropping frame", recipient.id);
                }
            }
        }
        delivered
    }

    /// Run a blocking store call off the async runtime.
    async fn store<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, DispatchError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DispatchError::Invalid {
            field,
            reason: "must not be empty",
        });
    }
    Ok(value)
}

fn channel_name(value: &str) -> Result<&str, DispatchError> {
    let name = required("channel", value)?;
    if name == SYSTEM_CHANNEL {
        return Err(DispatchError::Invalid {
            field: "channel",
            reason: "is reserved",
        });
    }
    Ok(name)
}
