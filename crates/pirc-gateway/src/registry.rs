use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use rand::Rng;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Handle of one live transport session.
pub type ConnectionId = Uuid;

/// Outbound queue of a connection. Frames are pre-serialized once per event.
pub type FrameSender = mpsc::Sender<Utf8Bytes>;

/// Attempts at a random `Guest<NNNN>` nickname before falling back to a
/// longer suffix.
const GUEST_NICK_ATTEMPTS: usize = 8;

/// What a connection looks like right after registration.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: ConnectionId,
    pub nickname: String,
}

/// One recipient selected for a delivery.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: ConnectionId,
    pub tx: FrameSender,
}

/// Result of a successful rename.
#[derive(Debug, Clone)]
pub struct Renamed {
    pub old: String,
    /// Whether some other live connection still carries the old nickname.
    pub old_still_live: bool,
    pub everyone: Vec<Recipient>,
}

/// Result of a join or part that changed the membership set.
#[derive(Debug, Clone)]
pub struct MembershipChange {
    pub nickname: String,
    /// Channel members at the moment of the change. Includes the joiner on
    /// join, excludes the leaver on part.
    pub members: Vec<Recipient>,
}

/// State drained from a connection on unregister.
#[derive(Debug, Clone)]
pub struct Departed {
    pub nickname: String,
    pub nickname_still_live: bool,
    /// Each channel the connection was in, with its remaining members.
    pub channels: Vec<(String, Vec<Recipient>)>,
}

struct Session {
    nickname: String,
    channels: HashSet<String>,
    tx: FrameSender,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<ConnectionId, Session>,
    /// channel name -> members. Kept in lockstep with `Session::channels`.
    members: HashMap<String, HashSet<ConnectionId>>,
}

/// Live connections, their nicknames and channel memberships.
///
/// Every operation takes the single lock once, mutates, and snapshots the
/// recipients it affects before releasing it, so a broadcast always targets
/// the membership as of the mutation.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. `requested` is a client-asserted nickname; without
    /// one a `Guest<NNNN>` name is generated that no live connection holds.
    pub async fn register(&self, tx: FrameSender, requested: Option<String>) -> Identity {
        let mut state = self.inner.write().await;
        let id = Uuid::new_v4();
        let nickname = match requested {
            Some(nick) => nick,
            None => state.fresh_guest_nickname(),
        };

        state.sessions.insert(
            id,
            Session {
                nickname: nickname.clone(),
                channels: HashSet::new(),
                tx,
            },
        );

        Identity { id, nickname }
    }

    /// Replace the nickname unconditionally. Collisions with other live
    /// nicknames are allowed. Returns `None` for an unknown connection.
    pub async fn rename(&self, id: ConnectionId, new_nick: &str) -> Option<Renamed> {
        let mut state = self.inner.write().await;
        let session = state.sessions.get_mut(&id)?;
        let old = std::mem::replace(&mut session.nickname, new_nick.to_string());

        let old_still_live = state.nickname_live(&old);
        let everyone = state
            .sessions
            .iter()
            .map(|(id, s)| Recipient { id: *id, tx: s.tx.clone() })
            .collect();

        Some(Renamed { old, old_still_live, everyone })
    }

    /// Add `channel` to the membership set. `None` when the connection is
    /// unknown or already a member.
    pub async fn join(&self, id: ConnectionId, channel: &str) -> Option<MembershipChange> {
        let mut state = self.inner.write().await;
        let session = state.sessions.get_mut(&id)?;
        if !session.channels.insert(channel.to_string()) {
            return None;
        }
        let nickname = session.nickname.clone();

        state.members.entry(channel.to_string()).or_default().insert(id);
        let members = state.recipients_in(channel);

        Some(MembershipChange { nickname, members })
    }

    /// Remove `channel` from the membership set. `None` when the connection
    /// is unknown or was not a member.
    pub async fn part(&self, id: ConnectionId, channel: &str) -> Option<MembershipChange> {
        let mut state = self.inner.write().await;
        let session = state.sessions.get_mut(&id)?;
        if !session.channels.remove(channel) {
            return None;
        }
        let nickname = session.nickname.clone();

        state.remove_member(channel, id);
        let members = state.recipients_in(channel);

        Some(MembershipChange { nickname, members })
    }

    /// Drop the connection and drain its memberships. Only the first call
    /// for a given id returns `Some`.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Departed> {
        let mut state = self.inner.write().await;
        let session = state.sessions.remove(&id)?;

        let mut channels: Vec<String> = session.channels.into_iter().collect();
        channels.sort();

        let channels: Vec<(String, Vec<Recipient>)> = channels
            .into_iter()
            .map(|channel| {
                state.remove_member(&channel, id);
                let remaining = state.recipients_in(&channel);
                (channel, remaining)
            })
            .collect();

        Some(Departed {
            nickname_still_live: state.nickname_live(&session.nickname),
            nickname: session.nickname,
            channels,
        })
    }

    /// Live connections currently joined to `channel`.
    pub async fn members_of(&self, channel: &str) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .members
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn recipients_of(&self, channel: &str) -> Vec<Recipient> {
        self.inner.read().await.recipients_in(channel)
    }

    pub async fn nickname(&self, id: ConnectionId) -> Option<String> {
        self.inner
            .read()
            .await
            .sessions
            .get(&id)
            .map(|s| s.nickname.clone())
    }

    pub async fn sender(&self, id: ConnectionId) -> Option<FrameSender> {
        self.inner.read().await.sessions.get(&id).map(|s| s.tx.clone())
    }

    pub async fn channels_of(&self, id: ConnectionId) -> HashSet<String> {
        self.inner
            .read()
            .await
            .sessions
            .get(&id)
            .map(|s| s.channels.clone())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

impl RegistryState {
    fn fresh_guest_nickname(&self) -> String {
        let mut rng = rand::rng();
        for _ in 0..GUEST_NICK_ATTEMPTS {
            let candidate = format!("Guest{}", rng.random_range(0..10_000));
            if !self.nickname_live(&candidate) {
                return candidate;
            }
        }
        let suffix = Uuid::new_v4().simple().to_string();
        format!("Guest{}", &suffix[..8])
    }

    fn nickname_live(&self, nickname: &str) -> bool {
        self.sessions.values().any(|s| s.nickname == nickname)
    }

    fn recipients_in(&self, channel: &str) -> Vec<Recipient> {
        let Some(ids) = self.members.get(channel) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                self.sessions
                    .get(id)
                    .map(|s| Recipient { id: *id, tx: s.tx.clone() })
            })
            .collect()
    }

    fn remove_member(&mut self, channel: &str, id: ConnectionId) {
        if let Some(ids) = self.members.get_mut(channel) {
            ids.remove(&id);
            if ids.is_empty() {
                self.members.remove(channel);
            }
        }
    }
}
