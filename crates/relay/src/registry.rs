// Connection registry: who is connected, where their frames go, which room
// they occupy and who follows whom.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sketchsync_common::protocol::ws::ServerMessage;
use sketchsync_common::types::{ConnectionId, RoomId};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use uuid::Uuid;

use crate::error::SyncError;

/// Sending halves of a connection's two outbound queues.
#[derive(Debug, Clone)]
pub struct ConnectionOutbound {
    pub reliable: mpsc::UnboundedSender<ServerMessage>,
    pub volatile: VolatileSender,
}

/// Receiving halves, drained by the connection's socket task.
#[derive(Debug)]
pub struct OutboundReceivers {
    pub reliable: mpsc::UnboundedReceiver<ServerMessage>,
    pub volatile: VolatileReceiver,
}

impl ConnectionOutbound {
    pub fn channel(volatile_capacity: usize) -> (Self, OutboundReceivers) {
        let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();
        let (volatile_tx, volatile_rx) = volatile_channel(volatile_capacity);
        (
            Self { reliable: reliable_tx, volatile: volatile_tx },
            OutboundReceivers { reliable: reliable_rx, volatile: volatile_rx },
        )
    }
}

/// What happened to a frame offered to a volatile queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilePush {
    Queued,
    /// A pending frame from the same origin was overwritten.
    Replaced,
    /// The queue held `capacity` origins; the oldest pending frame was dropped.
    DroppedOldest,
    /// The receiving socket task is gone.
    Closed,
}

#[derive(Debug)]
struct VolatileShared {
    pending: Mutex<VecDeque<(Option<ConnectionId>, ServerMessage)>>,
    ready: Notify,
    capacity: usize,
    closed: AtomicBool,
}

/// Latest-wins queue for volatile frames. At most one frame per origin is
/// pending, so a slow reader always ends on each sender's newest position.
#[derive(Debug, Clone)]
pub struct VolatileSender {
    shared: Arc<VolatileShared>,
}

#[derive(Debug)]
pub struct VolatileReceiver {
    shared: Arc<VolatileShared>,
}

fn volatile_channel(capacity: usize) -> (VolatileSender, VolatileReceiver) {
    let shared = Arc::new(VolatileShared {
        pending: Mutex::new(VecDeque::new()),
        ready: Notify::new(),
        capacity: capacity.max(1),
        closed: AtomicBool::new(false),
    });
    (VolatileSender { shared: Arc::clone(&shared) }, VolatileReceiver { shared })
}

impl VolatileSender {
    /// Offer `message`. Frames without an origin never replace one another.
    pub async fn push(&self, origin: Option<ConnectionId>, message: ServerMessage) -> VolatilePush {
        if self.shared.closed.load(Ordering::Acquire) {
            return VolatilePush::Closed;
        }

        let mut pending = self.shared.pending.lock().await;
        let same_origin =
            origin.and_then(|origin| pending.iter().position(|(queued, _)| *queued == Some(origin)));
        let outcome = match same_origin {
            Some(index) => {
                pending[index].1 = message;
                VolatilePush::Replaced
            }
            None => {
                let outcome = if pending.len() >= self.shared.capacity {
                    pending.pop_front();
                    VolatilePush::DroppedOldest
                } else {
                    VolatilePush::Queued
                };
                pending.push_back((origin, message));
                outcome
            }
        };
        drop(pending);

        self.shared.ready.notify_one();
        outcome
    }
}

impl VolatileReceiver {
    /// Wait for the next pending frame. Cancel safe: a frame is only removed
    /// from the queue in the same poll that returns it.
    pub async fn recv(&mut self) -> ServerMessage {
        loop {
            if let Some((_, message)) = self.shared.pending.lock().await.pop_front() {
                return message;
            }
            self.shared.ready.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.shared.pending.try_lock().ok()?.pop_front().map(|(_, message)| message)
    }
}

impl Drop for VolatileReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
struct ConnectionRecord {
    outbound: ConnectionOutbound,
    room_id: Option<RoomId>,
    following: BTreeSet<ConnectionId>,
    followers: BTreeSet<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionRecord>>,
}

impl ConnectionRegistry {
    /// Register a new transport connection and return its fresh id.
    pub async fn register(&self, outbound: ConnectionOutbound) -> ConnectionId {
        let mut guard = self.connections.write().await;
        let mut connection_id = Uuid::new_v4();
        while guard.contains_key(&connection_id) {
            connection_id = Uuid::new_v4();
        }
        guard.insert(
            connection_id,
            ConnectionRecord {
                outbound,
                room_id: None,
                following: BTreeSet::new(),
                followers: BTreeSet::new(),
            },
        );
        connection_id
    }

    pub async fn unregister(&self, connection_id: ConnectionId) -> bool {
        self.connections.write().await.remove(&connection_id).is_some()
    }

    pub async fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&connection_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn current_room(&self, connection_id: ConnectionId) -> Option<RoomId> {
        self.connections.read().await.get(&connection_id).and_then(|record| record.room_id.clone())
    }

    /// Record that the connection now occupies `room_id`.
    pub async fn attach(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get_mut(&connection_id) {
            Some(record) => {
                record.room_id = Some(room_id);
                true
            }
            None => false,
        }
    }

    /// Clear the connection's room and return what it was.
    pub async fn detach(&self, connection_id: ConnectionId) -> Option<RoomId> {
        self.connections
            .write()
            .await
            .get_mut(&connection_id)
            .and_then(|record| record.room_id.take())
    }

    pub async fn outbound(&self, connection_id: ConnectionId) -> Option<ConnectionOutbound> {
        self.connections.read().await.get(&connection_id).map(|record| record.outbound.clone())
    }

    /// Outbound handles for every listed connection that is still registered.
    pub async fn outbounds<I>(&self, connection_ids: I) -> Vec<(ConnectionId, ConnectionOutbound)>
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let guard = self.connections.read().await;
        connection_ids
            .into_iter()
            .filter_map(|id| guard.get(&id).map(|record| (id, record.outbound.clone())))
            .collect()
    }

    /// Link `follower` to `target`; returns the target's follower list.
    pub async fn follow(
        &self,
        follower: ConnectionId,
        target: ConnectionId,
    ) -> Result<Vec<ConnectionId>, SyncError> {
        if follower == target {
            return Err(SyncError::MalformedPayload("cannot follow yourself".to_string()));
        }

        let mut guard = self.connections.write().await;
        if !guard.contains_key(&follower) {
            return Err(SyncError::InvalidSession);
        }
        let Some(target_record) = guard.get_mut(&target) else {
            return Err(SyncError::UnknownConnection);
        };
        target_record.followers.insert(follower);
        let followers = target_record.followers.iter().copied().collect();

        if let Some(follower_record) = guard.get_mut(&follower) {
            follower_record.following.insert(target);
        }
        Ok(followers)
    }

    /// Remove the link; returns the target's remaining followers, or `None`
    /// when `follower` was not following `target`.
    pub async fn unfollow(
        &self,
        follower: ConnectionId,
        target: ConnectionId,
    ) -> Result<Option<Vec<ConnectionId>>, SyncError> {
        let mut guard = self.connections.write().await;
        if let Some(follower_record) = guard.get_mut(&follower) {
            follower_record.following.remove(&target);
        }
        let Some(target_record) = guard.get_mut(&target) else {
            return Err(SyncError::UnknownConnection);
        };
        if !target_record.followers.remove(&follower) {
            return Ok(None);
        }
        Ok(Some(target_record.followers.iter().copied().collect()))
    }

    /// Drop every follow link touching `connection_id`. Returns, for each
    /// connection it was following, that connection's remaining followers.
    pub async fn drop_follow_links(
        &self,
        connection_id: ConnectionId,
    ) -> Vec<(ConnectionId, Vec<ConnectionId>)> {
        let mut guard = self.connections.write().await;
        let Some(record) = guard.get_mut(&connection_id) else {
            return Vec::new();
        };
        let following = std::mem::take(&mut record.following);
        let followers = std::mem::take(&mut record.followers);

        for follower in followers {
            if let Some(follower_record) = guard.get_mut(&follower) {
                follower_record.following.remove(&connection_id);
            }
        }

        following
            .into_iter()
            .filter_map(|target| {
                let target_record = guard.get_mut(&target)?;
                target_record.followers.remove(&connection_id);
                Some((target, target_record.followers.iter().copied().collect()))
            })
            .collect()
    }
}
