// Room membership, presence, cursors and follow links.

use std::sync::Arc;

use sketchsync_common::protocol::ws::ServerMessage;
use sketchsync_common::types::{
    default_display_name, normalize_room_id, ConnectionId, Pointer, RoomSnapshot,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::registry::ConnectionRegistry;
use crate::relay::{BroadcastRelay, Delivery};
use crate::rooms::RoomStore;

#[derive(Debug, Clone)]
pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomStore>,
    relay: BroadcastRelay,
}

impl SessionManager {
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomStore>, relay: BroadcastRelay) -> Self {
        Self { registry, rooms, relay }
    }

    /// Put the connection into `room_id`, creating the room if needed. The
    /// joiner gets `initial-state`, then every member (joiner included) gets
    /// the new member list.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        room_id: &str,
        display_name: Option<String>,
    ) -> Result<RoomSnapshot, SyncError> {
        let room_id = normalize_room_id(room_id)?;
        if !self.registry.contains(connection_id).await {
            return Err(SyncError::InvalidSession);
        }
        self.leave(connection_id).await;

        let display_name = display_name
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_display_name(connection_id));

        loop {
            let (handle, created) = self.rooms.get_or_create(&room_id).await;
            let mut room = handle.lock().await;
            if room.is_evicted() {
                // Lost a race with the reaper; the next lookup creates a fresh room.
                continue;
            }

            room.add_member(connection_id, display_name.clone(), Instant::now());
            self.registry.attach(connection_id, room_id.clone()).await;

            let snapshot = room.snapshot();
            self.relay
                .send_to(
                    connection_id,
                    ServerMessage::InitialState {
                        room_id: room_id.clone(),
                        elements: snapshot.elements.clone(),
                        app_state: snapshot.app_state.clone(),
                        version: snapshot.version,
                    },
                )
                .await;
            self.relay
                .broadcast(
                    &room,
                    None,
                    ServerMessage::MembershipChanged {
                        room_id: room_id.clone(),
                        members: room.member_list(),
                    },
                    Delivery::Reliable,
                )
                .await;

            info!(
                connection_id = %connection_id,
                room_id = %room_id,
                created,
                members = room.member_count(),
                version = snapshot.version,
                "joined room"
            );
            return Ok(snapshot);
        }
    }

    /// Leave the current room, if any. The room itself stays until the reaper
    /// removes it.
    pub async fn leave(&self, connection_id: ConnectionId) {
        let Some(room_id) = self.registry.detach(connection_id).await else {
            return;
        };
        let Some(handle) = self.rooms.get(&room_id).await else {
            return;
        };
        let mut room = handle.lock().await;
        if room.remove_member(connection_id, Instant::now()).is_none() {
            return;
        }

        if room.member_count() > 0 {
            self.relay
                .broadcast(
                    &room,
                    None,
                    ServerMessage::MembershipChanged {
                        room_id: room_id.clone(),
                        members: room.member_list(),
                    },
                    Delivery::Reliable,
                )
                .await;
        }
        info!(
            connection_id = %connection_id,
            room_id = %room_id,
            members = room.member_count(),
            "left room"
        );
    }

    /// Transport is gone: leave, drop follow links, forget the connection.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.leave(connection_id).await;

        for (target, followers) in self.registry.drop_follow_links(connection_id).await {
            let message = if followers.is_empty() {
                ServerMessage::FollowEnded
            } else {
                ServerMessage::FollowersChanged { followers }
            };
            self.relay.send_to(target, message).await;
        }

        self.registry.unregister(connection_id).await;
        debug!(connection_id = %connection_id, "connection removed");
    }

    pub async fn cursor(
        &self,
        connection_id: ConnectionId,
        x: f64,
        y: f64,
        tool: Option<String>,
    ) -> Result<(), SyncError> {
        let room_id = self.registry.current_room(connection_id).await.ok_or(SyncError::InvalidSession)?;
        let handle = self.rooms.get(&room_id).await.ok_or(SyncError::InvalidSession)?;
        let mut room = handle.lock().await;
        if !room.set_pointer(connection_id, Pointer { x, y, tool: tool.clone() }) {
            return Err(SyncError::InvalidSession);
        }

        self.relay
            .broadcast(
                &room,
                Some(connection_id),
                ServerMessage::Cursor { connection_id, x, y, tool },
                Delivery::Volatile,
            )
            .await;
        Ok(())
    }

    pub async fn follow(&self, follower: ConnectionId, target: ConnectionId) -> Result<(), SyncError> {
        let followers = self.registry.follow(follower, target).await?;
        self.relay.send_to(target, ServerMessage::FollowersChanged { followers }).await;
        Ok(())
    }

    pub async fn unfollow(&self, follower: ConnectionId, target: ConnectionId) -> Result<(), SyncError> {
        let Some(followers) = self.registry.unfollow(follower, target).await? else {
            debug!(follower = %follower, target = %target, "unfollow without a follow link");
            return Ok(());
        };
        self.relay.send_to(target, ServerMessage::FollowersChanged { followers }).await;
        Ok(())
    }
}
