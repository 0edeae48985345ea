// Per-connection message dispatch.
//
// A connection moves Connected -> Joined -> (Connected | closed). Every inbound
// frame is decoded into a `ClientMessage` and handled here; transport concerns
// stay in the socket loop.

use sketchsync_common::protocol::ws::ClientMessage;
use sketchsync_common::types::{normalize_room_id, ConnectionId, RoomId};
use tracing::debug;

use super::protocol::decode_message;
use crate::error::SyncError;
use crate::reconciler::{ApplyOutcome, UpdateReconciler};
use crate::session::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connected,
    Joined { room_id: RoomId },
}

#[derive(Debug, PartialEq)]
pub enum FrameOutcome {
    Handled,
    Failed(SyncError),
    TooLarge,
}

pub struct ConnectionHandler {
    connection_id: ConnectionId,
    phase: ConnectionPhase,
    sessions: SessionManager,
    reconciler: UpdateReconciler,
}

impl ConnectionHandler {
    pub fn new(connection_id: ConnectionId, sessions: SessionManager, reconciler: UpdateReconciler) -> Self {
        Self { connection_id, phase: ConnectionPhase::Connected, sessions, reconciler }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn phase(&self) -> &ConnectionPhase {
        &self.phase
    }

    /// Decode and handle one raw frame.
    pub async fn handle_frame(&mut self, raw: &[u8], max_frame_bytes: usize) -> FrameOutcome {
        if raw.len() > max_frame_bytes {
            return FrameOutcome::TooLarge;
        }
        let message = match decode_message(raw) {
            Ok(message) => message,
            Err(error) => return FrameOutcome::Failed(error.into()),
        };
        match self.handle(message).await {
            Ok(()) => FrameOutcome::Handled,
            Err(error) => FrameOutcome::Failed(error),
        }
    }

    pub async fn handle(&mut self, message: ClientMessage) -> Result<(), SyncError> {
        let result = match message {
            ClientMessage::Join { room_id, display_name } => {
                let room_id = normalize_room_id(&room_id)?;
                self.sessions.join(self.connection_id, &room_id, display_name).await?;
                self.phase = ConnectionPhase::Joined { room_id };
                Ok(())
            }
            ClientMessage::Leave => {
                self.sessions.leave(self.connection_id).await;
                self.phase = ConnectionPhase::Connected;
                Ok(())
            }
            ClientMessage::Update { elements, app_state_patch, version } => {
                let room_id = self.joined_room()?;
                match self
                    .reconciler
                    .apply_update(room_id, self.connection_id, elements, app_state_patch, version)
                    .await
                {
                    ApplyOutcome::Applied { .. } | ApplyOutcome::NeedsResync(_) => Ok(()),
                    ApplyOutcome::Rejected(error) => Err(error),
                }
            }
            ClientMessage::Clear => {
                let room_id = self.joined_room()?;
                self.reconciler.clear(room_id, self.connection_id).await.map(|_| ())
            }
            ClientMessage::Cursor { x, y, tool } => {
                self.joined_room()?;
                self.sessions.cursor(self.connection_id, x, y, tool).await
            }
            ClientMessage::Follow { target } => self.sessions.follow(self.connection_id, target).await,
            ClientMessage::Unfollow { target } => {
                self.sessions.unfollow(self.connection_id, target).await
            }
        };
        if let Err(error) = &result {
            debug!(connection_id = %self.connection_id, error = %error, "client operation rejected");
        }
        result
    }

    fn joined_room(&self) -> Result<&str, SyncError> {
        match &self.phase {
            ConnectionPhase::Joined { room_id } => Ok(room_id),
            ConnectionPhase::Connected => Err(SyncError::InvalidSession),
        }
    }
}
