// Fan-out of server frames to room members.
//
// Callers hold the room lock while broadcasting so that every member's queue
// sees room events in the order the room applied them. Lock order is always
// room, then registry.

use std::sync::Arc;

use sketchsync_common::protocol::ws::ServerMessage;
use sketchsync_common::types::ConnectionId;
use tracing::debug;

use crate::registry::{ConnectionRegistry, VolatilePush};
use crate::rooms::Room;

/// Delivery class of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued without bound; never dropped while the connection lives.
    Reliable,
    /// Latest frame per origin wins; older pending frames are overwritten.
    Volatile,
}

/// Connection whose newer volatile frames supersede older ones.
fn volatile_origin(message: &ServerMessage) -> Option<ConnectionId> {
    match message {
        ServerMessage::Cursor { connection_id, .. } => Some(*connection_id),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `message` to every member of `room` except `exclude`. Returns how
    /// many queues accepted the frame.
    pub async fn broadcast(
        &self,
        room: &Room,
        exclude: Option<ConnectionId>,
        message: ServerMessage,
        delivery: Delivery,
    ) -> usize {
        let recipients = room.member_ids().filter(|id| Some(*id) != exclude);
        let outbounds = self.registry.outbounds(recipients).await;

        let mut delivered = 0;
        for (connection_id, outbound) in outbounds {
            let accepted = match delivery {
                Delivery::Reliable => outbound.reliable.send(message.clone()).is_ok(),
                Delivery::Volatile => {
                    match outbound.volatile.push(volatile_origin(&message), message.clone()).await {
                        VolatilePush::Queued | VolatilePush::Replaced => true,
                        VolatilePush::DroppedOldest => {
                            debug!(
                                connection_id = %connection_id,
                                room_id = %room.id(),
                                kind = message.kind(),
                                "volatile queue full, dropped oldest frame"
                            );
                            true
                        }
                        VolatilePush::Closed => false,
                    }
                }
            };
            if accepted {
                delivered += 1;
            }
        }
        delivered
    }

    /// Reliable frame to a single connection.
    pub async fn send_to(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        match self.registry.outbound(connection_id).await {
            Some(outbound) => outbound.reliable.send(message).is_ok(),
            None => false,
        }
    }
}
