// Version-fenced document updates and clears.

use std::sync::Arc;

use sketchsync_common::protocol::ws::ServerMessage;
use sketchsync_common::reconcile::reconcile_elements;
use sketchsync_common::types::{AppState, ConnectionId, Element, RoomSnapshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::relay::{BroadcastRelay, Delivery};
use crate::rooms::RoomStore;

/// How an accepted element list is combined with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The proposed list replaces the stored list wholesale.
    ReplaceAll,
    /// Element-wise reconciliation keyed by element id.
    PerElement,
}

impl MergeStrategy {
    pub fn merge(self, current: &[Element], proposed: Vec<Element>) -> Vec<Element> {
        match self {
            Self::ReplaceAll => proposed,
            Self::PerElement => reconcile_elements(current, &proposed),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { version: u64 },
    /// The sender's base version was stale; it has been sent this snapshot.
    NeedsResync(RoomSnapshot),
    Rejected(SyncError),
}

#[derive(Debug, Clone)]
pub struct UpdateReconciler {
    rooms: Arc<RoomStore>,
    relay: BroadcastRelay,
    merge: MergeStrategy,
}

impl UpdateReconciler {
    pub fn new(rooms: Arc<RoomStore>, relay: BroadcastRelay, merge: MergeStrategy) -> Self {
        Self { rooms, relay, merge }
    }

    pub async fn apply_update(
        &self,
        room_id: &str,
        sender: ConnectionId,
        elements: Vec<Element>,
        app_state_patch: AppState,
        version: Option<u64>,
    ) -> ApplyOutcome {
        let Some(handle) = self.rooms.get(room_id).await else {
            return ApplyOutcome::Rejected(SyncError::InvalidSession);
        };
        let mut room = handle.lock().await;
        if room.is_evicted() || !room.is_member(sender) {
            return ApplyOutcome::Rejected(SyncError::InvalidSession);
        }

        if let Some(base_version) = version {
            if base_version < room.version() {
                let snapshot = room.snapshot();
                debug!(
                    connection_id = %sender,
                    room_id = %room_id,
                    base_version,
                    version = snapshot.version,
                    "stale update, sending resync"
                );
                self.relay
                    .send_to(
                        sender,
                        ServerMessage::ResyncRequired {
                            elements: snapshot.elements.clone(),
                            app_state: snapshot.app_state.clone(),
                            version: snapshot.version,
                        },
                    )
                    .await;
                return ApplyOutcome::NeedsResync(snapshot);
            }
        }

        let merged = self.merge.merge(room.elements(), elements);
        let new_version = room.commit(merged, app_state_patch, Instant::now());

        let message = ServerMessage::Update {
            elements: room.elements().to_vec(),
            app_state: room.app_state().clone(),
            version: new_version,
            from: sender,
        };
        let recipients = self.relay.broadcast(&room, Some(sender), message, Delivery::Reliable).await;
        debug!(
            connection_id = %sender,
            room_id = %room_id,
            version = new_version,
            recipients,
            "update applied"
        );

        ApplyOutcome::Applied { version: new_version }
    }

    pub async fn clear(&self, room_id: &str, sender: ConnectionId) -> Result<u64, SyncError> {
        let handle = self.rooms.get(room_id).await.ok_or(SyncError::InvalidSession)?;
        let mut room = handle.lock().await;
        if room.is_evicted() || !room.is_member(sender) {
            return Err(SyncError::InvalidSession);
        }

        let new_version = room.reset(Instant::now());
        self.relay
            .broadcast(&room, None, ServerMessage::Cleared { version: new_version }, Delivery::Reliable)
            .await;
        info!(connection_id = %sender, room_id = %room_id, version = new_version, "room cleared");

        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionOutbound, ConnectionRegistry, OutboundReceivers};
    use serde_json::json;

    fn element(value: serde_json::Value) -> Element {
        serde_json::from_value(value).expect("element should deserialize")
    }

    struct Harness {
        rooms: Arc<RoomStore>,
        registry: Arc<ConnectionRegistry>,
        reconciler: UpdateReconciler,
    }

    impl Harness {
        fn new(merge: MergeStrategy) -> Self {
            let rooms = Arc::new(RoomStore::default());
            let registry = Arc::new(ConnectionRegistry::default());
            let relay = BroadcastRelay::new(registry.clone());
            let reconciler = UpdateReconciler::new(rooms.clone(), relay, merge);
            Self { rooms, registry, reconciler }
        }

        async fn member(&self, room_id: &str) -> (ConnectionId, OutboundReceivers) {
            let (outbound, receivers) = ConnectionOutbound::channel(8);
            let id = self.registry.register(outbound).await;
            let (handle, _) = self.rooms.get_or_create(room_id).await;
            handle.lock().await.add_member(id, "member".into(), Instant::now());
            self.registry.attach(id, room_id.to_owned()).await;
            (id, receivers)
        }

        async fn snapshot(&self, room_id: &str) -> RoomSnapshot {
            let handle = self.rooms.get(room_id).await.expect("room should exist");
            let snapshot = handle.lock().await.snapshot();
            snapshot
        }
    }

    #[test]
    fn replace_all_discards_current_elements() {
        let current = vec![element(json!({ "id": "a", "version": 9 }))];
        let proposed = vec![element(json!({ "id": "b", "version": 1 }))];
        assert_eq!(MergeStrategy::ReplaceAll.merge(&current, proposed.clone()), proposed);
    }

    #[test]
    fn per_element_keeps_newer_stored_elements() {
        let current = vec![
            element(json!({ "id": "a", "version": 9 })),
            element(json!({ "id": "c", "version": 1 })),
        ];
        let proposed = vec![
            element(json!({ "id": "a", "version": 2 })),
            element(json!({ "id": "b", "version": 1 })),
        ];

        let merged = MergeStrategy::PerElement.merge(&current, proposed);
        let ids = merged.iter().filter_map(Element::id).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[0].version(), 9);
    }

    #[tokio::test]
    async fn accepted_update_bumps_version_and_skips_sender() {
        let harness = Harness::new(MergeStrategy::ReplaceAll);
        let (a, mut a_rx) = harness.member("R1").await;
        let (b, mut b_rx) = harness.member("R1").await;
        let shape = element(json!({ "id": "shape1", "type": "rectangle" }));

        let outcome = harness
            .reconciler
            .apply_update("R1", a, vec![shape.clone()], AppState::default(), Some(0))
            .await;
        assert_eq!(outcome, ApplyOutcome::Applied { version: 1 });

        match b_rx.reliable.try_recv() {
            Ok(ServerMessage::Update { elements, version, from, .. }) => {
                assert_eq!(elements, vec![shape]);
                assert_eq!(version, 1);
                assert_eq!(from, a);
            }
            other => panic!("expected update for B, got {other:?}"),
        }
        assert!(a_rx.reliable.try_recv().is_err());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn stale_update_resyncs_sender_and_leaves_room_unchanged() {
        let harness = Harness::new(MergeStrategy::ReplaceAll);
        let (a, _a_rx) = harness.member("R1").await;
        let (b, mut b_rx) = harness.member("R1").await;

        for expected in 1..=5 {
            let elements = vec![element(json!({ "id": format!("s{expected}") }))];
            let outcome = harness
                .reconciler
                .apply_update("R1", a, elements, AppState::default(), None)
                .await;
            assert_eq!(outcome, ApplyOutcome::Applied { version: expected });
        }
        while b_rx.reliable.try_recv().is_ok() {}
        let before = harness.snapshot("R1").await;

        let outcome = harness
            .reconciler
            .apply_update("R1", b, vec![], AppState::default(), Some(3))
            .await;

        assert_eq!(outcome, ApplyOutcome::NeedsResync(before.clone()));
        assert_eq!(harness.snapshot("R1").await, before);
        match b_rx.reliable.try_recv() {
            Ok(ServerMessage::ResyncRequired { version, elements, .. }) => {
                assert_eq!(version, 5);
                assert_eq!(elements, before.elements);
            }
            other => panic!("expected resync-required, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_from_non_member_is_rejected() {
        let harness = Harness::new(MergeStrategy::ReplaceAll);
        let (_a, _a_rx) = harness.member("R1").await;
        let outsider = uuid::Uuid::new_v4();

        let outcome = harness
            .reconciler
            .apply_update("R1", outsider, vec![], AppState::default(), None)
            .await;
        assert_eq!(outcome, ApplyOutcome::Rejected(SyncError::InvalidSession));

        let outcome = harness
            .reconciler
            .apply_update("missing", outsider, vec![], AppState::default(), None)
            .await;
        assert_eq!(outcome, ApplyOutcome::Rejected(SyncError::InvalidSession));
    }

    #[tokio::test]
    async fn clear_twice_reaches_sender_and_bumps_each_time() {
        let harness = Harness::new(MergeStrategy::ReplaceAll);
        let (a, mut a_rx) = harness.member("R1").await;
        let (_b, mut b_rx) = harness.member("R1").await;
        harness
            .reconciler
            .apply_update(
                "R1",
                a,
                vec![element(json!({ "id": "x" }))],
                AppState { theme: Some("dark".into()), ..AppState::default() },
                None,
            )
            .await;
        while b_rx.reliable.try_recv().is_ok() {}

        assert_eq!(harness.reconciler.clear("R1", a).await, Ok(2));
        assert_eq!(harness.snapshot("R1").await.elements, Vec::<Element>::new());
        assert_eq!(harness.reconciler.clear("R1", a).await, Ok(3));
        let snapshot = harness.snapshot("R1").await;
        assert!(snapshot.elements.is_empty());
        assert_eq!(snapshot.app_state, AppState::document_defaults());

        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(rx.reliable.try_recv().ok(), Some(ServerMessage::Cleared { version: 2 }));
            assert_eq!(rx.reliable.try_recv().ok(), Some(ServerMessage::Cleared { version: 3 }));
        }
    }

    #[tokio::test]
    async fn clear_from_non_member_is_rejected() {
        let harness = Harness::new(MergeStrategy::ReplaceAll);
        let (_a, _a_rx) = harness.member("R1").await;

        assert_eq!(
            harness.reconciler.clear("R1", uuid::Uuid::new_v4()).await,
            Err(SyncError::InvalidSession)
        );
        assert_eq!(harness.snapshot("R1").await.version, 0);
    }
}
