// Room store: every room's document, version fence and member set.
//
// Each room lives behind its own mutex so that operations on one room are
// serialized while different rooms never contend. The outer map lock is only
// held to look up, insert or remove room handles.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use sketchsync_common::types::{
    AppState, ConnectionId, Element, MemberInfo, Pointer, RoomId, RoomSnapshot,
};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};

pub type RoomHandle = Arc<Mutex<Room>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub display_name: String,
    pub pointer: Option<Pointer>,
}

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    elements: Vec<Element>,
    app_state: AppState,
    version: u64,
    members: BTreeMap<ConnectionId, Member>,
    last_activity: Instant,
    evicted: bool,
}

impl Room {
    fn new(id: RoomId, now: Instant) -> Self {
        Self {
            id,
            elements: Vec::new(),
            app_state: AppState::document_defaults(),
            version: 0,
            members: BTreeMap::new(),
            last_activity: now,
            evicted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Set once the reaper has dropped this room from the store. A handle to an
    /// evicted room must not be mutated; callers look the room up again.
    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            elements: self.elements.clone(),
            app_state: self.app_state.clone(),
            version: self.version,
        }
    }

    pub fn is_member(&self, connection_id: ConnectionId) -> bool {
        self.members.contains_key(&connection_id)
    }

    pub fn member(&self, connection_id: ConnectionId) -> Option<&Member> {
        self.members.get(&connection_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.keys().copied()
    }

    /// Full member list, ordered by connection id.
    pub fn member_list(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|(connection_id, member)| MemberInfo {
                connection_id: *connection_id,
                display_name: member.display_name.clone(),
            })
            .collect()
    }

    pub fn add_member(&mut self, connection_id: ConnectionId, display_name: String, now: Instant) {
        self.members.insert(connection_id, Member { display_name, pointer: None });
        self.last_activity = now;
    }

    pub fn remove_member(&mut self, connection_id: ConnectionId, now: Instant) -> Option<Member> {
        let removed = self.members.remove(&connection_id);
        if removed.is_some() {
            self.last_activity = now;
        }
        removed
    }

    pub fn set_pointer(&mut self, connection_id: ConnectionId, pointer: Pointer) -> bool {
        match self.members.get_mut(&connection_id) {
            Some(member) => {
                member.pointer = Some(pointer);
                true
            }
            None => false,
        }
    }

    /// Install a new document state and advance the version by one.
    pub fn commit(&mut self, elements: Vec<Element>, patch: AppState, now: Instant) -> u64 {
        self.elements = elements;
        self.app_state.merge(patch);
        self.bump(now)
    }

    /// Empty the document, restore default settings and advance the version.
    pub fn reset(&mut self, now: Instant) -> u64 {
        self.elements.clear();
        self.app_state = AppState::document_defaults();
        self.bump(now)
    }

    fn bump(&mut self, now: Instant) -> u64 {
        self.version = self.version.saturating_add(1);
        self.last_activity = now;
        self.version
    }

    /// Retire this room. Holders of a stale handle see the flag after locking.
    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    /// True when nobody is in the room and it has been quiet for `grace`.
    pub fn is_reapable(&self, now: Instant, grace: Duration) -> bool {
        self.members.is_empty() && now.saturating_duration_since(self.last_activity) >= grace
    }
}

#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
}

impl RoomStore {
    pub async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Existing room handle, or a fresh empty room at version 0. The flag is
    /// true when the room was created by this call.
    pub async fn get_or_create(&self, room_id: &str) -> (RoomHandle, bool) {
        if let Some(existing) = self.get(room_id).await {
            return (existing, false);
        }

        let mut guard = self.rooms.write().await;
        if let Some(existing) = guard.get(room_id) {
            return (existing.clone(), false);
        }
        let room = Arc::new(Mutex::new(Room::new(room_id.to_owned(), Instant::now())));
        guard.insert(room_id.to_owned(), room.clone());
        (room, true)
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids = self.rooms.read().await.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub(crate) async fn forget(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.write().await.remove(room_id)
    }

    /// Remove the room if it is reapable at `now`. A room whose lock is held
    /// is in use and is left for a later sweep.
    pub async fn evict_if_idle(&self, room_id: &str, now: Instant, grace: Duration) -> bool {
        let mut guard = self.rooms.write().await;
        let Some(handle) = guard.get(room_id).cloned() else {
            return false;
        };
        let Ok(mut room) = handle.try_lock() else {
            return false;
        };
        if !room.is_reapable(now, grace) {
            return false;
        }
        room.mark_evicted();
        drop(room);
        guard.remove(room_id);
        true
    }
}
