// Periodic sweep that drops long-idle, memberless rooms.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::rooms::RoomStore;

#[derive(Debug, Clone)]
pub struct Reaper {
    rooms: Arc<RoomStore>,
    interval: Duration,
    grace: Duration,
}

impl Reaper {
    pub fn new(rooms: Arc<RoomStore>, interval: Duration, grace: Duration) -> Self {
        Self { rooms, interval, grace }
    }

    /// Evict every room that is reapable at `now`. Rooms are visited one at a
    /// time and the task yields between them.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut evicted = 0;
        for room_id in self.rooms.room_ids().await {
            if self.rooms.evict_if_idle(&room_id, now, self.grace).await {
                debug!(room_id = %room_id, "evicted idle room");
                evicted += 1;
            }
            tokio::task::yield_now().await;
        }
        evicted
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.reset(); // skip immediate first tick
            loop {
                ticker.tick().await;
                let evicted = self.sweep().await;
                if evicted > 0 {
                    let remaining = self.rooms.len().await;
                    info!(evicted, remaining, "reaper sweep finished");
                }
            }
        })
    }
}
