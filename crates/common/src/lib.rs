// sketchsync-common: shared types and wire protocol for the sketchsync workspace

pub mod protocol;
pub mod reconcile;
pub mod types;
