pub mod bars;
pub mod features;
pub mod levels;
pub mod snapshot;

// Re-export the structs most callers need (e.g. `use crate::market::Snapshot`).
pub use bars::{Bar, BarBuffer};
pub use features::FeatureSet;
pub use levels::LevelBook;
pub use snapshot::{Snapshot, SnapshotStore};
