//! Offline-sync core -- data model, monotonic clock, and the three-way merge
//! engine used to reconcile local edits against a remote authority.
//!
//! This crate has no I/O: it is the pure-data half of the engine, so it can
//! be tested without a runtime and reused by anything that needs to reason
//! about sessions, queued operations, and conflicts without talking to a
//! network or a disk.
//!
//! - **Clock** ([`clock`]): monotonic local timestamps for strict operation ordering
//! - **Model** ([`model`]): `SessionRecord`, `Operation`, `ConflictRecord`, and friends
//! - **Merge** ([`merge`]): conflict detection, classification, and three-way merge

pub mod clock;
pub mod error;
pub mod merge;
pub mod model;

pub use clock::{Clock, ClockSource, SystemClock, Timestamp};
pub use error::MergeError;
pub use merge::{
    classify, has_conflict, merge_grid, merge_session, recommended_strategy, resolve,
    BacklogGroupState, GridItem, GridMergeResult, PositionalConflict, SessionMergeResult,
    SessionPayload,
};
pub use model::{
    BacklogCacheEntry, ConflictKind, ConflictRecord, ConflictSnapshot, EntityType, MetadataEntry,
    Operation, OperationStatus, OperationType, ResolutionStrategy, SessionRecord,
};
