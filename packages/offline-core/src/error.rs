//! Programmer-error types for the merge engine.
//!
//! Conflicts themselves are never errors -- they are [`crate::model::ConflictRecord`]
//! values routed to the caller. These variants cover only misuse of the API.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("no automatic strategy for conflict kind {kind:?} under policy manual")]
    ManualResolutionRequired { kind: crate::model::ConflictKind },

    #[error("cannot merge: both local and server sides are missing")]
    NothingToMerge,
}
