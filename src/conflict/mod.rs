//! Conflict - mutually exclusive candidate spends of one outpoint
//!
//! Stateless. The caller supplies the outpoint, a key and at least two
//! [`CandidateSpec`]s; the result is a [`ConflictSet`] of signed
//! transactions ready for an external broadcaster.

mod builder;
mod fee;
mod types;

pub use builder::build_conflict_set;
pub use fee::{resolve_fee, smart_rate};
pub use types::{
    CandidateInput, CandidateOutput, CandidateSpec, CandidateTransaction, ConflictSet, FeeSpec, OutpointDescriptor,
    RejectedCandidate,
};
