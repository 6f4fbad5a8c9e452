//! `palisade-sequences` — tenant-scoped document numbering.
//!
//! The pure state machine behind human-readable document numbers: a counter
//! that only ever moves forward by `step`, except when a configured calendar
//! reset boundary is crossed. All IO (row locking, persistence) lives in the
//! infra crate; this crate is deterministic and fully unit-testable.

pub mod sequence;

pub use sequence::{NextValue, NumberSequence, ResetMode};
