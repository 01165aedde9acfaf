//! Persistence of immutable trading records.
//!
//! The engine emits records; storage stays dumb. JSON Lines with daily
//! rotation: every line is a complete JSON object, so an interrupted
//! write corrupts at most one line and files remain greppable.

pub mod error;
pub mod records;
pub mod writer;

pub use error::{PersistenceError, PersistenceResult};
pub use records::{PositionRecord, Record, SignalRecord, TradeRecord};
pub use writer::{spawn_recorder, JsonLinesWriter};
