//! The real execution path: synchronization against broker positions,
//! stop conversion, audit comments, and order submission.

mod comment;
mod executor;
mod price_converter;
mod sync;

pub use comment::AuditComment;
pub use executor::{Ack, AckStatus, Executor};
pub use price_converter::{ConvertError, PriceConverter, StopLevels};
pub use sync::{Decision, SyncOutcome, SyncState};
