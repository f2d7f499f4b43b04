//! Data models for the CodeLink backend.
//!
//! Field names follow the camelCase JSON the mobile client writes into the store.

mod comment;
mod message;
mod notification;
mod publication;
mod revision;
mod user;

pub use comment::*;
pub use message::*;
pub use notification::*;
pub use publication::*;
pub use revision::*;
pub use user::*;

use chrono::Utc;

/// Seconds since the Unix epoch, with millisecond precision.
pub type Timestamp = f64;

/// Current time as a store timestamp.
pub fn now_timestamp() -> Timestamp {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
