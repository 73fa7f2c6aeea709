//! Utilities shared by the Kumitate server and client.

pub mod backoff;
pub mod logger;
pub mod time;
