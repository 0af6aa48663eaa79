#![forbid(unsafe_code)]

pub mod endpoint;
pub mod time;

pub use endpoint::{DEFAULT_PORT, EndpointError, QuicEndpoint};
pub use time::{Clock, ManualClock, SystemClock, unix_ms_now};
