//! Request forwarding to deployed functions

pub mod payload;

pub use payload::{relay_response, Payload, EXECUTE_TIMEOUT};
