//! HTTP transport and stream framing used by the remote engine.

pub mod http;
pub mod sse;

pub use http::{HttpTransport, TransportError};
pub use sse::decode_sse;
