//! Purpose: Define the public Rust API boundary for the inspector.
//! Exports: Inspector state handle, interceptor layer, outbound fetch service, core types.
//! Role: Public surface used by the CLI, the HTTP server, and integration tests.
//! Invariants: Callers reach store and decode primitives only through this module or `core`.

mod fetch;
mod inspector;
mod intercept;

pub use crate::core::decode::{
    DEFAULT_MAX_INFLATED_BYTES, DecodeError, DecodeStage, RecordOutcome, decode_payload,
    decode_payload_with_limit,
};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::status::{StatusView, WebsiteActions};
pub use crate::core::store::DecodedRequest;
pub use fetch::{FetchFuture, FetchResponse, UreqFetch};
pub use inspector::{Inspector, display_time};
pub use intercept::{Intercept, InterceptLayer, OutboundRequest, TRACKING_ENDPOINT};
