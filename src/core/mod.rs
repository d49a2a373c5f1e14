// Core modules implementing decoding, the request store, status text, and errors.
pub mod decode;
pub mod error;
pub mod status;
pub mod store;
