//! Purpose: Library crate behind the `wa-inspect` CLI and its tests.
//! Exports: `core` (decode pipeline, request store, status model, errors) and `api`.
//! Role: Holds the interception and decode logic; the binary only wires it to HTTP and clap.
//! Invariants: All inspector state lives in an explicit `api::Inspector`; no globals.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
