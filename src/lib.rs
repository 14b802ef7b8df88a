//! planstream: streaming bridge between a curriculum-generation worker
//! process and HTTP clients.
//!
//! The server spawns one worker per request, relays its stdout as a framed
//! event stream over a long-lived chunked response, and always ends the
//! stream with exactly one terminal event. The client side incrementally
//! decodes the stream and drives a session state machine to `Ready` or
//! `Errored`.

pub mod client;
pub mod config;
pub mod errors;
pub mod plan;
pub mod server;
pub mod stream;
pub mod worker;
