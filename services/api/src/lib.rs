//! Interview API Library Crate
//!
//! HTTP and WebSocket surface of the interview agent: application state,
//! REST handlers, the in-process room hub and routing. The `api` binary is a
//! thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
