//! HTTP client, reconciliation poller and session layer for ComfyStudio.
//!
//! Talks to the project store / generation backend over its JSON API,
//! keeps locally-optimistic node state converged with the store by
//! polling, and exposes the explicit session state a front end renders.

pub mod api;
pub mod config;
pub mod events;
pub mod poller;
pub mod session;
pub mod state;
