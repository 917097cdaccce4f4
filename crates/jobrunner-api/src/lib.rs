//! HTTP façade for the job runner.
//!
//! Provides the REST API (`routes`) and the outbound webhook emitter
//! (`webhook`) that fires once per job on terminal transition.

pub mod error;
pub mod routes;
pub mod state;
pub mod webhook;

pub use state::AppState;
