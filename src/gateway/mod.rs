//! HTTP surface: access gate and server assembly

pub mod auth;
mod server;

pub use auth::{AccessGate, GateDecision, MethodPolicy, RequestContext, TokenVerifier, gate_middleware};
pub use server::{ProxyServer, create_router, whoami};
