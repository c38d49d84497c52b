//! HTTP surface: the gateway dispatcher (C6) and the template service
//! (C3/C4 read/write endpoints), plus the shared state, middleware, and
//! response envelope both binaries build on.
//!
//! Generalized from the donor's `api` module (same `mod.rs` re-export
//! shape: `handlers`, `middleware`, `responses`, `routes`) onto this
//! platform's two HTTP-facing binaries. The donor's `webhooks` submodule
//! and generic load-balancing `gateway` have no counterpart — C6 here is a
//! fixed dispatcher, not a reverse proxy.

pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;
pub mod state;
pub mod template_handlers;

pub use routes::{gateway_router, template_router};
pub use state::{GatewayState, TemplateServiceState};
