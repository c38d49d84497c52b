//! Shared application state for the gateway and template-service binaries.
//!
//! Generalized from the donor's `AppState` (a bare `db_pool`/`config` pair
//! behind an `Arc`) into the two states this crate's two HTTP-facing
//! binaries actually need: the gateway wires auth, cache, breaker, broker,
//! and health; the template service wires only the resolver and catalog.
//! The worker (C7) has no HTTP surface and needs neither.

use std::sync::Arc;

use crate::breaker::CircuitBreaker;
use crate::broker::BrokerClient;
use crate::cache::CacheClient;
use crate::config::Config;
use crate::enterprise::audit::AuditWriter;
use crate::enterprise::auth::AuthCore;
use crate::health::HealthAggregator;
use crate::store::UserRepository;
use crate::templates::{TemplateCatalog, TemplateResolver};

/// State backing `/auth/*`, `/notifications/*`, and `/health*` (C5, C6, C8).
#[derive(Clone)]
pub struct GatewayState {
    pub auth: AuthCore,
    pub cache: CacheClient,
    pub breaker: CircuitBreaker,
    pub broker: BrokerClient,
    pub users: UserRepository,
    pub audit: AuditWriter,
    pub health: Arc<HealthAggregator>,
    pub config: Arc<Config>,
}

/// State backing `/templates*` (C3, C4).
#[derive(Clone)]
pub struct TemplateServiceState {
    pub catalog: TemplateCatalog,
    pub resolver: TemplateResolver,
}
