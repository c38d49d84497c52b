//! Auth core (C5) and audit logging, grounded on the donor's `enterprise`
//! namespace but trimmed to the two concerns spec actually names. The
//! donor's cloud/collaboration/marketplace/analytics/licensing/workflow/
//! security/crypto/compliance/cluster/tenant/graphql/eventsource/tracing/
//! ratelimit submodules, its `EnterpriseManager` facade, and its
//! multi-tier `cache` submodule are dropped: the first set has no
//! counterpart in a notification platform, and the cache concern is now
//! owned by the top-level [`crate::cache`] module.

pub mod audit;
pub mod auth;
