//! Template resolver (C3) and catalog writer (C4).
//!
//! Grounded on `database/connection_pool.rs`'s pool-usage pattern for the
//! store side and `enterprise/cache/mod.rs`'s module-doc register for
//! style; the event-on-write idea is grounded on
//! `other_examples/.../consumer.rs.rs`'s `EventEnvelope` shape.

pub mod catalog;
pub mod resolver;

pub use catalog::TemplateCatalog;
pub use resolver::TemplateResolver;
