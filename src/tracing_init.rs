//! Structured logging bootstrap.
//!
//! Every binary calls [`init`] once at startup. Format is selected by
//! `LOG_FORMAT` (`json` or `compact`, default `compact`); verbosity by the
//! usual `RUST_LOG` env-filter syntax.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).compact().init();
    }
}
