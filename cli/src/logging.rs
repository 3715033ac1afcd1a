//! Tracing initialisation for the `chainsync` binary.

use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log settings read from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Extra `RUST_LOG`-style directives layered over `level`.
    pub directives: Option<String>,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directives: None,
            json: false,
        }
    }
}

impl LogConfig {
    /// `LOG_LEVEL` (default `info`), `RUST_LOG` overrides, `LOG_FORMAT=json`.
    pub fn from_env() -> Self {
        Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            directives: env::var("RUST_LOG").ok().filter(|s| !s.trim().is_empty()),
            json: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    /// Directive string handed to [`EnvFilter`], e.g. `info,chainsync_evm=debug`.
    pub fn filter_directives(&self) -> String {
        match &self.directives {
            Some(extra) => format!("{},{}", self.level, extra),
            None => self.level.clone(),
        }
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
