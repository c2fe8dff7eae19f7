use tracing_subscriber::{EnvFilter, fmt};

/// Directives used when `RUST_LOG` is unset: our crates at `info`, chatty
/// dependencies only when they warn.
pub const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,hyper=warn,reqwest=warn";

/// Initialise the global tracing subscriber.
///
/// Respects `RUST_LOG`; falls back to [`DEFAULT_DIRECTIVES`]. Request and
/// response bodies from the HTTP gateway show up with
/// `RUST_LOG=blocktasks_chain=debug`.
pub fn init() {
    fmt()
        .with_env_filter(filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(true)
        .init();
}

fn filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}
