//! biolink - profile enrichment from Last.fm and Spotify.
//!
//! Every outbound call goes through a per-API request governor that rotates
//! credentials, backs off on rate limits and caches responses.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if biolink::cli::is_verbose() {
        "biolink=info"
    } else {
        "biolink=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    biolink::cli::run().await
}
