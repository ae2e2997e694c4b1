//! Cache maintenance commands.

use console::style;

use crate::cli::icons::{success, warning};
use crate::config::Config;
use crate::integrations::{lastfm, spotify, Integrations};

const KNOWN_KINDS: [&str; 3] = [
    lastfm::RECENT_KIND,
    lastfm::TOP_ARTISTS_KIND,
    spotify::ARTWORK_KIND,
];

pub async fn cmd_clear(config: &Config, kind: &str, id: &str) -> anyhow::Result<()> {
    if !KNOWN_KINDS.contains(&kind) {
        eprintln!(
            "{} '{}' is not a known cache kind ({})",
            warning(),
            kind,
            KNOWN_KINDS.join(", ")
        );
    }

    // Integrations key every resource by its lowercased name.
    let id = id.trim().to_lowercase();
    let integrations = Integrations::from_config(config).await?;
    let removed = integrations.cache.clear_resource(kind, &id).await;
    println!(
        "{} Cleared {} for {} ({} stored key(s) removed)",
        success(),
        style(kind).bold(),
        id,
        removed
    );
    Ok(())
}
