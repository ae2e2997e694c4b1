//! Spotify lookups.

use crate::cli::icons::{error, warning};
use crate::config::Config;
use crate::integrations::Integrations;

pub async fn cmd_artwork(config: &Config, track: &str, artist: &str, json: bool) -> anyhow::Result<()> {
    let integrations = Integrations::from_config(config).await?;
    let spotify = &integrations.spotify;
    let url = match spotify.try_track_artwork(track, artist).await {
        Ok(Some(url)) => url,
        Ok(None) => {
            eprintln!("{} No artwork found, using the default", warning());
            spotify.default_artwork().to_string()
        }
        Err(e) => {
            eprintln!("{} Artwork lookup failed: {}", error(), e);
            spotify.default_artwork().to_string()
        }
    };
    integrations.cache.flush().await;

    if json {
        println!("{}", serde_json::json!({ "track": track, "artist": artist, "artwork": url }));
    } else {
        println!("{}", url);
    }
    Ok(())
}
