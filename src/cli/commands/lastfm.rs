//! Last.fm lookups.

use console::style;

use crate::cli::icons::warning;
use crate::config::Config;
use crate::integrations::{Integrations, Period};

pub async fn cmd_recent(config: &Config, user: &str, json: bool) -> anyhow::Result<()> {
    let integrations = Integrations::from_config(config).await?;
    let track = integrations.lastfm.recent_track(user).await?;
    integrations.cache.flush().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&track)?);
        return Ok(());
    }

    match track {
        Some(track) => {
            let status = if track.now_playing {
                style("Now playing").green().bold()
            } else {
                style("Last played").dim()
            };
            println!("{}: {} - {}", status, style(&track.artist).bold(), track.name);
            if let Some(album) = &track.album {
                println!("  Album: {}", album);
            }
            if let Some(image) = &track.image_url {
                println!("  Cover: {}", image);
            }
        }
        None => println!("{} No recent tracks for {}", warning(), user),
    }
    Ok(())
}

pub async fn cmd_top_artists(
    config: &Config,
    user: &str,
    period: Period,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let integrations = Integrations::from_config(config).await?;
    let artists = integrations.lastfm.top_artists(user, period, limit).await?;
    integrations.cache.flush().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&artists)?);
        return Ok(());
    }

    if artists.is_empty() {
        println!("{} No top artists for {} ({})", warning(), user, period);
        return Ok(());
    }

    println!("Top artists for {} ({}):", style(user).bold(), period);
    for (rank, artist) in artists.iter().enumerate() {
        println!(
            "  {:>2}. {} {}",
            rank + 1,
            artist.name,
            style(format!("({} plays)", artist.play_count)).dim()
        );
    }
    Ok(())
}
