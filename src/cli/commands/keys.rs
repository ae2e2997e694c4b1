//! Credential pool inspection.

use console::style;

use crate::cli::icons::{arrow, success, warning};
use crate::config::Config;
use crate::credentials::{KeyRotator, SlotConfig};

pub fn cmd_keys(config: &Config) -> anyhow::Result<()> {
    print_pool("Last.fm", &config.lastfm.keys);
    print_pool("Spotify", &config.spotify.credentials);
    Ok(())
}

fn print_pool(service: &str, slots: &SlotConfig) {
    let pool = KeyRotator::new(slots.read_env());
    let source = match slots {
        SlotConfig::ApiKeys { key_var, slots } => format!("{} ({} slots)", key_var, slots),
        SlotConfig::ClientPairs {
            client_id_var,
            client_secret_var,
            slots,
        } => format!("{} / {} ({} slots)", client_id_var, client_secret_var, slots),
    };

    if pool.is_empty() {
        println!(
            "{} {}: no credentials configured in {}",
            warning(),
            style(service).bold(),
            source
        );
        return;
    }

    println!(
        "{} {}: {} credential(s) from {}",
        success(),
        style(service).bold(),
        pool.len(),
        source
    );
    for credential in pool.valid_keys() {
        println!("  {} {}", arrow(), credential.masked());
    }
}
