//! Numbered credential slots read from the environment.

use serde::{Deserialize, Serialize};

use super::Credential;

/// Default number of slots probed per credential family.
pub const DEFAULT_SLOTS: usize = 10;

/// Where a service's credentials live in the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotConfig {
    /// API keys under `key_var`, `key_var_1`, ...
    ApiKeys {
        key_var: String,
        #[serde(default = "default_slots")]
        slots: usize,
    },
    /// Client id/secret pairs under matching numbered names.
    ClientPairs {
        client_id_var: String,
        client_secret_var: String,
        #[serde(default = "default_slots")]
        slots: usize,
    },
}

fn default_slots() -> usize {
    DEFAULT_SLOTS
}

impl SlotConfig {
    pub fn api_keys(key_var: &str) -> Self {
        SlotConfig::ApiKeys {
            key_var: key_var.to_string(),
            slots: DEFAULT_SLOTS,
        }
    }

    pub fn client_pairs(client_id_var: &str, client_secret_var: &str) -> Self {
        SlotConfig::ClientPairs {
            client_id_var: client_id_var.to_string(),
            client_secret_var: client_secret_var.to_string(),
            slots: DEFAULT_SLOTS,
        }
    }

    /// Read every slot using `lookup`, in slot order.
    pub fn read_with<L>(&self, lookup: L) -> Vec<Option<Credential>>
    where
        L: Fn(&str) -> Option<String>,
    {
        match self {
            SlotConfig::ApiKeys { key_var, slots } => api_keys_from(lookup, key_var, *slots),
            SlotConfig::ClientPairs {
                client_id_var,
                client_secret_var,
                slots,
            } => client_pairs_from(lookup, client_id_var, client_secret_var, *slots),
        }
    }

    /// Read every slot from the process environment.
    pub fn read_env(&self) -> Vec<Option<Credential>> {
        self.read_with(|name| std::env::var(name).ok())
    }
}

/// Slot names for a prefix: `PREFIX`, `PREFIX_1`, ... (`slots` names total).
pub fn slot_names(prefix: &str, slots: usize) -> Vec<String> {
    (0..slots)
        .map(|n| {
            if n == 0 {
                prefix.to_string()
            } else {
                format!("{}_{}", prefix, n)
            }
        })
        .collect()
}

/// API keys found under the numbered names of `prefix`.
pub fn api_keys_from<L>(lookup: L, prefix: &str, slots: usize) -> Vec<Option<Credential>>
where
    L: Fn(&str) -> Option<String>,
{
    slot_names(prefix, slots)
        .iter()
        .map(|name| lookup(name).map(Credential::ApiKey))
        .collect()
}

/// Client pairs found under matching numbered id/secret names.
/// A slot with only one half set yields `None`.
pub fn client_pairs_from<L>(
    lookup: L,
    id_prefix: &str,
    secret_prefix: &str,
    slots: usize,
) -> Vec<Option<Credential>>
where
    L: Fn(&str) -> Option<String>,
{
    slot_names(id_prefix, slots)
        .iter()
        .zip(slot_names(secret_prefix, slots).iter())
        .map(|(id_name, secret_name)| match (lookup(id_name), lookup(secret_name)) {
            (Some(client_id), Some(client_secret)) => Some(Credential::ClientPair {
                client_id,
                client_secret,
            }),
            _ => None,
        })
        .collect()
}
