// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles server maps with shorthand entries and the non-empty application list.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::ServerConfig;
use super::application::ApplicationConfig;

pub fn deserialize_servers<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, ServerConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: BTreeMap<String, ServerEntry> = BTreeMap::deserialize(deserializer)?;
    entries
        .into_iter()
        .map(|(id, entry)| {
            entry
                .into_server_config()
                .map(|server| (id.clone(), server))
                .map_err(|e| serde::de::Error::custom(format!("server {}: {}", id, e)))
        })
        .collect()
}

pub fn deserialize_applications<'de, D>(
    deserializer: D,
) -> Result<NonEmpty<ApplicationConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let apps: Vec<ApplicationConfig> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(apps)
        .ok_or_else(|| serde::de::Error::custom("at least one application is required"))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerEntry {
    Simple(String),
    Detailed(ServerConfig),
}

impl ServerEntry {
    fn into_server_config(self) -> Result<ServerConfig, String> {
        match self {
            ServerEntry::Simple(s) => ServerConfig::parse(&s),
            ServerEntry::Detailed(c) => Ok(c),
        }
    }
}
