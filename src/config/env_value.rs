// ABOUTME: Values of an application's `env:` block in flotilla.yml.
// ABOUTME: Scalars pass through as text; `{env, default}` mappings read the control node's environment.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// One entry of an application's environment.
///
/// ```yaml
/// env:
///   RUST_LOG: info
///   PORT: 8080
///   DATABASE_URL: { env: SHOP_DATABASE_URL }
///   REGION: { env: SHOP_REGION, default: eu-west-1 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Written into the workload as is.
    Plain(String),
    /// Read from the control node's environment when targets are seeded.
    Host { env: String, default: Option<String> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnvValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
    Host {
        env: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl<'de> Deserialize<'de> for EnvValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match RawEnvValue::deserialize(deserializer)? {
            RawEnvValue::Text(text) => EnvValue::Plain(text),
            RawEnvValue::Integer(n) => EnvValue::Plain(n.to_string()),
            RawEnvValue::Float(n) => EnvValue::Plain(n.to_string()),
            RawEnvValue::Flag(b) => EnvValue::Plain(b.to_string()),
            RawEnvValue::Host { env, default } => EnvValue::Host { env, default },
        })
    }
}

impl EnvValue {
    /// The text handed to the workload.
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Plain(text) => Ok(text.clone()),
            EnvValue::Host { env, default } => std::env::var(env)
                .ok()
                .or_else(|| default.clone())
                .ok_or_else(|| Error::MissingEnvVar(env.clone())),
        }
    }

    /// Resolve a whole `env:` block, failing on the first unset variable.
    pub fn resolve_all(values: &BTreeMap<String, EnvValue>) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for (key, value) in values {
            resolved.insert(key.clone(), value.resolve()?);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_become_text() {
        let values: BTreeMap<String, EnvValue> =
            serde_yaml::from_str("PORT: 8080\nDEBUG: true\nRATIO: 0.5\nNAME: shop\n").unwrap();
        assert_eq!(values["PORT"], EnvValue::Plain("8080".into()));
        assert_eq!(values["DEBUG"], EnvValue::Plain("true".into()));
        assert_eq!(values["RATIO"], EnvValue::Plain("0.5".into()));
        assert_eq!(values["NAME"], EnvValue::Plain("shop".into()));
    }
}
