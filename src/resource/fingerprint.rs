use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::descriptor::ResourceDescriptor;
use crate::state::models::EnvironmentVariable;

/// The mutable configuration that requires a container to be recreated when
/// it changes.
#[derive(Debug, Clone, Copy)]
pub struct ConfigSurface<'a> {
    pub image: &'a str,
    pub ports_mappings: Option<&'a str>,
    pub postgres_initdb_args: Option<&'a str>,
    pub postgres_host_auth_method: Option<&'a str>,
}

/// Which part of the environment variables feeds the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintMode {
    /// Sorted values only. Moving a value between keys is not detected.
    #[default]
    Values,
    /// Sorted `(key, value)` pairs.
    KeyValuePairs,
}

/// Outcome of comparing the stored fingerprint with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    /// No fingerprint was ever recorded.
    Unrecorded,
    Unchanged,
    Changed,
}

impl Drift {
    pub fn is_drifted(&self) -> bool {
        !matches!(self, Drift::Unchanged)
    }
}

/// SHA-256 hex digest over the configuration surface and environment.
pub fn fingerprint(
    surface: &ConfigSurface<'_>,
    env: &[EnvironmentVariable],
    mode: FingerprintMode,
) -> String {
    let mut input = String::new();
    input.push_str(surface.image);
    input.push_str(surface.ports_mappings.unwrap_or_default());
    input.push_str(surface.postgres_initdb_args.unwrap_or_default());
    input.push_str(surface.postgres_host_auth_method.unwrap_or_default());
    input.push_str(&environment_json(env, mode));

    hex::encode(Sha256::digest(input.as_bytes()))
}

fn environment_json(env: &[EnvironmentVariable], mode: FingerprintMode) -> String {
    // Serializing a list of strings or string pairs cannot fail.
    match mode {
        FingerprintMode::Values => {
            let mut values: Vec<&str> = env.iter().map(|e| e.value.as_str()).collect();
            values.sort_unstable();
            serde_json::to_string(&values).unwrap_or_default()
        }
        FingerprintMode::KeyValuePairs => {
            let mut pairs: Vec<(&str, &str)> = env
                .iter()
                .map(|e| (e.key.as_str(), e.value.as_str()))
                .collect();
            pairs.sort_unstable_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
            serde_json::to_string(&pairs).unwrap_or_default()
        }
    }
}

/// Compare a previously recorded digest with a freshly computed one.
pub fn evaluate(prior: Option<&str>, digest: &str) -> Drift {
    match prior {
        None => Drift::Unrecorded,
        Some(prior) if prior == digest => Drift::Unchanged,
        Some(_) => Drift::Changed,
    }
}

/// Whether the resource's configuration differs from what was last committed.
///
/// With `persist`, a drifted resource gets the new digest recorded in memory;
/// the caller is responsible for saving it.
pub fn has_drifted(
    resource: &mut ResourceDescriptor,
    env: &[EnvironmentVariable],
    mode: FingerprintMode,
    persist: bool,
) -> bool {
    let digest = fingerprint(&resource.config_surface(), env, mode);
    let drift = evaluate(resource.config_hash(), &digest);
    tracing::debug!(uuid = %resource.uuid, drift = ?drift, "Configuration fingerprint evaluated");

    if persist && drift.is_drifted() {
        resource.set_config_hash(digest);
    }
    drift.is_drifted()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<EnvironmentVariable> {
        pairs
            .iter()
            .map(|(k, v)| EnvironmentVariable::new("res-1", k, v))
            .collect()
    }

    fn surface() -> ConfigSurface<'static> {
        ConfigSurface {
            image: "postgres:16-alpine",
            ports_mappings: Some("5433:5432"),
            postgres_initdb_args: None,
            postgres_host_auth_method: Some("scram-sha-256"),
        }
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        let digest = fingerprint(&surface(), &[], FingerprintMode::Values);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_value_order_is_irrelevant() {
        let a = env(&[("A", "1"), ("B", "2"), ("C", "3")]);
        let b = env(&[("C", "3"), ("A", "1"), ("B", "2")]);
        assert_eq!(
            fingerprint(&surface(), &a, FingerprintMode::Values),
            fingerprint(&surface(), &b, FingerprintMode::Values)
        );
    }

    #[test]
    fn test_values_mode_ignores_keys() {
        let a = env(&[("A", "1"), ("B", "2")]);
        let b = env(&[("A", "2"), ("B", "1")]);
        assert_eq!(
            fingerprint(&surface(), &a, FingerprintMode::Values),
            fingerprint(&surface(), &b, FingerprintMode::Values)
        );
        assert_ne!(
            fingerprint(&surface(), &a, FingerprintMode::KeyValuePairs),
            fingerprint(&surface(), &b, FingerprintMode::KeyValuePairs)
        );
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(evaluate(None, "abc"), Drift::Unrecorded);
        assert_eq!(evaluate(Some("abc"), "abc"), Drift::Unchanged);
        assert_eq!(evaluate(Some("abd"), "abc"), Drift::Changed);
        assert!(Drift::Unrecorded.is_drifted());
        assert!(!Drift::Unchanged.is_drifted());
    }
}
