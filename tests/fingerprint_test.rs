use pgkeep::resource::descriptor::{Destination, ResourceDescriptor, Server};
use pgkeep::resource::fingerprint::{evaluate, fingerprint, has_drifted, Drift, FingerprintMode};
use pgkeep::state::models::EnvironmentVariable;

fn database() -> ResourceDescriptor {
    let server = Server::new("edge-1", "203.0.113.7");
    let mut db = ResourceDescriptor::new("orders", Destination::StandaloneDocker { server });
    db.set_ports_mappings(Some("5433:5432"));
    db.postgres_initdb_args = Some("--data-checksums".to_string());
    db.postgres_host_auth_method = Some("scram-sha-256".to_string());
    db
}

fn env(resource: &ResourceDescriptor, pairs: &[(&str, &str)]) -> Vec<EnvironmentVariable> {
    pairs
        .iter()
        .map(|(k, v)| EnvironmentVariable::new(&resource.id, k, v))
        .collect()
}

#[test]
fn test_equal_configuration_gives_equal_fingerprint() {
    let a = database();
    let b = database();
    let env_a = env(&a, &[("POSTGRES_MAX_CONN", "200"), ("TZ", "UTC")]);
    let env_b = env(&b, &[("TZ", "UTC"), ("POSTGRES_MAX_CONN", "200")]);

    let mode = FingerprintMode::default();
    assert_eq!(
        fingerprint(&a.config_surface(), &env_a, mode),
        fingerprint(&b.config_surface(), &env_b, mode)
    );
}

#[test]
fn test_each_field_changes_fingerprint() {
    let base = database();
    let vars = env(&base, &[("TZ", "UTC")]);
    let mode = FingerprintMode::Values;
    let baseline = fingerprint(&base.config_surface(), &vars, mode);

    let mut changed = base.clone();
    changed.image = "postgres:17-alpine".to_string();
    assert_ne!(fingerprint(&changed.config_surface(), &vars, mode), baseline);

    let mut changed = base.clone();
    changed.set_ports_mappings(Some("6543:5432"));
    assert_ne!(fingerprint(&changed.config_surface(), &vars, mode), baseline);

    let mut changed = base.clone();
    changed.postgres_initdb_args = None;
    assert_ne!(fingerprint(&changed.config_surface(), &vars, mode), baseline);

    let mut changed = base.clone();
    changed.postgres_host_auth_method = Some("md5".to_string());
    assert_ne!(fingerprint(&changed.config_surface(), &vars, mode), baseline);

    let other_vars = env(&base, &[("TZ", "Europe/Berlin")]);
    assert_ne!(fingerprint(&base.config_surface(), &other_vars, mode), baseline);
}

#[test]
fn test_fields_outside_surface_do_not_matter() {
    let base = database();
    let mode = FingerprintMode::Values;
    let baseline = fingerprint(&base.config_surface(), &[], mode);

    let mut changed = base.clone();
    changed.name = "renamed".to_string();
    changed.is_public = true;
    changed.public_port = Some(6543);
    assert_eq!(fingerprint(&changed.config_surface(), &[], mode), baseline);
}

#[test]
fn test_value_mode_ignores_keys() {
    let db = database();
    let a = env(&db, &[("A", "1"), ("B", "2")]);
    let b = env(&db, &[("A", "2"), ("B", "1")]);

    assert_eq!(
        fingerprint(&db.config_surface(), &a, FingerprintMode::Values),
        fingerprint(&db.config_surface(), &b, FingerprintMode::Values)
    );
    assert_ne!(
        fingerprint(&db.config_surface(), &a, FingerprintMode::KeyValuePairs),
        fingerprint(&db.config_surface(), &b, FingerprintMode::KeyValuePairs)
    );
}

#[test]
fn test_digest_is_sha256_hex() {
    let db = database();
    let digest = fingerprint(&db.config_surface(), &[], FingerprintMode::Values);
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_evaluate() {
    assert_eq!(evaluate(None, "abc"), Drift::Unrecorded);
    assert_eq!(evaluate(Some("abc"), "abc"), Drift::Unchanged);
    assert_eq!(evaluate(Some("abc"), "def"), Drift::Changed);
    assert!(Drift::Unrecorded.is_drifted());
    assert!(!Drift::Unchanged.is_drifted());
}

#[test]
fn test_no_prior_hash_is_drift() {
    let mut db = database();
    assert!(db.config_hash().is_none());

    assert!(has_drifted(&mut db, &[], FingerprintMode::Values, false));
    assert!(db.config_hash().is_none(), "not persisted without persist");

    assert!(has_drifted(&mut db, &[], FingerprintMode::Values, true));
    assert!(db.config_hash().is_some());
    assert!(!has_drifted(&mut db, &[], FingerprintMode::Values, true));
}
