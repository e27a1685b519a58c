use crate::{AppConfig, ConfigError, StoreConfig, StoreLocation};
use figment::{
    Figment,
    providers::{Format, Toml},
};
use secrecy::{ExposeSecret, Secret};
use std::time::Duration;

fn from_toml(toml: &str) -> Result<AppConfig, ConfigError> {
    AppConfig::from_figment(Figment::new().merge(Toml::string(toml)))
}

const UPSTREAM: &str = r#"
[ispyb]
host = "ispyb.example.org"
port = 4306
user = "reader"
password = "db-secret"

[ssh]
host = "bastion.example.org"
user = "tunnel"
password = "ssh-secret"
"#;

#[test]
fn test_secret_redaction() {
    let secret = Secret::new("my_secret_password".to_string());
    let debug_output = format!("{:?}", secret);
    assert!(debug_output.contains("Secret([REDACTED"));
    assert!(!debug_output.contains("my_secret_password"));
}

#[test]
fn test_defaults_without_upstream() {
    let config = from_toml("").unwrap();
    assert_eq!(config.app_env, "development");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.cache.ttl(), Duration::from_secs(120));
    assert_eq!(config.cache.ping_ttl(), Duration::from_secs(10));
    assert_eq!(config.store.retry_attempts, 3);
    assert!(config.query_key.is_none());
    assert!(!config.has_upstream());
}

#[test]
fn test_upstream_config() {
    let config = from_toml(UPSTREAM).unwrap();
    let ispyb = config.ispyb.as_ref().unwrap();
    assert_eq!(ispyb.database, "db");
    assert_eq!(ispyb.conn_inactivity(), Duration::from_secs(360));
    assert_eq!(ispyb.proposal_codes, vec!["lb", "sw"]);
    assert_eq!(ispyb.procedure, "retrieve_sessions_for_person_login");
    assert_eq!(ispyb.password.expose_secret(), "db-secret");
    assert_eq!(config.ssh.as_ref().unwrap().port, 22);

    let debug_output = format!("{:?}", config);
    assert!(!debug_output.contains("db-secret"));
    assert!(!debug_output.contains("ssh-secret"));
}

#[test]
fn test_upstream_requires_ssh() {
    let toml = r#"
[ispyb]
host = "ispyb.example.org"
port = 4306
user = "reader"
password = "db-secret"
"#;
    assert!(matches!(from_toml(toml), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_ssh_requires_credentials() {
    let toml = UPSTREAM.replace("password = \"ssh-secret\"", "");
    assert!(matches!(from_toml(&toml), Err(ConfigError::Invalid(_))));

    let with_key = UPSTREAM.replace(
        "password = \"ssh-secret\"",
        "private_key_filename = \"/run/secrets/id_ed25519\"",
    );
    assert!(from_toml(&with_key).is_ok());
}

#[test]
fn test_procedure_must_be_identifier() {
    let toml = format!("{}\n", UPSTREAM).replace(
        "[ssh]",
        "procedure = \"x(); DROP TABLE y\"\n\n[ssh]",
    );
    assert!(matches!(from_toml(&toml), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_missing_required_field_is_load_error() {
    let toml = r#"
[ssh]
host = "bastion"
"#;
    assert!(matches!(from_toml(toml), Err(ConfigError::Load(_))));
}

#[test]
fn test_store_location() {
    let mut store = StoreConfig::default();
    assert_eq!(
        store.location(),
        StoreLocation::Redis("redis://localhost:6379".to_string())
    );

    store.location = "cache:1234".to_string();
    assert_eq!(
        store.location(),
        StoreLocation::Redis("redis://cache:1234".to_string())
    );

    store.location = "rediss://cache.internal:6380/1".to_string();
    assert_eq!(
        store.location(),
        StoreLocation::Redis("rediss://cache.internal:6380/1".to_string())
    );

    store.location = "memory".to_string();
    assert_eq!(store.location(), StoreLocation::Memory);
}
