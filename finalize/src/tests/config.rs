use serial_test::serial;

use crate::config::AppConfig;

fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("SDA_") {
            std::env::remove_var(key);
        }
    }
}

#[serial]
#[test]
fn test_parse() {
    clear_env();

    let config = AppConfig::parse().expect("Failed to parse config");
    assert_eq!(config, AppConfig::default());
    assert_eq!(config.broker.queue, "accession");
    assert_eq!(config.broker.routing_key, "completed");
}

#[serial]
#[test]
fn test_parse_env() {
    clear_env();

    std::env::set_var("SDA_NAME", "finalize-2");
    std::env::set_var("SDA_DATABASE_HOST", "db.internal");

    let config = AppConfig::parse().expect("Failed to parse config");
    assert_eq!(config.name, "finalize-2");
    assert_eq!(config.database.host, "db.internal");

    clear_env();
}
