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
    assert_eq!(config.broker.queue, "mappings");
    assert_eq!(config.broker.routing_key, "");
}

#[serial]
#[test]
fn test_parse_env() {
    clear_env();

    std::env::set_var("SDA_BROKER_PREFETCH", "10");

    let config = AppConfig::parse().expect("Failed to parse config");
    assert_eq!(config.broker.prefetch, 10);

    clear_env();
}
