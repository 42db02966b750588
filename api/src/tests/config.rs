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
    assert_eq!(config.api.port, 8080);
    assert!(config.api.server_cert.is_none());
}

#[serial]
#[test]
fn test_parse_env() {
    clear_env();

    std::env::set_var("SDA_API_PORT", "9090");
    std::env::set_var("SDA_API_HOST", "127.0.0.1");

    let config = AppConfig::parse().expect("Failed to parse config");
    assert_eq!(config.api.port, 9090);
    assert_eq!(config.api.host, "127.0.0.1");

    clear_env();
}
