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
    assert_eq!(config.broker.queue, "completed");
    assert_eq!(config.broker.routing_key, "backedup");
}

#[serial]
#[test]
fn test_parse_file() {
    clear_env();

    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_file = tmp_dir.path().join("config.toml");

    std::fs::write(
        &config_file,
        r#"
[backup]
type = "posix"
path = "/srv/backup"
"#,
    )
    .expect("Failed to write config file");

    std::env::set_var(
        "SDA_CONFIG_FILE",
        config_file.to_str().expect("Failed to get str"),
    );

    let config = AppConfig::parse().expect("Failed to parse config");
    assert_eq!(
        config.backup,
        common::config::StorageConfig::Posix(common::config::PosixConfig {
            path: "/srv/backup".to_string(),
        })
    );

    clear_env();
}
