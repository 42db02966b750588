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
    assert_eq!(config.broker.queue, "inbox");
    assert_eq!(config.broker.routing_key, "archived");
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
[inbox]
type = "posix"
path = "/srv/inbox"

[archive]
type = "s3"
endpoint = "https://s3.internal:9000"
bucket = "archive"
"#,
    )
    .expect("Failed to write config file");

    std::env::set_var(
        "SDA_CONFIG_FILE",
        config_file.to_str().expect("Failed to get str"),
    );

    let config = AppConfig::parse().expect("Failed to parse config");

    assert_eq!(
        config.inbox,
        common::config::StorageConfig::Posix(common::config::PosixConfig {
            path: "/srv/inbox".to_string(),
        })
    );
    assert_eq!(
        config.archive,
        common::config::StorageConfig::S3(common::config::S3Config {
            endpoint: "https://s3.internal:9000".to_string(),
            bucket: "archive".to_string(),
            ..Default::default()
        })
    );

    clear_env();
}
