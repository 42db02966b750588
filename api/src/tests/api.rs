use std::time::Duration;

use crate::api::check_broker;

#[tokio::test]
async fn test_check_broker_up() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get addr");

    check_broker(&addr.to_string(), Duration::from_millis(100))
        .await
        .expect("listening socket should pass the probe");
}

#[tokio::test]
async fn test_check_broker_down() {
    // Bind and drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get addr");
    drop(listener);

    assert!(
        check_broker(&addr.to_string(), Duration::from_millis(100))
            .await
            .is_err()
    );
}
