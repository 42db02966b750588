use std::time::Duration;

use tokio::process::Command;

use super::*;

#[tokio::test]
async fn test_signal() {
    let mut handler = SignalHandler::new()
        .with_signal(SignalKind::interrupt())
        .with_signal(SignalKind::terminate());

    // Signals can only be sent to the whole process, so target ourselves.
    let pid = std::process::id();

    Command::new("kill")
        .arg("-s")
        .arg("SIGINT")
        .arg(pid.to_string())
        .status()
        .await
        .expect("failed to send SIGINT");

    tokio::time::timeout(Duration::from_secs(1), handler.recv())
        .await
        .expect("failed to receive signal");

    Command::new("kill")
        .arg("-s")
        .arg("SIGTERM")
        .arg(pid.to_string())
        .status()
        .await
        .expect("failed to send SIGTERM");

    tokio::time::timeout(Duration::from_secs(1), handler.recv())
        .await
        .expect("failed to receive signal");
}
