use super::*;

#[test]
fn test_status_round_trip() {
    for status in [
        FileStatus::Registered,
        FileStatus::Uploaded,
        FileStatus::Submitted,
        FileStatus::Archived,
        FileStatus::Completed,
        FileStatus::Ready,
        FileStatus::Error,
    ] {
        let parsed = FileStatus::try_from(status.as_str().to_string())
            .expect("status should parse back");
        assert_eq!(parsed, status);
    }
}

#[test]
fn test_status_unknown() {
    let err = FileStatus::try_from("PENDING".to_string()).expect_err("should not parse");
    assert!(err.contains("PENDING"));
}

#[test]
fn test_status_display() {
    assert_eq!(FileStatus::Archived.to_string(), "ARCHIVED");
    assert_eq!(FileStatus::Ready.to_string(), "READY");
}
