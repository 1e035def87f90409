use super::*;
use tokio::io::AsyncBufReadExt;

#[test]
fn picks_first_acm_device() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["ttyS0", "ttyACM1", "ttyACM0", "ttyUSB0"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }

    let port = find_port(dir.path()).unwrap();
    assert_eq!(port, Some(dir.path().join("ttyACM0")));
}

#[test]
fn no_acm_device() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ttyS0"), "").unwrap();
    assert_eq!(find_port(dir.path()).unwrap(), None);
}

#[tokio::test]
async fn reads_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ttyACM0");
    std::fs::write(&path, "I1 T20.0\nI1 T20.1\n").unwrap();

    let mut lines = open(&path).await.unwrap().lines();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("I1 T20.0"));
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("I1 T20.1"));
    assert_eq!(lines.next_line().await.unwrap(), None);
}
