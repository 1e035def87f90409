use super::*;
use serde_json::json;

fn job(document: serde_json::Value) -> JobExecution {
    JobExecution::new("42", document)
}

#[tokio::test]
async fn document_without_command_is_a_no_op() {
    let worker = CommandWorker::new();
    worker.execute(&job(json!({ "operation": "reboot-later" }))).await.unwrap();
    worker.execute(&job(serde_json::Value::Null)).await.unwrap();
}

#[tokio::test]
async fn non_string_args_are_invalid() {
    let err = CommandWorker::new()
        .execute(&job(json!({ "command": "true", "args": [1, 2] })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDocument(_)));
}

#[tokio::test]
async fn successful_command() {
    CommandWorker::new()
        .execute(&job(json!({ "command": "sh", "args": ["-c", "exit 0"] })))
        .await
        .unwrap();
}

#[tokio::test]
async fn failing_command_reports_exit_status() {
    let err = CommandWorker::new()
        .execute(&job(json!({ "command": "sh", "args": ["-c", "exit 3"] })))
        .await
        .unwrap_err();
    match err {
        Error::Exited { program, status } => {
            assert_eq!(program, "sh");
            assert_eq!(status.code(), Some(3));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_program_fails_to_spawn() {
    let err = CommandWorker::new()
        .execute(&job(json!({ "command": "/nonexistent/definitely-not-here" })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }));
}

#[tokio::test]
async fn slow_command_times_out() {
    let err = CommandWorker::new()
        .with_timeout(Some(Duration::from_millis(100)))
        .execute(&job(json!({ "command": "sleep", "args": ["5"] })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TimedOut { .. }));
}

#[tokio::test]
async fn runs_in_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    CommandWorker::new()
        .with_working_dir(Some(dir.path().to_path_buf()))
        .execute(&job(json!({ "command": "sh", "args": ["-c", "touch ran"] })))
        .await
        .unwrap();
    assert!(dir.path().join("ran").exists());
}
