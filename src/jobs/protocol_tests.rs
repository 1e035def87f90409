use super::*;
use serde_json::json;
use yare::parameterized;

fn topics() -> JobTopics {
    JobTopics::new("pi-barn-1").unwrap()
}

#[test]
fn topic_names() {
    let t = topics();
    assert_eq!(t.notify_next(), "$aws/things/pi-barn-1/jobs/notify-next");
    assert_eq!(t.start_next(), "$aws/things/pi-barn-1/jobs/start-next");
    assert_eq!(t.start_next_accepted(), "$aws/things/pi-barn-1/jobs/start-next/accepted");
    assert_eq!(t.update("42"), "$aws/things/pi-barn-1/jobs/42/update");
    assert_eq!(t.update_rejected("+"), "$aws/things/pi-barn-1/jobs/+/update/rejected");
}

#[parameterized(
    empty = { "" },
    slash = { "pi/1" },
    plus = { "pi+" },
    hash = { "#" },
)]
fn invalid_thing_names(name: &str) {
    assert!(matches!(JobTopics::new(name), Err(Error::InvalidThingName(_))));
}

#[parameterized(
    accepted = { "$aws/things/pi-barn-1/jobs/42/update/accepted", Some("42") },
    rejected = { "$aws/things/pi-barn-1/jobs/job-7/update/rejected", Some("job-7") },
    start_next = { "$aws/things/pi-barn-1/jobs/start-next/accepted", None },
    other_thing = { "$aws/things/pi-barn-2/jobs/42/update/accepted", None },
    bare_update = { "$aws/things/pi-barn-1/jobs/42/update", None },
)]
fn job_id_from_topic(topic: &str, expected: Option<&str>) {
    assert_eq!(topics().job_id_from_update_response(topic), expected);
}

#[test]
fn decodes_changed_event_with_execution() {
    let payload = json!({
        "timestamp": 1700000000,
        "execution": {
            "jobId": "42",
            "thingName": "pi-barn-1",
            "jobDocument": { "command": "echo", "args": ["hi"] },
            "status": "QUEUED",
            "versionNumber": 1,
            "executionNumber": 1
        }
    });
    let event: NextJobExecutionChangedEvent =
        decode("t", payload.to_string().as_bytes()).unwrap();

    let execution = event.execution.unwrap();
    assert_eq!(execution.job_id, "42");
    assert_eq!(execution.status, Some(JobStatus::Queued));
    assert_eq!(execution.job_document["command"], "echo");
}

#[test]
fn decodes_changed_event_without_execution() {
    let event: NextJobExecutionChangedEvent = decode("t", br#"{"timestamp": 1}"#).unwrap();
    assert!(event.execution.is_none());
}

#[test]
fn start_request_omits_unset_fields() {
    let request = StartNextPendingJobExecutionRequest {
        client_token: Some("tok".to_string()),
        ..Default::default()
    };
    let value: serde_json::Value = serde_json::from_slice(&encode(&request).unwrap()).unwrap();
    assert_eq!(value, json!({ "clientToken": "tok" }));
}

#[test]
fn update_request_keeps_job_id_out_of_payload() {
    let request = UpdateJobExecutionRequest::new("42", JobStatus::Succeeded);
    let value: serde_json::Value = serde_json::from_slice(&encode(&request).unwrap()).unwrap();
    assert_eq!(value, json!({ "status": "SUCCEEDED" }));
}

#[test]
fn update_ack_preserves_job_id() {
    let t = topics();
    let request = UpdateJobExecutionRequest::new("job-2024-10", JobStatus::Succeeded);
    let _ = encode(&request).unwrap();

    let ack = json!({
        "executionState": { "status": "SUCCEEDED", "versionNumber": 3 },
        "timestamp": 1700000001
    });
    let response = decode_update_accepted(
        &t,
        &t.update_accepted(&request.job_id),
        ack.to_string().as_bytes(),
    )
    .unwrap();

    assert_eq!(response.job_id, request.job_id);
    assert_eq!(response.execution_state.unwrap().status, JobStatus::Succeeded);
}

#[test]
fn update_ack_on_foreign_topic_is_rejected() {
    let err = decode_update_accepted(&topics(), "test/temp", b"{}").unwrap_err();
    assert!(matches!(err, Error::UnexpectedTopic(_)));
}

#[test]
fn rejected_error_display() {
    let rejected: RejectedError = decode(
        "t",
        br#"{"code":"InvalidStateTransition","message":"job is done","clientToken":"x"}"#,
    )
    .unwrap();
    assert_eq!(
        rejected.to_string(),
        "code:'InvalidStateTransition' message:'job is done'"
    );
}

#[test]
fn malformed_payload_names_topic() {
    let err = decode::<RejectedError>("some/topic", b"not json").unwrap_err();
    assert!(err.to_string().contains("some/topic"));
}
