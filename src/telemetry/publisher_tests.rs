use super::*;
use crate::transport::FakeTransport;
use serde_json::json;

fn publisher() -> (FakeTransport, TelemetryPublisher<FakeTransport>) {
    let transport = FakeTransport::new();
    let publisher = TelemetryPublisher::new(Arc::new(transport.clone()), "test/temp");
    (transport, publisher)
}

#[tokio::test]
async fn publishes_each_packet_line() {
    let (transport, publisher) = publisher();
    let input: &[u8] = b"I1 T20.5\n\nI2 T21 A0.1 0.2 0.3\n";

    let stats = publisher.run_lines(input).await.unwrap();

    assert_eq!(
        stats,
        PublishStats {
            published: 2,
            invalid: 0,
            failed: 0
        }
    );
    let sent = transport.published_to("test/temp");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].qos, QoS::AtLeastOnce);
    assert_eq!(
        sent[0].json(),
        json!({ "Device_ID": 1, "Data": { "Temperature": 20.5 } })
    );
    assert_eq!(
        sent[1].json(),
        json!({
            "Device_ID": 2,
            "Data": {
                "Temperature": 21.0,
                "Acceleration": { "x": 0.1, "y": 0.2, "z": 0.3 }
            }
        })
    );
}

#[tokio::test]
async fn bad_lines_are_skipped() {
    let (transport, publisher) = publisher();
    let input: &[u8] = b"garbage\nT20.0\nI3 Tabc\nI3 T19.5\n";

    let stats = publisher.run_lines(input).await.unwrap();
    assert_eq!((stats.published, stats.invalid), (1, 3));
    assert_eq!(
        transport.published()[0].json(),
        json!({ "Device_ID": 3, "Data": { "Temperature": 19.5 } })
    );
}

#[tokio::test]
async fn failed_publish_does_not_stop_the_loop() {
    let (transport, publisher) = publisher();
    transport.fail_publishes(true);

    let input: &[u8] = b"I1 T20.0\nI1 T20.1\nbad\n";
    let stats = publisher.run_lines(input).await.unwrap();
    assert_eq!(
        stats,
        PublishStats {
            published: 0,
            invalid: 1,
            failed: 2
        }
    );
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn samples_are_paced() {
    let (transport, publisher) = publisher();
    let start = tokio::time::Instant::now();

    let stats = publisher
        .run_samples("pi-1", [20.0, 20.1, 20.2], Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(stats.published, 3);
    assert!(start.elapsed() >= Duration::from_secs(15));
    let temps: Vec<_> = transport
        .published()
        .iter()
        .map(|p| p.json()["Data"]["Temperature"].clone())
        .collect();
    assert_eq!(temps, vec![json!(20.0), json!(20.1), json!(20.2)]);
}

#[tokio::test]
async fn echo_counts_received_messages() {
    let (transport, publisher) = publisher();
    publisher.subscribe_echo().await.unwrap();

    assert_eq!(transport.subscribed_filters(), vec!["test/temp".to_string()]);
    transport.deliver("test/temp", br#"{"Device_ID":1}"#);
    transport.deliver("test/temp", br#"{"Device_ID":2}"#);
    transport.deliver("other/topic", b"{}");

    assert_eq!(publisher.received_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_samples_are_counted() {
    let (transport, publisher) = publisher();
    transport.fail_publishes(true);

    let stats = publisher
        .run_samples("pi-1", [20.0, 20.1], Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(stats.published, 0);
    assert_eq!(stats.failed, 2);
}
