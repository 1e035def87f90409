use super::*;
use serde_json::json;

#[test]
fn packet_becomes_message() {
    let packet = Packet::parse("I08 T34.1 A1.16 -1.91").unwrap();
    let message = TelemetryMessage::from_packet(&packet).unwrap();

    assert_eq!(
        serde_json::to_value(&message).unwrap(),
        json!({
            "Device_ID": 8,
            "Data": {
                "Temperature": 34.1,
                "Acceleration": { "x": 1.16, "y": -1.91 }
            }
        })
    );
}

#[test]
fn packet_without_device_id_is_rejected() {
    let packet = Packet::parse("T21.0").unwrap();
    assert!(matches!(
        TelemetryMessage::from_packet(&packet),
        Err(Error::MissingDeviceId)
    ));
}

#[test]
fn fake_reading_message() {
    let message = TelemetryMessage::temperature("pi-barn-1", 21.3);
    assert_eq!(
        serde_json::to_value(&message).unwrap(),
        json!({ "Device_ID": "pi-barn-1", "Data": { "Temperature": 21.3 } })
    );
}

#[test]
fn host_name_is_never_empty() {
    assert!(!host_name().is_empty());
}

#[test]
fn host_name_is_the_system_host_name() {
    let expected = hostname::get().unwrap().to_string_lossy().to_string();
    assert_eq!(host_name(), expected);
}
