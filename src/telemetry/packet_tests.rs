use super::*;
use serde_json::json;
use yare::parameterized;

#[test]
fn full_packet() {
    let packet = Packet::parse("I08 T34.1 A1.16 -1.91 0.22\n").unwrap();
    assert_eq!(packet.device_id, Some(8));
    assert_eq!(packet.temperature, Some(34.1));
    assert_eq!(
        packet.acceleration,
        Some(Acceleration {
            x: Some(1.16),
            y: Some(-1.91),
            z: Some(0.22),
        })
    );
}

#[test]
fn serializes_with_field_names() {
    let packet = Packet::parse("I3 T21.5 A0.5 1").unwrap();
    assert_eq!(
        serde_json::to_value(&packet).unwrap(),
        json!({
            "Device_ID": 3,
            "Temperature": 21.5,
            "Acceleration": { "x": 0.5, "y": 1.0 }
        })
    );
}

#[parameterized(
    temperature_only = { "T20.25", None, Some(20.25) },
    leading_noise = { "  12 I7 T-3.5", Some(7), Some(-3.5) },
    letter_run_uses_last = { "XI9", Some(9), None },
)]
fn partial_packets(line: &str, device_id: Option<i64>, temperature: Option<f64>) {
    let packet = Packet::parse(line).unwrap();
    assert_eq!(packet.device_id, device_id);
    assert_eq!(packet.temperature, temperature);
}

#[parameterized(
    empty = { "", Error::Empty },
    digits_only = { "1234", Error::Empty },
    unknown_tag = { "I1 H40", Error::UnknownTag('H') },
    bad_temperature = { "T3.4.5", Error::InvalidValue { tag: 'T', value: "3.4.5".to_string() } },
    bad_device = { "I", Error::InvalidValue { tag: 'I', value: String::new() } },
    bad_acceleration = { "A1 x", Error::UnknownTag('x') },
)]
fn rejected_packets(line: &str, expected: Error) {
    assert_eq!(Packet::parse(line).unwrap_err(), expected);
}

#[test]
fn acceleration_needs_a_component() {
    assert!(matches!(
        Packet::parse("A  "),
        Err(Error::InvalidValue { tag: 'A', .. })
    ));
}
