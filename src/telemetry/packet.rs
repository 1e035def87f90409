//! Tag-prefixed sensor packets as they arrive over UART.
//!
//! A packet is one line such as `I08 T34.1 A1.16 -1.91 0.22`: each field
//! starts with a letter tag followed by its value. `I` is the device id,
//! `T` the temperature and `A` up to three acceleration components.

use serde::Serialize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("no fields in packet")]
    Empty,

    #[error("unknown tag {0:?}")]
    UnknownTag(char),

    #[error("invalid value {value:?} for tag {tag:?}")]
    InvalidValue { tag: char, value: String },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Acceleration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct Packet {
    #[serde(rename = "Device_ID", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,
    #[serde(rename = "Temperature", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "Acceleration", skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<Acceleration>,
}

impl Packet {
    /// Parses one line. Text before the first tag is ignored; within a run of
    /// letters the last one is the tag.
    pub fn parse(line: &str) -> Result<Packet, Error> {
        let mut packet = Packet::default();
        let mut fields = 0;

        for (tag, value) in fields_of(line) {
            fields += 1;
            let value = value.trim();
            let invalid = || Error::InvalidValue {
                tag,
                value: value.to_string(),
            };
            match tag {
                'I' => packet.device_id = Some(value.parse().map_err(|_| invalid())?),
                'T' => packet.temperature = Some(value.parse().map_err(|_| invalid())?),
                'A' => {
                    let mut components = value.split_whitespace().map(str::parse::<f64>);
                    let mut next = || components.next().transpose().map_err(|_| invalid());
                    let acceleration = Acceleration {
                        x: next()?,
                        y: next()?,
                        z: next()?,
                    };
                    if acceleration.x.is_none() {
                        return Err(invalid());
                    }
                    packet.acceleration = Some(acceleration);
                }
                other => return Err(Error::UnknownTag(other)),
            }
        }

        if fields == 0 {
            return Err(Error::Empty);
        }
        Ok(packet)
    }
}

/// Splits `line` into `(tag, value)` pairs.
fn fields_of(line: &str) -> Vec<(char, &str)> {
    let mut fields = Vec::new();
    let mut current: Option<(char, usize)> = None;
    let mut in_tag = false;

    for (i, c) in line.char_indices() {
        if c.is_ascii_alphabetic() {
            if !in_tag {
                if let Some((tag, start)) = current {
                    fields.push((tag, &line[start..i]));
                }
            }
            current = Some((c, i + c.len_utf8()));
            in_tag = true;
        } else {
            in_tag = false;
        }
    }
    if let Some((tag, start)) = current {
        fields.push((tag, &line[start..]));
    }
    fields
}

#[cfg(test)]
#[path = "packet_tests.rs"]
mod tests;
