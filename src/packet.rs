//! Frame format and serialization.

use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, ProtocolError};

/// Header size in bytes.
pub const HEADER_LEN: usize = 12;
/// Protocol version.
pub const VERSION: u8 = 1;
/// Largest datagram the protocol allows, header included.
pub const MAX_FRAME_LEN: usize = 200;
/// Encoded size of one reading.
pub const READING_LEN: usize = 5;
/// Most readings a single DATA frame can carry.
pub const MAX_READINGS: usize = (MAX_FRAME_LEN - HEADER_LEN - 1) / READING_LEN;

/// DATA message type byte.
pub const MSG_DATA: u8 = 0x01;
/// HEARTBEAT message type byte.
pub const MSG_HEARTBEAT: u8 = 0x02;

/// Kind of frame carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Sensor readings
    Data = 1,
    /// Liveness signal, no payload
    Heartbeat = 2,
}

impl MessageType {
    /// Map a wire byte to a message type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            MSG_DATA => Some(Self::Data),
            MSG_HEARTBEAT => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// Name used in the persisted log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor that produced a reading.
///
/// Bytes outside the three defined types are kept as `Unknown` so a payload
/// always decodes to exactly what was sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorType {
    /// Degrees Celsius
    Temperature,
    /// Relative humidity, percent
    Humidity,
    /// Supply voltage
    Voltage,
    /// Unassigned type byte
    Unknown(u8),
}

impl SensorType {
    /// All defined sensor types, in wire order.
    pub const ALL: [SensorType; 3] = [Self::Temperature, Self::Humidity, Self::Voltage];

    /// Map a wire byte to a sensor type.
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Temperature,
            2 => Self::Humidity,
            3 => Self::Voltage,
            other => Self::Unknown(other),
        }
    }

    /// Wire byte for this sensor type.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Temperature => 1,
            Self::Humidity => 2,
            Self::Voltage => 3,
            Self::Unknown(b) => b,
        }
    }

    /// Lowercase name accepted on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Voltage => "voltage",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl FromStr for SensorType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            "voltage" => Ok(Self::Voltage),
            other => Err(ConfigError::SensorType(other.to_string())),
        }
    }
}

/// A single sensor sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Sensor that produced the value
    pub sensor_type: SensorType,
    /// Sample value
    pub value: f32,
}

impl Reading {
    /// Create a reading.
    pub fn new(sensor_type: SensorType, value: f32) -> Self {
        Self { sensor_type, value }
    }
}

/// Raw 12-byte frame header.
///
/// Decoding only checks length; version, type and device id are validated by
/// [`Frame::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version
    pub version: u8,
    /// Message type byte
    pub msg_type: u8,
    /// Originating device
    pub device_id: u16,
    /// Per-device frame counter
    pub sequence_number: u32,
    /// Unix seconds at the sender
    pub timestamp: u32,
}

impl FrameHeader {
    /// Encode header into a 12-byte buffer.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::MalformedHeader(buf.len()));
        }

        buf[0] = self.version;
        buf[1] = self.msg_type;
        buf[2..4].copy_from_slice(&self.device_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[8..12].copy_from_slice(&self.timestamp.to_be_bytes());

        Ok(())
    }

    /// Encode header into a fresh array.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        // A HEADER_LEN buffer always satisfies encode's length check.
        let _ = self.encode(&mut buf);
        buf
    }

    /// Decode header from a buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::MalformedHeader(buf.len()));
        }

        Ok(Self {
            version: buf[0],
            msg_type: buf[1],
            device_id: u16::from_be_bytes([buf[2], buf[3]]),
            sequence_number: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            timestamp: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// Encode a DATA payload: count byte followed by 5-byte readings.
pub fn encode_data_payload(readings: &[Reading]) -> Result<Vec<u8>, ProtocolError> {
    if readings.is_empty() {
        return Err(ProtocolError::EmptyBatch);
    }
    if readings.len() > MAX_READINGS {
        return Err(ProtocolError::BatchTooLarge(readings.len()));
    }

    let payload_len = 1 + readings.len() * READING_LEN;
    if HEADER_LEN + payload_len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(HEADER_LEN + payload_len));
    }

    let mut payload = Vec::with_capacity(payload_len);
    payload.push(readings.len() as u8);
    for reading in readings {
        payload.push(reading.sensor_type.to_byte());
        payload.extend_from_slice(&reading.value.to_be_bytes());
    }

    Ok(payload)
}

/// Decode a DATA payload. Bytes past the last reading are ignored.
pub fn decode_data_payload(buf: &[u8]) -> Result<Vec<Reading>, ProtocolError> {
    let Some(&count) = buf.first() else {
        return Err(ProtocolError::TruncatedPayload {
            expected: 1,
            actual: 0,
        });
    };

    if count == 0 {
        return Err(ProtocolError::EmptyBatch);
    }

    let expected = 1 + count as usize * READING_LEN;
    if buf.len() < expected {
        return Err(ProtocolError::TruncatedPayload {
            expected,
            actual: buf.len(),
        });
    }

    let readings = buf[1..expected]
        .chunks_exact(READING_LEN)
        .map(|chunk| Reading {
            sensor_type: SensorType::from_byte(chunk[0]),
            value: f32::from_be_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]),
        })
        .collect();

    Ok(readings)
}

/// Body of a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// DATA frame with 1..=37 readings
    Data(Vec<Reading>),
    /// HEARTBEAT frame
    Heartbeat,
}

/// A structurally valid protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Originating device, never zero
    pub device_id: u16,
    /// Per-device frame counter
    pub sequence_number: u32,
    /// Unix seconds at the sender
    pub timestamp: u32,
    /// Message body
    pub payload: Payload,
}

impl Frame {
    /// Build a DATA frame.
    pub fn data(device_id: u16, sequence_number: u32, timestamp: u32, readings: Vec<Reading>) -> Self {
        Self {
            device_id,
            sequence_number,
            timestamp,
            payload: Payload::Data(readings),
        }
    }

    /// Build a HEARTBEAT frame.
    pub fn heartbeat(device_id: u16, sequence_number: u32, timestamp: u32) -> Self {
        Self {
            device_id,
            sequence_number,
            timestamp,
            payload: Payload::Heartbeat,
        }
    }

    /// Message type of this frame.
    pub fn msg_type(&self) -> MessageType {
        match self.payload {
            Payload::Data(_) => MessageType::Data,
            Payload::Heartbeat => MessageType::Heartbeat,
        }
    }

    /// Readings carried by the frame (empty for HEARTBEAT).
    pub fn readings(&self) -> &[Reading] {
        match &self.payload {
            Payload::Data(readings) => readings,
            Payload::Heartbeat => &[],
        }
    }

    /// Number of readings carried.
    pub fn reading_count(&self) -> usize {
        self.readings().len()
    }

    /// Header for this frame at the current protocol version.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            version: VERSION,
            msg_type: self.msg_type() as u8,
            device_id: self.device_id,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
        }
    }

    /// Encode the full datagram.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = self.header().to_bytes().to_vec();
        if let Payload::Data(readings) = &self.payload {
            out.extend_from_slice(&encode_data_payload(readings)?);
        }
        Ok(out)
    }

    /// Decode and validate a datagram.
    ///
    /// Rejects short headers, foreign versions, unknown message types, device
    /// id 0 and malformed DATA payloads.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = FrameHeader::decode(buf)?;

        if header.version != VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let msg_type = MessageType::from_byte(header.msg_type)
            .ok_or(ProtocolError::UnknownMessageType(header.msg_type))?;

        if header.device_id == 0 {
            return Err(ProtocolError::InvalidDeviceId(header.device_id));
        }

        let payload = match msg_type {
            MessageType::Data => Payload::Data(decode_data_payload(&buf[HEADER_LEN..])?),
            MessageType::Heartbeat => Payload::Heartbeat,
        };

        Ok(Self {
            device_id: header.device_id,
            sequence_number: header.sequence_number,
            timestamp: header.timestamp,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_reading() -> impl Strategy<Value = Reading> {
        (any::<u8>(), -1.0e6f32..1.0e6f32)
            .prop_map(|(ty, value)| Reading::new(SensorType::from_byte(ty), value))
    }

    #[test]
    fn max_readings_is_37() {
        assert_eq!(MAX_READINGS, 37);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let header = FrameHeader {
            version: VERSION,
            msg_type: MSG_DATA,
            device_id: 0x03E9,
            sequence_number: 0x0102_0304,
            timestamp: 0x0A0B_0C0D,
        };

        assert_eq!(
            header.to_bytes(),
            [1, 1, 0x03, 0xE9, 1, 2, 3, 4, 0x0A, 0x0B, 0x0C, 0x0D]
        );

        let mut buf = [0xFFu8; HEADER_LEN];
        header.encode(&mut buf).unwrap();
        assert_eq!(buf, header.to_bytes());
        assert_eq!(header.encode(&mut [0u8; 11]), Err(ProtocolError::MalformedHeader(11)));
    }

    #[test]
    fn header_decode_rejects_short_buffer() {
        assert_eq!(
            FrameHeader::decode(&[1, 1, 0, 1]),
            Err(ProtocolError::MalformedHeader(4))
        );
    }

    #[test]
    fn header_decode_does_not_validate_fields() {
        let raw = [9, 7, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2];
        let header = FrameHeader::decode(&raw).expect("length is enough");
        assert_eq!(header.version, 9);
        assert_eq!(header.msg_type, 7);
        assert_eq!(header.device_id, 0);
    }

    #[test]
    fn reading_layout() {
        let payload = encode_data_payload(&[Reading::new(SensorType::Voltage, 3.5)]).unwrap();
        assert_eq!(payload.len(), 6);
        assert_eq!(payload[0], 1);
        assert_eq!(payload[1], 3);
        assert_eq!(&payload[2..6], &3.5f32.to_be_bytes());
    }

    #[test]
    fn empty_batch_rejected() {
        assert_eq!(encode_data_payload(&[]), Err(ProtocolError::EmptyBatch));
        assert_eq!(decode_data_payload(&[0]), Err(ProtocolError::EmptyBatch));
    }

    #[test]
    fn oversized_batch_rejected() {
        let readings = vec![Reading::new(SensorType::Temperature, 20.0); 38];
        assert_eq!(
            encode_data_payload(&readings),
            Err(ProtocolError::BatchTooLarge(38))
        );
    }

    #[test]
    fn full_batch_fits_in_frame() {
        let readings = vec![Reading::new(SensorType::Humidity, 55.5); MAX_READINGS];
        let frame = Frame::data(7, 1, 1_700_000_000, readings);
        let bytes = frame.encode().unwrap();
        assert!(bytes.len() <= MAX_FRAME_LEN);
        assert_eq!(bytes.len(), HEADER_LEN + 1 + 37 * READING_LEN);
    }

    #[test]
    fn truncated_payload_rejected() {
        let mut payload = encode_data_payload(&[
            Reading::new(SensorType::Temperature, 21.0),
            Reading::new(SensorType::Humidity, 40.0),
        ])
        .unwrap();
        payload.pop();

        assert_eq!(
            decode_data_payload(&payload),
            Err(ProtocolError::TruncatedPayload {
                expected: 11,
                actual: 10
            })
        );
        assert!(matches!(
            decode_data_payload(&[]),
            Err(ProtocolError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn trailing_bytes_ignored() {
        let mut payload = encode_data_payload(&[Reading::new(SensorType::Voltage, 4.2)]).unwrap();
        payload.extend_from_slice(&[0xFF, 0xFF]);
        let readings = decode_data_payload(&payload).unwrap();
        assert_eq!(readings, vec![Reading::new(SensorType::Voltage, 4.2)]);
    }

    #[test]
    fn heartbeat_is_header_only() {
        let frame = Frame::heartbeat(12, 99, 1000);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn frame_decode_validates_header() {
        let mut bytes = Frame::heartbeat(5, 0, 0).encode().unwrap();

        bytes[0] = 2;
        assert_eq!(Frame::decode(&bytes), Err(ProtocolError::UnsupportedVersion(2)));

        bytes[0] = VERSION;
        bytes[1] = 3;
        assert_eq!(Frame::decode(&bytes), Err(ProtocolError::UnknownMessageType(3)));

        bytes[1] = MSG_HEARTBEAT;
        bytes[2] = 0;
        bytes[3] = 0;
        assert_eq!(Frame::decode(&bytes), Err(ProtocolError::InvalidDeviceId(0)));
    }

    #[test]
    fn data_frame_without_payload_rejected() {
        let header = FrameHeader {
            version: VERSION,
            msg_type: MSG_DATA,
            device_id: 1,
            sequence_number: 0,
            timestamp: 0,
        };
        assert!(matches!(
            Frame::decode(&header.to_bytes()),
            Err(ProtocolError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn sensor_type_names_parse() {
        assert_eq!("Temperature".parse::<SensorType>(), Ok(SensorType::Temperature));
        assert_eq!(" voltage ".parse::<SensorType>(), Ok(SensorType::Voltage));
        assert!("pressure".parse::<SensorType>().is_err());
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(
            version in any::<u8>(),
            msg_type in any::<u8>(),
            device_id in any::<u16>(),
            sequence_number in any::<u32>(),
            timestamp in any::<u32>(),
        ) {
            let header = FrameHeader { version, msg_type, device_id, sequence_number, timestamp };
            let mut buf = [0u8; HEADER_LEN];
            prop_assert!(header.encode(&mut buf).is_ok());
            prop_assert_eq!(FrameHeader::decode(&buf), Ok(header));
        }

        #[test]
        fn prop_data_frame_roundtrip(
            device_id in 1u16..,
            sequence_number in any::<u32>(),
            timestamp in any::<u32>(),
            readings in prop::collection::vec(arb_reading(), 1..=MAX_READINGS),
        ) {
            let frame = Frame::data(device_id, sequence_number, timestamp, readings);
            let bytes = frame.encode().unwrap();
            prop_assert!(bytes.len() <= MAX_FRAME_LEN);
            prop_assert_eq!(Frame::decode(&bytes), Ok(frame));
        }

        #[test]
        fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..MAX_FRAME_LEN)) {
            let _ = Frame::decode(&bytes);
        }
    }
}
