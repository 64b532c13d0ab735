//! DNS tunnel framing.
//!
//! DNS-tunnel sockets carry application payload across networks that only
//! pass DNS traffic. The payload is hex-encoded into the QNAME label of a
//! synthetic DNS TXT query, zero-padded to a fixed 80-byte frame; the far
//! end reverses the encoding. Responses reuse the same frame layout and
//! are matched on the transaction id.
//!
//! # Frame format
//!
//! ```text
//! bytes 0..12    DNS header (id 0x544C, RD flag, QDCOUNT 1)
//! byte  12       QNAME label length (2 * payload length)
//! bytes 13..     lowercase hex digits of the payload
//! next byte      0x00 QNAME terminator
//! next 4 bytes   QTYPE TXT (0x0010), QCLASS IN (0x0001)
//! remainder      zero padding to exactly 80 bytes
//! ```

use telemlib_core::error::{Error, Result};

/// Every tunnel frame is exactly this long.
pub const DNS_FRAME_LEN: usize = 80;

/// Well-known DNS port used by tunnel sockets.
pub const DNS_PORT: u16 = 53;

/// Largest payload one frame can carry: the fixed overhead is 18 bytes
/// and each payload byte costs two hex digits.
pub const MAX_TUNNEL_PAYLOAD: usize = (DNS_FRAME_LEN - 18) / 2;

/// Fixed transaction id marking frames produced by this tunnel.
const TRANSACTION_ID: u16 = 0x544C;

/// Query flags: standard query with recursion desired.
const FLAGS_RD: u16 = 0x0100;

/// QTYPE TXT.
const QTYPE_TXT: u16 = 0x0010;

/// QCLASS IN.
const QCLASS_IN: u16 = 0x0001;

/// Wrap a payload into an 80-byte tunnel frame.
///
/// Fails when the payload exceeds [`MAX_TUNNEL_PAYLOAD`] bytes.
pub fn encode_frame(payload: &[u8]) -> Result<[u8; DNS_FRAME_LEN]> {
    if payload.len() > MAX_TUNNEL_PAYLOAD {
        return Err(Error::InvalidParameter(format!(
            "{} bytes exceeds the {MAX_TUNNEL_PAYLOAD}-byte tunnel payload limit",
            payload.len()
        )));
    }

    let mut frame = [0u8; DNS_FRAME_LEN];
    frame[0..2].copy_from_slice(&TRANSACTION_ID.to_be_bytes());
    frame[2..4].copy_from_slice(&FLAGS_RD.to_be_bytes());
    frame[4..6].copy_from_slice(&1u16.to_be_bytes()); // QDCOUNT

    frame[12] = (payload.len() * 2) as u8;
    let mut pos = 13;
    for &b in payload {
        frame[pos] = HEX_DIGITS[(b >> 4) as usize];
        frame[pos + 1] = HEX_DIGITS[(b & 0x0F) as usize];
        pos += 2;
    }
    // QNAME terminator already zero.
    pos += 1;
    frame[pos..pos + 2].copy_from_slice(&QTYPE_TXT.to_be_bytes());
    frame[pos + 2..pos + 4].copy_from_slice(&QCLASS_IN.to_be_bytes());

    Ok(frame)
}

/// Unwrap a tunnel frame back into its payload.
///
/// Accepts exactly [`DNS_FRAME_LEN`]-byte frames carrying this tunnel's
/// transaction id; anything else is a protocol error.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() != DNS_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "tunnel frame of {} bytes, expected {DNS_FRAME_LEN}",
            frame.len()
        )));
    }
    let id = u16::from_be_bytes([frame[0], frame[1]]);
    if id != TRANSACTION_ID {
        return Err(Error::Protocol(format!(
            "tunnel frame with foreign transaction id 0x{id:04X}"
        )));
    }

    let label_len = frame[12] as usize;
    if label_len % 2 != 0 || label_len > MAX_TUNNEL_PAYLOAD * 2 {
        return Err(Error::Protocol(format!(
            "tunnel frame with invalid label length {label_len}"
        )));
    }

    let mut payload = Vec::with_capacity(label_len / 2);
    for pair in frame[13..13 + label_len].chunks(2) {
        let hi = hex_value(pair[0])?;
        let lo = hex_value(pair[1])?;
        payload.push((hi << 4) | lo);
    }
    Ok(payload)
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn hex_value(digit: u8) -> Result<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        other => Err(Error::Protocol(format!(
            "non-hex byte 0x{other:02X} in tunnel label"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_exactly_80_bytes() {
        let frame = encode_frame(b"hi").unwrap();
        assert_eq!(frame.len(), DNS_FRAME_LEN);
    }

    #[test]
    fn header_fields() {
        let frame = encode_frame(b"hi").unwrap();
        assert_eq!(&frame[0..2], &[0x54, 0x4C]); // transaction id
        assert_eq!(&frame[2..4], &[0x01, 0x00]); // RD flag
        assert_eq!(&frame[4..6], &[0x00, 0x01]); // one question
    }

    #[test]
    fn payload_is_hex_encoded_label() {
        let frame = encode_frame(b"hi").unwrap();
        assert_eq!(frame[12], 4);
        assert_eq!(&frame[13..17], b"6869");
        assert_eq!(frame[17], 0); // QNAME terminator
        assert_eq!(&frame[18..20], &[0x00, 0x10]); // TXT
        assert_eq!(&frame[20..22], &[0x00, 0x01]); // IN
    }

    #[test]
    fn round_trip() {
        let payload = b"telemetry frame 42";
        let frame = encode_frame(payload).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn round_trip_empty_and_max() {
        let frame = encode_frame(b"").unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), b"");

        let payload = vec![0xA7u8; MAX_TUNNEL_PAYLOAD];
        let frame = encode_frame(&payload).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = vec![0u8; MAX_TUNNEL_PAYLOAD + 1];
        assert!(encode_frame(&payload).is_err());
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(decode_frame(&[0u8; 79]).is_err());
        assert!(decode_frame(&[0u8; 81]).is_err());
    }

    #[test]
    fn foreign_transaction_id_rejected() {
        let mut frame = encode_frame(b"hi").unwrap();
        frame[0] = 0x12;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn corrupt_hex_rejected() {
        let mut frame = encode_frame(b"hi").unwrap();
        frame[13] = b'z';
        assert!(decode_frame(&frame).is_err());
    }
}
