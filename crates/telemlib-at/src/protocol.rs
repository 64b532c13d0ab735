//! AT lexical layer: request framing, terminal literals, and field parsing.
//!
//! The modem speaks Hayes-style AT: ASCII request lines terminated by `\r`,
//! responses delimited by `\r`/`\n`/NUL, comma-separated fields within
//! specific responses, literal `OK\r` / `ERROR\r` terminal lines, and an
//! `@` prompt character that invites a raw binary payload.
//!
//! All functions here are pure -- they produce or consume byte slices
//! without performing any I/O. The engine feeds them with bytes pulled off
//! the transport.

use bytes::{BufMut, BytesMut};

use telemlib_core::error::{Error, Result};
use telemlib_core::types::SocketId;

/// Carriage return -- terminates every request line.
pub const CR: u8 = b'\r';

/// Line feed -- tolerated between responses, never part of a token.
pub const LF: u8 = b'\n';

/// Terminal line for a successful command.
pub const OK_TERMINAL: &[u8] = b"OK\r";

/// Terminal line for a failed command.
pub const ERROR_TERMINAL: &[u8] = b"ERROR\r";

/// Prompt character sent by the modem when it is ready for a binary payload.
pub const PROMPT: u8 = b'@';

/// Maximum number of digits accepted in a numeric field.
///
/// Anything longer is treated as line noise or a malformed response rather
/// than a value worth interpreting.
pub const MAX_NUMERIC_DIGITS: usize = 8;

/// Returns `true` for bytes that delimit responses on the wire.
pub fn is_response_delimiter(b: u8) -> bool {
    b == CR || b == LF || b == 0
}

/// Encode an AT request line ready for transmission.
///
/// Prepends `AT` and appends the `\r` terminator.
///
/// # Example
///
/// ```
/// use telemlib_at::protocol::encode_request;
///
/// assert_eq!(encode_request("+USOCR=6"), b"AT+USOCR=6\r");
/// ```
pub fn encode_request(body: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(2 + body.len() + 1);
    buf.put_slice(b"AT");
    buf.put_slice(body.as_bytes());
    buf.put_u8(CR);
    buf.to_vec()
}

/// Parse an ASCII numeric token.
///
/// Fails on an empty token, on any non-digit byte, and on tokens longer
/// than [`MAX_NUMERIC_DIGITS`] -- oversized numbers in a modem response
/// mean the stream is corrupt, not that the modem has a nine-digit socket.
pub fn parse_numeric_token(token: &[u8]) -> Result<u32> {
    if token.is_empty() {
        return Err(Error::Protocol("empty numeric field".into()));
    }
    if token.len() > MAX_NUMERIC_DIGITS {
        return Err(Error::Protocol(format!(
            "numeric field of {} digits exceeds {MAX_NUMERIC_DIGITS}",
            token.len()
        )));
    }
    let mut value: u32 = 0;
    for &b in token {
        if !b.is_ascii_digit() {
            return Err(Error::Protocol(format!(
                "non-digit byte 0x{b:02X} in numeric field"
            )));
        }
        value = value * 10 + (b - b'0') as u32;
    }
    Ok(value)
}

/// Parse a socket-index token, enforcing the modem's socket-count bound.
pub fn parse_socket_index(token: &[u8]) -> Result<SocketId> {
    let value = parse_numeric_token(token)?;
    if value > SocketId::MAX_INDEX as u32 {
        return Err(Error::Protocol(format!(
            "socket index {value} exceeds modem maximum {}",
            SocketId::MAX_INDEX
        )));
    }
    // Bound checked above; SocketId::new cannot fail here.
    SocketId::new(value as u8)
}

/// Strip surrounding double quotes from a field, if present.
pub fn unquote(field: &[u8]) -> &[u8] {
    if field.len() >= 2 && field[0] == b'"' && field[field.len() - 1] == b'"' {
        &field[1..field.len() - 1]
    } else {
        field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // encode_request
    // -----------------------------------------------------------------------

    #[test]
    fn encode_socket_create() {
        assert_eq!(encode_request("+USOCR=6"), b"AT+USOCR=6\r");
    }

    #[test]
    fn encode_bare_at() {
        assert_eq!(encode_request(""), b"AT\r");
    }

    #[test]
    fn encode_with_string_parameter() {
        assert_eq!(
            encode_request("+USOCO=0,\"198.51.100.7\",4422"),
            b"AT+USOCO=0,\"198.51.100.7\",4422\r"
        );
    }

    // -----------------------------------------------------------------------
    // parse_numeric_token
    // -----------------------------------------------------------------------

    #[test]
    fn numeric_simple() {
        assert_eq!(parse_numeric_token(b"0").unwrap(), 0);
        assert_eq!(parse_numeric_token(b"42").unwrap(), 42);
        assert_eq!(parse_numeric_token(b"4095").unwrap(), 4095);
    }

    #[test]
    fn numeric_max_width() {
        // Exactly eight digits is the widest accepted token.
        assert_eq!(parse_numeric_token(b"12345678").unwrap(), 12_345_678);
    }

    #[test]
    fn numeric_rejects_empty() {
        assert!(matches!(
            parse_numeric_token(b""),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn numeric_rejects_oversized() {
        assert!(matches!(
            parse_numeric_token(b"123456789"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn numeric_rejects_non_digit() {
        assert!(matches!(
            parse_numeric_token(b"12a4"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            parse_numeric_token(b"-5"),
            Err(Error::Protocol(_))
        ));
    }

    // -----------------------------------------------------------------------
    // parse_socket_index
    // -----------------------------------------------------------------------

    #[test]
    fn socket_index_valid() {
        assert_eq!(parse_socket_index(b"0").unwrap().index(), 0);
        assert_eq!(parse_socket_index(b"6").unwrap().index(), 6);
    }

    #[test]
    fn socket_index_out_of_range() {
        assert!(matches!(
            parse_socket_index(b"7"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn socket_index_garbage() {
        assert!(matches!(
            parse_socket_index(b""),
            Err(Error::Protocol(_))
        ));
    }

    // -----------------------------------------------------------------------
    // unquote / delimiters
    // -----------------------------------------------------------------------

    #[test]
    fn unquote_strips_quotes() {
        assert_eq!(unquote(b"\"10.0.0.1\""), b"10.0.0.1");
    }

    #[test]
    fn unquote_leaves_bare_field() {
        assert_eq!(unquote(b"4422"), b"4422");
    }

    #[test]
    fn unquote_leaves_lone_quote() {
        assert_eq!(unquote(b"\""), b"\"");
    }

    #[test]
    fn response_delimiters() {
        assert!(is_response_delimiter(b'\r'));
        assert!(is_response_delimiter(b'\n'));
        assert!(is_response_delimiter(0));
        assert!(!is_response_delimiter(b','));
        assert!(!is_response_delimiter(b'O'));
    }
}
