//! Receiver connectivity query framing.
//!
//! The query is a long vendor report: byte 0 is the report id (`0x51`),
//! byte 1 the sub-length, then the command type and feature/function bytes.
//! The receiver answers with the same two leading bytes and carries the
//! headset's connectivity in byte 8.

use crate::error::{HidError, HidResult};

/// Logitech USB vendor id.
pub const LOGITECH_VID: u16 = 0x046d;
/// Lightspeed headset receiver product id.
pub const RECEIVER_PID: u16 = 0x0af7;
/// Vendor usage page of the receiver's control interface.
pub const VENDOR_USAGE_PAGE: u16 = 0xff43;
/// Output report length assumed when the descriptor is unavailable.
pub const DEFAULT_REPORT_LENGTH: usize = 64;

/// Connectivity query, zero-padded to the report length on the wire.
pub const QUERY: [u8; 10] = [0x51, 0x08, 0x00, 0x03, 0x1a, 0x00, 0x03, 0x00, 0x04, 0x0a];

/// Leading bytes every reply must echo.
pub const REPLY_PREFIX: [u8; 2] = [QUERY[0], QUERY[1]];

/// Offset of the connectivity byte in a reply.
pub const CONNECTIVITY_OFFSET: usize = 8;

/// Shortest reply that carries the connectivity byte.
pub const MIN_REPLY_LENGTH: usize = CONNECTIVITY_OFFSET + 1;

/// Build the connectivity query for an interface with the given output
/// report length.
#[must_use]
pub fn build_query(report_length: usize) -> Vec<u8> {
    let mut report = vec![0u8; report_length.max(QUERY.len())];
    report[..QUERY.len()].copy_from_slice(&QUERY);
    report
}

/// Parse a reply into the headset's connectivity.
///
/// Returns `true` when the headset is linked.
///
/// # Errors
/// Returns a protocol error if the reply is short or carries the wrong prefix.
pub fn parse_reply(reply: &[u8]) -> HidResult<bool> {
    if reply.len() < MIN_REPLY_LENGTH {
        return Err(HidError::ProtocolError(format!(
            "reply of {} bytes, need {MIN_REPLY_LENGTH}",
            reply.len()
        )));
    }

    if reply[..REPLY_PREFIX.len()] != REPLY_PREFIX {
        return Err(HidError::ProtocolError(format!(
            "unexpected prefix {:02x} {:02x}",
            reply[0], reply[1]
        )));
    }

    Ok(reply[CONNECTIVITY_OFFSET] != 0)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn reply(connectivity: u8) -> Vec<u8> {
        let mut buf = vec![0u8; DEFAULT_REPORT_LENGTH];
        buf[..2].copy_from_slice(&REPLY_PREFIX);
        buf[CONNECTIVITY_OFFSET] = connectivity;
        buf
    }

    #[test]
    fn test_query_is_zero_padded() {
        let query = build_query(DEFAULT_REPORT_LENGTH);
        assert_eq!(query.len(), 64);
        assert_eq!(&query[..10], &QUERY);
        assert!(query[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_query_never_truncated() {
        assert_eq!(build_query(4), QUERY.to_vec());
    }

    #[test]
    fn test_parse_connectivity() {
        assert!(parse_reply(&reply(0x01)).unwrap());
        assert!(parse_reply(&reply(0x80)).unwrap());
        assert!(!parse_reply(&reply(0x00)).unwrap());
    }

    #[test]
    fn test_minimum_length_reply() {
        let buf = reply(1);
        assert!(parse_reply(&buf[..MIN_REPLY_LENGTH]).unwrap());
        assert_matches!(parse_reply(&buf[..MIN_REPLY_LENGTH - 1]), Err(HidError::ProtocolError(_)));
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let mut buf = reply(1);
        buf[0] = 0x11;
        assert_matches!(parse_reply(&buf), Err(HidError::ProtocolError(_)));

        let mut buf = reply(1);
        buf[1] = 0x09;
        assert_matches!(parse_reply(&buf), Err(HidError::ProtocolError(_)));
    }
}
