//! Server flow identification.
//!
//! Until a flow is confirmed as the game server, raw payloads (not yet
//! reassembled) run through two independent detectors. Either match
//! confirms the flow and seeds the reassembler's next expected sequence
//! number just past the identifying packet.

use tracing::{debug, info};

use crate::capture::{FlowKey, TcpSegment};

/// The combat service id, big-endian with zero padding, as it appears
/// embedded in the server's early framed stub messages.
pub const SERVER_SIGNATURE: [u8; 6] = [0x00, 0x63, 0x33, 0x53, 0x42, 0x00];

/// Byte offset of the signature inside each inner length-delimited record.
const SIGNATURE_OFFSET: usize = 5;
/// Inner records start here once the frame-type byte at offset 4 is zero.
const RECORD_SCAN_START: usize = 10;

/// The login response has a fixed total size and a fixed shape, apart from
/// a sequence-looking field at bytes 5..9 that is not compared.
const LOGIN_RESPONSE_LEN: usize = 0x62;
const LOGIN_RESPONSE_HEAD: [u8; 4] = [0x00, 0x00, 0x00, 0x62];
const LOGIN_RESPONSE_TAIL_OFFSET: usize = 9;
const LOGIN_RESPONSE_TAIL: [u8; 5] = [0x00, 0x03, 0x00, 0x00, 0x00];

#[derive(Debug, Clone)]
pub struct IdentifiedFlow {
    pub flow: FlowKey,
    /// First sequence number after the identifying packet.
    pub next_seq: u32,
}

#[derive(Debug, Default)]
pub struct ServerIdentifier;

impl ServerIdentifier {
    pub fn try_identify(&self, segment: &TcpSegment) -> Option<IdentifiedFlow> {
        if contains_signature(&segment.payload) {
            info!(flow = %segment.flow, "server flow identified by service signature");
            return Some(self.confirm(segment));
        }
        if is_login_response(&segment.payload) {
            info!(flow = %segment.flow, "server flow identified by login response shape");
            return Some(self.confirm(segment));
        }
        None
    }

    fn confirm(&self, segment: &TcpSegment) -> IdentifiedFlow {
        debug!(
            flow = %segment.flow,
            head = %hex::encode(&segment.payload[..segment.payload.len().min(16)]),
            "confirming server flow"
        );
        IdentifiedFlow {
            flow: segment.flow.clone(),
            next_seq: segment.seq.wrapping_add(segment.payload.len() as u32),
        }
    }
}

/// Scan the inner length-delimited records of a small framed message for
/// the service signature at its fixed offset.
fn contains_signature(payload: &[u8]) -> bool {
    if payload.len() <= RECORD_SCAN_START || payload[4] != 0 {
        return false;
    }
    let mut data = &payload[RECORD_SCAN_START..];
    while data.len() >= 4 {
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len == 0 || len > data.len() {
            return false;
        }
        if data.len() >= SIGNATURE_OFFSET + SERVER_SIGNATURE.len()
            && data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SERVER_SIGNATURE.len()] == SERVER_SIGNATURE
        {
            return true;
        }
        data = &data[len..];
    }
    false
}

/// Match the fixed-size login response, tolerating the variable field
/// between the head and tail patterns.
fn is_login_response(payload: &[u8]) -> bool {
    payload.len() == LOGIN_RESPONSE_LEN
        && payload[..4] == LOGIN_RESPONSE_HEAD
        && payload[4] == 0
        && payload[LOGIN_RESPONSE_TAIL_OFFSET..LOGIN_RESPONSE_TAIL_OFFSET + LOGIN_RESPONSE_TAIL.len()]
            == LOGIN_RESPONSE_TAIL
}
