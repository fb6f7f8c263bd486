//! Capture boundary - turns raw captured frames into TCP payload segments.
//!
//! Link-layer and IP parsing is delegated to etherparse; everything that is
//! not IPv4+TCP with a non-empty payload is skipped, never an error.

use etherparse::{NetHeaders, PacketHeaders, TransportHeader};

/// Logical flow identity, "src_ip:src_port-dst_ip:dst_port".
pub type FlowKey = String;

/// One TCP payload segment with its capture timestamp (Unix milliseconds).
#[derive(Debug, Clone)]
pub struct TcpSegment {
    pub flow: FlowKey,
    pub seq: u32,
    pub payload: Vec<u8>,
    pub at_ms: i64,
}

/// Extract the TCP payload from one captured frame.
///
/// Accepts either a full ethernet frame (pcap) or a bare IP packet (raw
/// sockets); returns None for anything that is not IPv4+TCP or carries an
/// empty payload (pure ACKs).
pub fn extract_tcp_segment(frame: &[u8], at_ms: i64) -> Option<TcpSegment> {
    let headers = PacketHeaders::from_ethernet_slice(frame)
        .ok()
        .filter(|h| h.net.is_some())
        .or_else(|| PacketHeaders::from_ip_slice(frame).ok())?;

    let Some(NetHeaders::Ipv4(ipv4, _extensions)) = headers.net else {
        return None;
    };
    let Some(TransportHeader::Tcp(tcp)) = headers.transport else {
        return None;
    };

    let payload = headers.payload.slice();
    if payload.is_empty() {
        return None;
    }

    Some(TcpSegment {
        flow: flow_key(ipv4.source, tcp.source_port, ipv4.destination, tcp.destination_port),
        seq: tcp.sequence_number,
        payload: payload.to_vec(),
        at_ms,
    })
}

pub fn flow_key(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> FlowKey {
    format!(
        "{}.{}.{}.{}:{}-{}.{}.{}.{}:{}",
        src[0], src[1], src[2], src[3], src_port, dst[0], dst[1], dst[2], dst[3], dst_port
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn tcp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 2], [10, 0, 0, 1], 64)
            .tcp(5000, 61000, 1000, 8192);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn extracts_ipv4_tcp_payload() {
        let frame = tcp_frame(b"hello");
        let seg = extract_tcp_segment(&frame, 42).unwrap();
        assert_eq!(seg.payload, b"hello");
        assert_eq!(seg.seq, 1000);
        assert_eq!(seg.at_ms, 42);
        assert_eq!(seg.flow, "10.0.0.2:5000-10.0.0.1:61000");
    }

    #[test]
    fn skips_empty_payload() {
        let frame = tcp_frame(b"");
        assert!(extract_tcp_segment(&frame, 0).is_none());
    }

    #[test]
    fn skips_non_ip_garbage() {
        assert!(extract_tcp_segment(&[0u8; 16], 0).is_none());
    }

    #[test]
    fn skips_udp() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 2], [10, 0, 0, 1], 64)
            .udp(5000, 61000);
        let mut out = Vec::new();
        builder.write(&mut out, b"dgram").unwrap();
        assert!(extract_tcp_segment(&out, 0).is_none());
    }
}
