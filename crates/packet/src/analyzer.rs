//! One analyzer instance owns the whole pipeline for one capture source:
//! identification, reassembly, decode, aggregation.
//!
//! Live capture and replay feed the same `ingest_frame` entry point, so a
//! recorded session aggregates identically to the live one. All reassembly
//! and decode state sits behind a single lock; packet arrival, timeout
//! evaluation, and reset all contend for it, which is what makes them safe
//! to interleave.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::capture::{self, TcpSegment};
use crate::config::AnalyzerConfig;
use crate::proto::decoder::ProtocolDecoder;
use crate::proto::{DecodeStats, frame};
use crate::stats::AggregationEngine;
use crate::tcp::{ServerIdentifier, StreamReassembler, SubmitOutcome};

struct AnalyzerState {
    identifier: ServerIdentifier,
    /// Reassembler for the confirmed server flow; None until identified.
    current: Option<StreamReassembler>,
    decoder: ProtocolDecoder,
    stats: DecodeStats,
}

pub struct Analyzer {
    cfg: AnalyzerConfig,
    engine: Arc<AggregationEngine>,
    state: Mutex<AnalyzerState>,
}

impl Analyzer {
    pub fn new(cfg: AnalyzerConfig) -> Self {
        let engine = Arc::new(AggregationEngine::new(cfg));
        Self {
            cfg,
            state: Mutex::new(AnalyzerState {
                identifier: ServerIdentifier,
                current: None,
                decoder: ProtocolDecoder::new(engine.clone()),
                stats: DecodeStats::default(),
            }),
            engine,
        }
    }

    /// The shared aggregation store; safe to read from any thread while
    /// packets are being processed.
    pub fn engine(&self) -> Arc<AggregationEngine> {
        self.engine.clone()
    }

    /// Ingest one raw captured frame with its capture timestamp.
    pub fn ingest_frame(&self, frame: &[u8], at_ms: i64) {
        let Some(segment) = capture::extract_tcp_segment(frame, at_ms) else {
            return;
        };
        self.ingest_segment(segment);
    }

    /// Ingest one TCP segment. Timeouts are evaluated here, on arrival;
    /// there is no timer thread to race against.
    pub fn ingest_segment(&self, segment: TcpSegment) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Idle watchdog: a silent server flow means the connection was
        // replaced under us (server failover); drop it and re-identify.
        if let Some(current) = &state.current {
            if current.is_idle(segment.at_ms) {
                warn!(flow = current.flow(), "flow idle past timeout, dropping for re-identification");
                state.stats.reconnects += 1;
                state.current = None;
            }
        }

        let Some(current) = &mut state.current else {
            if let Some(confirmed) = state.identifier.try_identify(&segment) {
                info!(flow = %confirmed.flow, next_seq = confirmed.next_seq, "tracking server flow");
                state.current = Some(StreamReassembler::new(
                    confirmed.flow,
                    Some(confirmed.next_seq),
                    self.cfg.gap_timeout_ms,
                    self.cfg.idle_timeout_ms,
                ));
            }
            return;
        };

        // A second candidate never preempts the active flow.
        if current.flow() != segment.flow {
            return;
        }

        if current.submit(segment.seq, &segment.payload, segment.at_ms)
            == SubmitOutcome::Resynchronized
        {
            state.stats.resyncs += 1;
        }

        let frames = frame::split_frames(current.buffer_mut());
        for bytes in frames {
            state.decoder.handle_frame(&bytes, segment.at_ms, &mut state.stats);
        }

        self.engine.maybe_end_section(segment.at_ms);
    }

    /// Decode-path counters, for diagnostics.
    pub fn stats(&self) -> DecodeStats {
        self.state.lock().stats.clone()
    }

    /// Forget the tracked flow, decode state, counters, and aggregates.
    /// Safe to call while packets are in flight; it takes the same lock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.decoder = ProtocolDecoder::new(self.engine.clone());
        state.stats = DecodeStats::default();
        self.engine.reset();
        info!("analyzer reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::messages::{AoiSyncDelta, DamageRecord, SkillEffects, SyncNearDeltaInfo};
    use crate::proto::{COMBAT_SERVICE_ID, MessageKind, NotifyMethod};
    use prost::Message;

    const FLOW: &str = "9.9.9.9:5000-10.0.0.1:61000";

    fn identifying_segment(seq: u32) -> TcpSegment {
        // Minimal signature-bearing payload (see tcp::identify).
        let mut payload = vec![0u8; 10];
        let mut record = vec![0x00, 0x00, 0x00, 0x10, 0x01];
        record.extend_from_slice(&crate::tcp::identify::SERVER_SIGNATURE);
        record.resize(0x10, 0);
        payload.extend_from_slice(&record);
        TcpSegment { flow: FLOW.into(), seq, payload, at_ms: 0 }
    }

    fn damage_frame(value: u64) -> Vec<u8> {
        let body = SyncNearDeltaInfo {
            delta_infos: vec![AoiSyncDelta {
                uuid: Some((9 << 16) | 0x40),
                attrs: None,
                skill_effects: Some(SkillEffects {
                    damages: vec![DamageRecord {
                        owner_id: Some(3_001),
                        attacker_uuid: Some((5 << 16) | 0x280),
                        value: Some(value),
                        ..Default::default()
                    }],
                }),
            }],
        }
        .encode_to_vec();
        let mut payload = Vec::new();
        payload.extend_from_slice(&COMBAT_SERVICE_ID.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&(NotifyMethod::SyncNearDeltaInfo as u32).to_be_bytes());
        payload.extend_from_slice(&body);
        frame::encode_frame(MessageKind::Notify as u16, false, &payload)
    }

    fn segment(seq: u32, payload: Vec<u8>, at_ms: i64) -> TcpSegment {
        TcpSegment { flow: FLOW.into(), seq, payload, at_ms }
    }

    #[test]
    fn identify_then_decode_end_to_end() {
        let analyzer = Analyzer::new(AnalyzerConfig::default());
        let ident = identifying_segment(1_000);
        let next = ident.seq + ident.payload.len() as u32;
        analyzer.ingest_segment(ident);

        let frame_bytes = damage_frame(444);
        // Split the frame across two segments to exercise reassembly.
        let (a, b) = frame_bytes.split_at(frame_bytes.len() / 2);
        analyzer.ingest_segment(segment(next, a.to_vec(), 100));
        analyzer.ingest_segment(segment(next + a.len() as u32, b.to_vec(), 150));

        let snap = analyzer.engine().snapshot(150);
        let attacker = snap.entities.iter().find(|e| e.id == 5).unwrap();
        assert_eq!(attacker.total_damage_dealt, 444);
        assert_eq!(analyzer.stats().combat_events, 1);
    }

    #[test]
    fn segments_before_identification_are_not_reassembled() {
        let analyzer = Analyzer::new(AnalyzerConfig::default());
        analyzer.ingest_segment(segment(0, damage_frame(10), 0));
        assert!(analyzer.engine().snapshot(0).entities.is_empty());
    }

    #[test]
    fn other_flows_are_ignored_while_one_is_tracked() {
        let analyzer = Analyzer::new(AnalyzerConfig::default());
        let ident = identifying_segment(0);
        let next = ident.seq + ident.payload.len() as u32;
        analyzer.ingest_segment(ident);

        let mut foreign = segment(next, damage_frame(10), 0);
        foreign.flow = "1.1.1.1:5000-10.0.0.1:2222".into();
        analyzer.ingest_segment(foreign);
        assert!(analyzer.engine().snapshot(0).entities.is_empty());
    }

    #[test]
    fn idle_timeout_allows_reidentification() {
        let analyzer = Analyzer::new(AnalyzerConfig::default());
        let ident = identifying_segment(0);
        let next = ident.seq + ident.payload.len() as u32;
        analyzer.ingest_segment(ident);
        analyzer.ingest_segment(segment(next, damage_frame(42), 1_000));

        // Silence past the idle timeout, then a new server announces
        // itself on a different flow and gets picked up.
        let mut reborn = identifying_segment(7_000);
        reborn.flow = "8.8.8.8:5000-10.0.0.1:3333".into();
        reborn.at_ms = 60_000;
        analyzer.ingest_segment(reborn);
        assert_eq!(analyzer.stats().reconnects, 1);

        let follow = TcpSegment {
            flow: "8.8.8.8:5000-10.0.0.1:3333".into(),
            seq: 7_000 + identifying_segment(7_000).payload.len() as u32,
            payload: damage_frame(58),
            at_ms: 60_100,
        };
        analyzer.ingest_segment(follow);
        let session = analyzer.engine().session_snapshot(60_100);
        let attacker = session.iter().find(|e| e.id == 5).unwrap();
        assert_eq!(attacker.total_damage_dealt, 100);
    }

    #[test]
    fn reset_returns_to_unidentified_and_clears_aggregates() {
        let analyzer = Analyzer::new(AnalyzerConfig::default());
        let ident = identifying_segment(0);
        let next = ident.seq + ident.payload.len() as u32;
        analyzer.ingest_segment(ident);
        analyzer.ingest_segment(segment(next, damage_frame(9), 0));
        assert!(!analyzer.engine().session_snapshot(0).is_empty());

        analyzer.reset();
        assert!(analyzer.engine().session_snapshot(0).is_empty());
        assert_eq!(analyzer.stats().combat_events, 0);
        // Back to square one: unidentified traffic is ignored again.
        analyzer.ingest_segment(segment(next, damage_frame(9), 0));
        assert!(analyzer.engine().session_snapshot(0).is_empty());
    }
}
