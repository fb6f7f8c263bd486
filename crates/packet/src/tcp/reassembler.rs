//! TCP payload reassembly for the one identified server flow.
//!
//! The sender is not under our control: segments arrive out of order,
//! duplicated, or never. Policy, in order of preference: reorder, wait a
//! bounded time for a gap to fill, then resynchronize and accept the data
//! loss. Idle detection lives here too but the decision to drop the flow
//! belongs to the caller.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::capture::FlowKey;

/// Reassembly state for one flow. Only bytes whose ordering is certain ever
/// reach `stream`; `pending` never keeps a segment older than `next_seq`.
#[derive(Debug, Default)]
struct ReassemblyState {
    next_seq: Option<u32>,
    pending: HashMap<u32, Vec<u8>>,
    stream: Vec<u8>,
    last_activity_ms: i64,
    gap_since_ms: Option<i64>,
}

#[derive(Debug)]
pub struct StreamReassembler {
    flow: FlowKey,
    state: ReassemblyState,
    gap_timeout_ms: i64,
    idle_timeout_ms: i64,
}

/// What `submit` did with the segment, for the caller's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Buffered,
    Dropped,
    Resynchronized,
}

/// Wraparound-safe sequence comparison: the difference interpreted as a
/// 32-bit signed delta, so 0x00000005 sorts after 0xFFFFFFF0.
pub fn seq_delta(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

impl StreamReassembler {
    pub fn new(flow: FlowKey, seed_seq: Option<u32>, gap_timeout_ms: i64, idle_timeout_ms: i64) -> Self {
        Self {
            flow,
            state: ReassemblyState {
                next_seq: seed_seq,
                ..Default::default()
            },
            gap_timeout_ms,
            idle_timeout_ms,
        }
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// True once the flow has been silent long enough that it should be
    /// abandoned and re-identified. Evaluated by the caller on every packet
    /// arrival; there is no timer thread.
    pub fn is_idle(&self, now_ms: i64) -> bool {
        self.state.last_activity_ms != 0
            && now_ms.saturating_sub(self.state.last_activity_ms) >= self.idle_timeout_ms
    }

    /// Feed one segment. Contiguous data lands in the internal stream
    /// buffer; the caller extracts frames from `buffer_mut` afterwards.
    pub fn submit(&mut self, seq: u32, payload: &[u8], now_ms: i64) -> SubmitOutcome {
        self.state.last_activity_ms = now_ms;
        if payload.is_empty() {
            return SubmitOutcome::Dropped;
        }

        let next = match self.state.next_seq {
            Some(next) => next,
            // First segment after identification seeds the sequence space.
            None => {
                self.state.next_seq = Some(seq);
                seq
            }
        };

        let delta = seq_delta(seq, next);
        if delta == 0 {
            self.accept(seq, payload);
            self.state.gap_since_ms = None;
            self.drain_pending();
            return SubmitOutcome::Accepted;
        }

        if delta < 0 {
            // Stale retransmit or duplicate.
            return SubmitOutcome::Dropped;
        }

        // Gap ahead of us: hold the segment and wait, bounded.
        self.state.pending.insert(seq, payload.to_vec());
        let since = *self.state.gap_since_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) >= self.gap_timeout_ms {
            self.resynchronize(seq, now_ms);
            return SubmitOutcome::Resynchronized;
        }
        debug!(flow = %self.flow, expected = next, got = seq, "buffering out-of-order segment");
        SubmitOutcome::Buffered
    }

    /// Contiguous decoded bytes not yet consumed by the frame splitter.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.state.stream
    }

    fn accept(&mut self, seq: u32, payload: &[u8]) {
        self.state.stream.extend_from_slice(payload);
        self.state.next_seq = Some(seq.wrapping_add(payload.len() as u32));
    }

    /// Append any buffered segment that has become contiguous, and drop
    /// everything the advancing edge has superseded.
    fn drain_pending(&mut self) {
        while let Some(next) = self.state.next_seq {
            match self.state.pending.remove(&next) {
                Some(payload) => self.accept(next, &payload),
                None => break,
            }
        }
        if let Some(next) = self.state.next_seq {
            self.state.pending.retain(|&seq, _| seq_delta(seq, next) >= 0);
        }
    }

    /// The gap never filled: throw away everything we were holding and
    /// restart at the newest data. Losing bytes beats stalling forever.
    fn resynchronize(&mut self, seq: u32, now_ms: i64) {
        warn!(
            flow = %self.flow,
            expected = self.state.next_seq,
            restart_at = seq,
            buffered = self.state.pending.len(),
            "sequence gap persisted past timeout, resynchronizing"
        );
        let payload = self.state.pending.remove(&seq).unwrap_or_default();
        self.state.pending.clear();
        self.state.stream.clear();
        self.state.gap_since_ms = None;
        self.state.next_seq = Some(seq);
        if !payload.is_empty() {
            self.accept(seq, &payload);
        }
        self.state.last_activity_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler(seed: Option<u32>) -> StreamReassembler {
        StreamReassembler::new("10.0.0.2:5000-10.0.0.1:61000".into(), seed, 2_000, 10_000)
    }

    #[test]
    fn in_order_segments_concatenate() {
        let mut r = reassembler(Some(100));
        r.submit(100, b"abc", 0);
        r.submit(103, b"def", 1);
        assert_eq!(r.buffer_mut().as_slice(), b"abcdef");
    }

    #[test]
    fn out_of_order_arrival_is_reordered() {
        let mut r = reassembler(Some(100));
        assert_eq!(r.submit(103, b"def", 0), SubmitOutcome::Buffered);
        assert_eq!(r.submit(100, b"abc", 1), SubmitOutcome::Accepted);
        assert_eq!(r.buffer_mut().as_slice(), b"abcdef");
    }

    #[test]
    fn any_arrival_order_yields_identical_stream() {
        let segments: [(u32, &[u8]); 3] = [(100, b"aa"), (102, b"bbb"), (105, b"c")];
        let mut expected: Option<Vec<u8>> = None;
        // All six permutations of three segments, well inside the gap timeout.
        for perm in [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ] {
            let mut r = reassembler(Some(100));
            for (at, idx) in perm.into_iter().enumerate() {
                let (seq, payload) = segments[idx];
                r.submit(seq, payload, at as i64);
            }
            let stream = r.buffer_mut().clone();
            match &expected {
                Some(prev) => assert_eq!(prev, &stream),
                None => expected = Some(stream),
            }
        }
        assert_eq!(expected.unwrap(), b"aabbbc");
    }

    #[test]
    fn stale_and_duplicate_segments_are_dropped() {
        let mut r = reassembler(Some(100));
        r.submit(100, b"abc", 0);
        assert_eq!(r.submit(100, b"abc", 1), SubmitOutcome::Dropped);
        assert_eq!(r.submit(90, b"zzzz", 2), SubmitOutcome::Dropped);
        assert_eq!(r.buffer_mut().as_slice(), b"abc");
    }

    #[test]
    fn sequence_wraparound_orders_correctly() {
        let mut r = reassembler(Some(0xFFFF_FFF0));
        r.submit(0xFFFF_FFF0, &[b'x'; 0x15], 0);
        assert_eq!(r.state.next_seq, Some(0x0000_0005));
        assert_eq!(r.submit(0x0000_0005, b"y", 1), SubmitOutcome::Accepted);
        // A pre-wrap sequence number is now stale, not "far ahead".
        assert_eq!(r.submit(0xFFFF_FFF8, b"old", 2), SubmitOutcome::Dropped);
    }

    #[test]
    fn persistent_gap_resynchronizes_instead_of_stalling() {
        let mut r = reassembler(Some(100));
        r.submit(100, b"abc", 0);
        r.buffer_mut().clear();
        // Segment 103 never arrives.
        assert_eq!(r.submit(200, b"new", 10), SubmitOutcome::Buffered);
        assert_eq!(r.submit(203, b"er", 2_100), SubmitOutcome::Resynchronized);
        // The stream restarts at the segment that triggered the resync.
        assert_eq!(r.buffer_mut().as_slice(), b"er");
        assert_eq!(r.submit(205, b"!", 2_101), SubmitOutcome::Accepted);
        assert_eq!(r.buffer_mut().as_slice(), b"er!");
    }

    #[test]
    fn unconsumed_stream_is_discarded_on_resync() {
        let mut r = reassembler(Some(100));
        r.submit(100, b"partial-frame", 0);
        r.submit(300, b"restart", 0);
        assert_eq!(r.submit(400, b"x", 5_000), SubmitOutcome::Resynchronized);
        // Pre-gap bytes and the stale buffered segment are both gone.
        assert_eq!(r.buffer_mut().as_slice(), b"x");
    }

    #[test]
    fn idle_detection_uses_last_activity() {
        let mut r = reassembler(Some(100));
        r.submit(100, b"abc", 1_000);
        assert!(!r.is_idle(5_000));
        assert!(r.is_idle(11_000));
        // Any traffic on the flow, even stale, counts as activity.
        r.submit(90, b"dup", 11_000);
        assert!(!r.is_idle(12_000));
    }

    #[test]
    fn bootstraps_from_first_segment_without_seed() {
        let mut r = reassembler(None);
        assert_eq!(r.submit(7_777, b"go", 0), SubmitOutcome::Accepted);
        assert_eq!(r.buffer_mut().as_slice(), b"go");
    }
}
