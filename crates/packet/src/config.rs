//! Tuning knobs for the analyzer.
//!
//! These are empirical heuristics, not protocol invariants; the defaults
//! below are the values observed to behave well against live traffic.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// How long an unfilled sequence gap may stall the stream before the
    /// reassembler force-resynchronizes onto newer data (milliseconds).
    pub gap_timeout_ms: i64,
    /// How long the identified flow may stay completely silent before the
    /// analyzer drops it and waits to re-identify a server (milliseconds).
    pub idle_timeout_ms: i64,
    /// Largest gap between two consecutive events of one entity that still
    /// counts toward its active combat time (milliseconds).
    pub combat_gap_ms: i64,
    /// A section (encounter) ends after this long without a damage event
    /// (milliseconds).
    pub section_timeout_ms: i64,
    /// Trailing window used for instantaneous DPS/HPS (milliseconds).
    pub window_ms: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            gap_timeout_ms: 2_000,
            idle_timeout_ms: 10_000,
            combat_gap_ms: 1_000,
            section_timeout_ms: 5_000,
            window_ms: 1_000,
        }
    }
}
