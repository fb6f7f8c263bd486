//! Passive combat analysis for the game's TCP stream: capture boundary,
//! stream reassembly, protocol decode, and per-entity statistics.
//!
//! The pipeline is `capture -> tcp -> proto -> stats`, orchestrated by
//! [`analyzer::Analyzer`]; `replay` drives recorded captures through the
//! same path.

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod proto;
pub mod replay;
pub mod stats;
pub mod tcp;

pub use analyzer::Analyzer;
pub use config::AnalyzerConfig;
