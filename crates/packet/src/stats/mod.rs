//! Combat statistics aggregation.

pub mod aggregate;
pub mod engine;

pub use aggregate::{EntitySnapshot, FrozenSection, MeterSnapshot, SkillSnapshot};
pub use engine::{AggregationEngine, EntityInfoSnapshot, InstantRates};
