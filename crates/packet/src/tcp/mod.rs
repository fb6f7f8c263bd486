//! TCP-level stream reconstruction: flow identification and reassembly.

pub mod identify;
pub mod reassembler;

pub use identify::{IdentifiedFlow, ServerIdentifier};
pub use reassembler::{StreamReassembler, SubmitOutcome, seq_delta};
