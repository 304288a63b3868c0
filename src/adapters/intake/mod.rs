//! Order Intake Adapters
//!
//! Front ends that feed `OrderRequest`s into the pipeline.

pub mod jsonl;

pub use jsonl::{FaultReply, IntakeSummary, JsonLinesIntake, OrderReply};
