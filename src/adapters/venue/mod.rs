//! Execution Venue Adapters
//!
//! Implementations of the `ExecutionVenue` port.

pub mod paper;

pub use paper::PaperVenue;
