//! Order Intake - Library Root
//!
//! Bounded concurrent order-intake pipeline with centralized fault
//! isolation. Re-exports all modules for integration tests and benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
