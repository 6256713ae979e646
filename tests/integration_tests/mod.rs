//! Integration tests module
//!
//! End-to-end check cycles driven through the in-memory browser:
//! - Navigation, probing and availability notifications
//! - Busy backoff and adaptive frequency
//! - Error handling, dedup and recovery scenarios

pub mod cycle_test;
pub mod error_scenarios;
pub mod fixtures;
