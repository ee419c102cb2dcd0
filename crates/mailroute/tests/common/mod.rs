//! Shared test utilities for mailroute integration tests.
//!
//! This module provides:
//! - in-memory fakes for the mailbox, the index store, the model and the
//!   notification sinks
//! - `Harness`, which wires them into a pipeline and account sessions

#![allow(dead_code)]

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{quick_classifier, raw_message, test_account, Harness, ACCOUNT_ID};
