//! # tds-testing
//!
//! Test support for the TDS driver.
//!
//! [`MockTdsServer`] speaks enough of the protocol to exercise the
//! connection pipeline hermetically: pre-login negotiation, LOGIN7
//! acceptance with scripted environment changes and feature
//! acknowledgments, scripted query responses, attention acknowledgment,
//! and mid-response connection kills for resiliency tests.

#![warn(missing_docs)]

pub mod fixtures;
pub mod mock_server;

pub use mock_server::{MockResponse, MockServerBuilder, MockTdsServer};
