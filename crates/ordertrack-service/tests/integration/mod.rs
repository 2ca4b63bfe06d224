//! Integration tests for the order tracking service.
//!
//! These tests verify the interaction between components:
//! - Price feed connection lifecycle and resubscription
//! - Tick flow from the feed into the registry
//! - End-to-end trigger and settlement paths

pub mod common;
