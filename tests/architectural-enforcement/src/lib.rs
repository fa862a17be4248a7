//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural
//! principles in the core crate:
//! - No blocking I/O on the async runtime
//! - No blocking sleeps in production code
//!
//! These tests are designed to catch violations early in the development cycle.

#![allow(dead_code)]

pub fn placeholder() {
    // Placeholder to make this a valid library
}
