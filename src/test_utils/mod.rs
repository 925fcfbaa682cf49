//! Shared test utilities for the fundamentals forwarder.
//!
//! Builders for records and entities, HTML page generators, scripted
//! transports and a mock upstream server.

#![cfg(test)]

pub mod builders;
pub mod config;
pub mod html;
pub mod mocks;
