//! Integration tests for ledgertrust
//!
//! This test suite validates:
//! - The end-to-end trust scenario across publication and verification
//! - Summaries built by one node verifying on another node
//! - Trust state surviving a database reopen
//! - Forged and replayed summaries from a hostile server

pub mod test_utils;

#[cfg(test)]
mod end_to_end_tests;

#[cfg(test)]
mod persistence_tests;

#[cfg(test)]
mod adversarial_tests;
