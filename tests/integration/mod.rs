//! Integration tests for the placement core

mod allocations;
mod candidate_scenarios;
mod concurrency;
mod provider_tree;
pub mod test_utils;
