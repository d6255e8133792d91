//! Property-based tests for capacity arithmetic and candidate soundness

mod capacity;
mod resolver;
