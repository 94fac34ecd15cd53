//! Scenario tests that need the in-crate test doubles

pub mod test_helpers;

mod instruction_ordering_tests;
