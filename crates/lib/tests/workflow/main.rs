//! Workflow integration tests: full build and provision runs against a
//! temporary stack registry.

mod build_tests;
mod common;
mod pipeline_tests;
mod provision_tests;
