//! Engine tests
//!
//! Every helper round-trips the process through serialization before the
//! first run, so the whole suite doubles as snapshot coverage.

mod helpers;

mod array_tests;
mod basic_tests;
mod class_tests;
mod control_tests;
mod error_tests;
mod function_tests;
mod host_tests;
