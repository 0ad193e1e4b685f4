//! Multiplexer test suite

mod multiplexer_tests;
