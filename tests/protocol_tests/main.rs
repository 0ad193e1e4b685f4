//! Protocol test suite
