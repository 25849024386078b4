//! Test suites for the host bootstrap and run loop.

mod support;
mod unit;
