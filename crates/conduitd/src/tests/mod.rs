//! Test suites for the bridge bootstrap, listener and end-to-end protocol.

mod support;
