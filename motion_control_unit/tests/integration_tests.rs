//! Integration tests for the Motion Control Unit.
//!
//! These tests run the control core against the simulated master: binding,
//! drive enable sequences, AUTO and MANUAL target generation, fault
//! recovery, shutdown settling and the full supervisor lifecycle.

mod integration;
