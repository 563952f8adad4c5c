//! Integration test driver for `tests/integration/`.
//!
//! Each `mod` below maps to a file that exercises one slice of the
//! service against simulated hardware.  Everything runs on the host.

mod bus_tests;
mod mock_hw;
mod service_tests;
