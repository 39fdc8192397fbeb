//! iontrap library
//!
//! Bend-kick integration of charged particles in a rotating-wall trap, with
//! headless Bevy plugins that drive it. The library is split out from the
//! binary to enable integration testing.

pub mod cli;
pub mod config;
pub mod error;
pub mod physics;
pub mod plugins;
pub mod prelude;
pub mod resources;
pub mod states;

// Test utilities are public for integration tests
pub mod test_utils;
