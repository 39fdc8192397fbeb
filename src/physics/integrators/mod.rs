//! Time integration for trapped-particle ensembles

pub mod bend_kick;

pub use bend_kick::{BendKickUpdater, DampingCoefficients};
