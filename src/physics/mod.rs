//! Particle dynamics in a rotating-wall trap

pub mod accelerations;
pub mod device;
pub mod ensemble;
pub mod integrators;
pub mod math;
pub mod seeding;
pub mod simulation;
pub mod trap;
