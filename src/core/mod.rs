//! Core deterministic primitives.
//!
//! Randomness, the round distributions, and the multiplier curve. Nothing in
//! this module touches the clock or performs I/O.

pub mod rng;
pub mod sampler;
pub mod curve;

// Re-export core types
pub use rng::{DeterministicRng, RandomSource, SequenceSource};
pub use curve::FlightSample;
