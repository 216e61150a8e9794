//! Utility functions for building and inspecting separation inputs.
//!
//! # Modules
//!
//! - [`generation`] - Deterministic test signal generation

pub mod generation;

pub use generation::*;
