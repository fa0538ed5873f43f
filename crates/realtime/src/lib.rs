//! # Realtime Core
//!
//! Core modules shared by the tracking crates: the error taxonomy and the
//! outbound HTTP provider interface.

mod error;
mod provider;

pub use crate::error::*;
pub use crate::provider::*;
