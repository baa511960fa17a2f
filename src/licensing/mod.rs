//! License verification, magic-link access and Paddle lifecycle processing.
//!
//! Each engine owns a clone of the pool and holds no license state between
//! calls.

pub mod admin;
mod magic_link;
mod verification;
mod webhook;

pub use magic_link::*;
pub use verification::*;
pub use webhook::*;
