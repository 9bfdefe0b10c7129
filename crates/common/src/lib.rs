//! Shared types for the Spotify connect gateway workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
