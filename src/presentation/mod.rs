//! Presentation layer: command-line front end.

/// Command dispatch.
pub mod cli;

pub use cli::{CliContext, execute};
