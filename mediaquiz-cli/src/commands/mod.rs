//! Subcommand implementations.

pub mod duplicates;
pub mod manifest;
pub mod promote;
pub mod sync;
