//! Gateway configuration
//!
//! Sections are declared with `config_struct!` (defaults inline), loaded from
//! TOML, and held in a process-wide `OnceCell` for the binary. Library
//! components receive their section by value so tests never touch the global.

#[macro_use]
mod macros;
mod schemas;
mod utils;

pub use schemas::*;
pub use utils::*;
