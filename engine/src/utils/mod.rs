//! Small helpers shared by the engine and the command line tools.

pub mod env;

pub use env::{EnvUtils, EnvVarError};
