//! Terminal color constants for CLI output.

pub const RESET: &str = "\x1b[0m";
pub const GREEN: &str = "\x1b[32m";
pub const DIM: &str = "\x1b[2m";
