//! Export functionality: decoded message parts to files.

pub mod parts;
