//! Core data model types: header fields and header blocks.

pub mod header;

pub use header::{Header, HeaderField};
