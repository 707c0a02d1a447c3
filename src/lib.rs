//! `mimeshell`: a tolerant, streaming MIME parser.
//!
//! The library scans RFC 5322 header blocks, splits RFC 2046 multipart
//! bodies and walks nested entity trees from any `Read` source. Every parse
//! runs in [`parser::ParseMode::Strict`] or [`parser::ParseMode::Tolerant`];
//! tolerant parses repair common damage and report what they repaired.

pub mod config;
pub mod error;
pub mod export;
pub mod mail;
pub mod model;
pub mod parser;
