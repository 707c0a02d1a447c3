//! Mail-level view of a parsed message: leaf part iteration with
//! inline/attachment classification and typed header accessors.

pub mod header;
pub mod reader;

pub use header::MailHeader;
pub use reader::{MailPart, MailReader, PartKind};
