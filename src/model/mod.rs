//! Data model: MIME parts, the message root and attachment metadata.

pub mod attachment;
pub mod message;
pub mod part;

pub use message::Message;
pub use part::MimePart;
