//! Email parsing: EML messages, header decoding, multipart splitting and
//! transfer-encoding decoding.

pub mod eml;
pub mod header;
pub mod multipart;
pub mod transfer;
