//! `emlShell`: a zero-copy MIME part tree for `.eml` files.
//!
//! This crate opens a message file once and exposes every MIME part as a
//! window over that single handle: header lines, a body byte range, and for
//! multipart containers the list of child parts split on boundary lines.

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod store;
