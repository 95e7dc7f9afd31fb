//! Random access to message files: one shared handle, many windows over it.

pub mod source;
pub mod window;

pub use window::WindowedStream;
