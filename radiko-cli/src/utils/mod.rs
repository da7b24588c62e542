mod format;
mod headers;
pub mod progress;

pub use self::format::{format_bytes, format_duration};
pub use self::headers::split_header;
