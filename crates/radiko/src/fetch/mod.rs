//! Segment download, key resolution and decryption.

pub mod decrypt;
pub mod key_cache;
pub mod segment;

pub use decrypt::decrypt_segment;
pub use key_cache::DecryptionKeyCache;
pub use segment::{SegmentFetcher, SegmentSource};
