//! Time-shift manifest addressing, fetching and walking.

pub mod segment;
pub mod source;
pub mod walker;

pub use segment::{EncryptionMethod, KeyInfo, Manifest, Segment};
pub use source::{HttpManifestSource, ManifestSource};
pub use walker::{PlaylistWalker, WalkSummary, WalkerState};
