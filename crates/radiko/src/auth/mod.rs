//! Playback authorization: member login followed by the two-step
//! challenge/response handshake.

pub mod key;
pub mod session;

pub use key::KeyDeriver;
pub use session::{AuthSession, AuthToken, PartialAuth};
