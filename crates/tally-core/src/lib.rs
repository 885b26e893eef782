//! tally-core: types shared by the tally agent and collection service.
//!
//! Defines the two metric kinds, the JSON wire record exchanged between
//! agent and server, the repository snapshot layout, and the HMAC codec
//! used to sign report payloads.

pub mod signing;
pub mod types;

pub use signing::{SIGNATURE_HEADER, SigningCodec};
pub use types::*;
