//! Audio decoding and acoustic fingerprinting.

pub mod decoder;
pub mod fingerprint;

pub use decoder::{decode_media, DecodedAudio};
pub use fingerprint::{fingerprint_media, RawFingerprint};
