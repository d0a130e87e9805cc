//! Audio codec boundary: decoding source recordings and encoding results.

pub mod decode;
pub mod encode;

pub use decode::{decode, DecodedAudio};
pub use encode::encode;
