//! Tor v2 onion vanity search over RSA public exponents
//!
//! The modulus of a key is kept fixed and only the public exponent changes.
//! Everything before the block holding the exponent is hashed once per key,
//! so each candidate costs one or two SHA-1 compressions.

pub mod backend;
pub mod base32;
pub mod der;
pub mod devices;
pub mod error;
pub mod message;
pub mod onion;
pub mod patch;
pub mod pattern;
pub mod sha1;
pub mod trial;

pub use backend::{
    format_speed, select_backend, BackendInfo, CpuBackend, ExponentRange, FoundKey, Progress,
    SearchConfig, EXP_MAX, EXP_MIN,
};
pub use der::{encode_public_key, locate_exponent, ExponentLocation, FieldSpan};
pub use devices::{list_devices, DeviceInfo, DeviceKind};
pub use error::{Error, Result};
pub use message::MessageBuffer;
pub use onion::Identifier;
pub use patch::{apply_exponent, patch_block_words, patch_field, ExponentBytes, PatchOutcome};
pub use pattern::{TargetPattern, TargetSet};
pub use sha1::{compress, BlockHasher, Digest, HashState};
pub use trial::{PatchMode, SearchKey, TrialDriver, TrialOutcome};
