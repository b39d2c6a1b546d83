// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Streaming AES-CBC cipher adapter over a native cryptographic engine.
//!
//! The crate exposes a generic cipher-engine call surface (init, update,
//! finalize, output sizing) and delegates the block transformation itself to a
//! [`NativeCryptoEngine`]. Two things are handled here rather than in the
//! engine:
//!
//! - **Buffering state**: the adapter tracks how many input bytes the engine is
//!   holding back as a partial block, so [`StreamingCipherAdapter::output_size`]
//!   is always a safe allocation ceiling.
//! - **Native handle lifetime**: every handle the engine creates is registered
//!   with the process-wide [`ResourceReclaimer`], which releases it exactly once
//!   after the owning adapter is dropped. [`StreamingCipherAdapter::dispose`]
//!   releases synchronously instead.
//!
//! # Engines
//!
//! - [`OsslEngine`]: OpenSSL EVP cipher contexts (AES-128/192/256-CBC with
//!   PKCS#5 padding). This is the engine used by [`StreamingCipherAdapter::new`].
//!
//! # Example
//!
//! ```no_run
//! use aes_cbc_adapter::*;
//!
//! # fn main() -> Result<(), CipherError> {
//! let key = [0u8; 16];
//! let mut cipher = StreamingCipherAdapter::new();
//! cipher.init(Direction::Encrypt, &key, CipherParams::Random)?;
//! let mut ciphertext = cipher.update_vec(b"hello ")?;
//! ciphertext.extend(cipher.finalize_vec(b"world")?);
//! assert_eq!(ciphertext.len(), 16);
//! # Ok(())
//! # }
//! ```

mod adapter;
mod engine;
mod rand;
mod reclaimer;

pub use adapter::*;
pub use engine::*;
pub use rand::*;
pub use reclaimer::ResourceReclaimer;
use thiserror::Error;

/// AES block size in bytes.
///
/// AES always operates on 128-bit blocks regardless of key size.
pub const BLOCK_SIZE: usize = 16;

/// Direction of a cipher operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Plaintext in, ciphertext out.
    Encrypt,
    /// Ciphertext in, plaintext out.
    Decrypt,
}

/// Errors returned by the adapter and by native engines.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    /// The operation is not valid in the adapter's current phase
    /// (re-initialization, use before init, or use after finalize).
    #[error("invalid cipher state")]
    InvalidState,
    /// Only CBC mode is supported.
    #[error("unsupported cipher mode")]
    UnsupportedMode,
    /// Only PKCS5 padding (or the default) is supported.
    #[error("unsupported padding")]
    UnsupportedPadding,
    /// The key length is not 16, 24 or 32 bytes.
    #[error("invalid AES key size")]
    InvalidKey,
    /// The IV is not exactly one block long.
    #[error("invalid IV size")]
    InvalidIv,
    /// The caller-supplied output buffer is too small.
    #[error("output buffer too small")]
    ShortOutputBuffer,
    /// Decrypted data does not end in a valid PKCS5 padding pattern.
    #[error("bad padding")]
    BadPadding,
    /// Total decryption input is not a multiple of the block size.
    #[error("input length not a multiple of the block size")]
    IllegalBlockSize,
    /// The handle does not refer to a live native context.
    #[error("invalid native cipher handle")]
    InvalidHandle,
    /// The native engine failed unexpectedly.
    #[error("native cipher engine failure")]
    EngineError,
    /// Random number generation failed.
    #[error("random number generation failed")]
    RngError,
}

#[cfg(test)]
mod tests;
