// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Boundary contract to the native cryptographic engine.
//!
//! A [`NativeCryptoEngine`] owns the real cipher state (key schedule, chaining
//! value, partial block) behind opaque handles. The adapter never inspects
//! that state; it only drives it through this trait.
//!
//! # Handles
//!
//! Creating a context yields a [`CipherHandle`], which is the *owning* token for
//! the native resource. It is neither `Copy` nor `Clone`, and
//! [`NativeCryptoEngine::release`] takes it by value, so a handle cannot be
//! released twice. Day-to-day operations use the non-owning [`HandleRef`];
//! once the owning handle has been released, engines answer operations on a
//! stale `HandleRef` with [`CipherError::InvalidHandle`].

mod handle_table;
mod ossl;

use std::fmt;
use std::num::NonZeroU32;

pub(crate) use handle_table::*;
pub use ossl::OsslEngine;

use super::*;

/// Owning token for a native cipher context.
#[derive(PartialEq, Eq, Hash)]
pub struct CipherHandle(NonZeroU32);

impl CipherHandle {
    /// Wraps a raw handle id minted by an engine.
    ///
    /// Only engine implementations should call this, once per context they
    /// create.
    pub fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Returns the non-owning reference used for update and finalize calls.
    pub fn handle_ref(&self) -> HandleRef {
        HandleRef(self.0)
    }
}

impl fmt::Debug for CipherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherHandle({:#x})", self.0.get())
    }
}

/// Non-owning reference to a native cipher context.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct HandleRef(NonZeroU32);

impl HandleRef {
    /// Raw id, for logging and handle table lookups.
    pub fn raw(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleRef({:#x})", self.0.get())
    }
}

impl fmt::Display for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Native AES-CBC engine with PKCS#5 padding.
///
/// Implementations must be usable from any thread: contexts are created on
/// caller threads and released on the reclaimer thread.
pub trait NativeCryptoEngine: Send + Sync {
    /// Creates a cipher context for `direction` keyed with `key`, chaining from
    /// `iv`.
    ///
    /// # Errors
    ///
    /// - [`CipherError::InvalidKey`] if `key` is not 16, 24 or 32 bytes
    /// - [`CipherError::EngineError`] if the native context cannot be created
    fn create_context(
        &self,
        direction: Direction,
        key: &[u8],
        iv: &[u8; BLOCK_SIZE],
    ) -> Result<CipherHandle, CipherError>;

    /// Feeds `input` through the context and writes every complete block that
    /// is ready to `output`.
    ///
    /// # Returns
    ///
    /// The number of bytes written, always a multiple of [`BLOCK_SIZE`] and
    /// possibly zero. Bytes not written stay buffered inside the context.
    ///
    /// # Errors
    ///
    /// - [`CipherError::ShortOutputBuffer`] if `output` cannot hold the bytes
    ///   this call would produce; the context is left untouched
    /// - [`CipherError::InvalidHandle`] if `handle` is stale
    /// - [`CipherError::InvalidState`] if the context was already finalized
    fn update(
        &self,
        handle: HandleRef,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, CipherError>;

    /// Completes the operation over whatever the context still buffers.
    ///
    /// Encryption pads and emits the final block. Decryption strips and
    /// validates the padding.
    ///
    /// # Errors
    ///
    /// - [`CipherError::ShortOutputBuffer`] if `output` is too small
    /// - [`CipherError::IllegalBlockSize`] if decryption input was not
    ///   block-aligned
    /// - [`CipherError::BadPadding`] if decrypted padding is invalid
    /// - [`CipherError::InvalidHandle`] if `handle` is stale
    fn finalize(&self, handle: HandleRef, output: &mut [u8]) -> Result<usize, CipherError>;

    /// Destroys the context behind `handle`.
    fn release(&self, handle: CipherHandle) -> Result<(), CipherError>;
}
