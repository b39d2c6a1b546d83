// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Streaming AES-CBC cipher adapter.
//!
//! [`StreamingCipherAdapter`] presents the classic cipher-engine surface
//! (`init` / `update` / `finalize` / `output_size`) on top of a
//! [`NativeCryptoEngine`]. The engine does the block transformation and keeps
//! partial blocks; the adapter mirrors how many bytes are buffered so it can
//! size output buffers without asking the engine.
//!
//! # Lifecycle
//!
//! 1. Construct with [`StreamingCipherAdapter::new`] or
//!    [`StreamingCipherAdapter::with_engine`]
//! 2. [`init`](StreamingCipherAdapter::init) exactly once
//! 3. Zero or more [`update`](StreamingCipherAdapter::update) calls
//! 4. Exactly one [`finalize`](StreamingCipherAdapter::finalize)
//!
//! The native handle is released after the adapter is dropped, on the
//! [`ResourceReclaimer`] thread, or immediately via
//! [`dispose`](StreamingCipherAdapter::dispose).
//!
//! # Thread Safety
//!
//! An adapter is driven through `&mut self` and is meant for one logical
//! caller. Create one adapter per stream.

use std::sync::Arc;

use super::reclaimer::ReclaimGuard;
use super::*;

/// Where an adapter is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, `init` not yet called.
    Uninitialized,
    /// Accepting `update` and `finalize` calls.
    Initialized(Direction),
    /// `finalize` has run. Terminal.
    Finalized,
}

/// Initialization parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CipherParams<'a> {
    /// Explicit IV. Must be exactly [`BLOCK_SIZE`] bytes.
    Iv(&'a [u8]),
    /// Generate a random IV; read it back with
    /// [`StreamingCipherAdapter::iv`].
    Random,
}

#[derive(Debug)]
struct AdapterState {
    phase: Phase,
    /// Input bytes accepted but not yet emitted, modulo the block size.
    buffered: usize,
    iv: Option<[u8; BLOCK_SIZE]>,
    handle: Option<HandleRef>,
    guard: Option<ReclaimGuard>,
}

/// AES-CBC/PKCS5 streaming cipher over a native engine.
pub struct StreamingCipherAdapter {
    engine: Arc<dyn NativeCryptoEngine>,
    state: AdapterState,
}

impl Default for StreamingCipherAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingCipherAdapter {
    /// The only supported mode name.
    pub const MODE: &'static str = "CBC";

    /// The only supported padding name. The empty string selects it too.
    pub const PADDING: &'static str = "PKCS5Padding";

    /// Creates an adapter backed by the process-wide OpenSSL engine.
    pub fn new() -> Self {
        Self::with_engine(OsslEngine::shared())
    }

    /// Creates an adapter backed by `engine`.
    pub fn with_engine(engine: Arc<dyn NativeCryptoEngine>) -> Self {
        Self {
            engine,
            state: AdapterState {
                phase: Phase::Uninitialized,
                buffered: 0,
                iv: None,
                handle: None,
                guard: None,
            },
        }
    }

    /// Selects the block cipher mode.
    ///
    /// # Errors
    ///
    /// [`CipherError::UnsupportedMode`] for anything other than `"CBC"`.
    pub fn set_mode(&mut self, mode: &str) -> Result<(), CipherError> {
        if mode != Self::MODE {
            Err(CipherError::UnsupportedMode)?;
        }
        Ok(())
    }

    /// Selects the padding scheme.
    ///
    /// # Errors
    ///
    /// [`CipherError::UnsupportedPadding`] for anything other than `""` or
    /// `"PKCS5Padding"`.
    pub fn set_padding(&mut self, padding: &str) -> Result<(), CipherError> {
        if !padding.is_empty() && padding != Self::PADDING {
            Err(CipherError::UnsupportedPadding)?;
        }
        Ok(())
    }

    /// Initializes the adapter for `direction` with `key`.
    ///
    /// Creates the native context and registers it with the
    /// [`ResourceReclaimer`], starting the reclaimer if this is the first
    /// adapter in the process.
    ///
    /// # Errors
    ///
    /// - [`CipherError::InvalidState`] if the adapter was initialized before;
    ///   the existing state is left untouched
    /// - [`CipherError::InvalidIv`] if an explicit IV is not 16 bytes
    /// - [`CipherError::InvalidKey`] if the key is not 16, 24 or 32 bytes
    /// - [`CipherError::RngError`] if a random IV cannot be generated
    pub fn init(
        &mut self,
        direction: Direction,
        key: &[u8],
        params: CipherParams<'_>,
    ) -> Result<(), CipherError> {
        if self.state.phase != Phase::Uninitialized {
            Err(CipherError::InvalidState)?;
        }

        let iv = match params {
            CipherParams::Iv(iv) => {
                <[u8; BLOCK_SIZE]>::try_from(iv).map_err(|_| CipherError::InvalidIv)?
            }
            CipherParams::Random => Rng::rand_iv()?,
        };

        let handle = self.engine.create_context(direction, key, &iv)?;
        let handle_ref = handle.handle_ref();
        let guard = ResourceReclaimer::global().register(handle, self.engine.clone());

        self.state = AdapterState {
            phase: Phase::Initialized(direction),
            buffered: 0,
            iv: Some(iv),
            handle: Some(handle_ref),
            guard: Some(guard),
        };
        Ok(())
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// A copy of the IV, or `None` before `init`.
    pub fn iv(&self) -> Option<[u8; BLOCK_SIZE]> {
        self.state.iv
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Bytes accepted but not yet emitted, as tracked by the adapter.
    pub fn buffered_len(&self) -> usize {
        self.state.buffered
    }

    /// Allocation ceiling for an `update` or `finalize` over `input_len`
    /// more bytes.
    ///
    /// Rounds the buffered plus new bytes up to the next block boundary and
    /// always reserves at least one byte of padding, so a block-aligned total
    /// gets a whole extra block. This is not what `update` produces, only a
    /// size that is always large enough.
    pub fn output_size(&self, input_len: usize) -> usize {
        let total = self.state.buffered + input_len;
        let pad = BLOCK_SIZE - total % BLOCK_SIZE;
        total + pad
    }

    /// Encrypts or decrypts `input`, writing the complete blocks that are
    /// ready.
    ///
    /// # Arguments
    ///
    /// * `input` - Next chunk of the stream
    /// * `output` - Output buffer. If `None`, returns the allocation ceiling
    ///   [`output_size`](Self::output_size) instead.
    ///
    /// # Returns
    ///
    /// The number of bytes written, a multiple of the block size. Trailing
    /// partial-block input stays buffered.
    ///
    /// # Errors
    ///
    /// - [`CipherError::InvalidState`] unless initialized and not finalized
    /// - [`CipherError::ShortOutputBuffer`] if `output` cannot hold the bytes
    ///   this call produces; nothing is consumed
    pub fn update(&mut self, input: &[u8], output: Option<&mut [u8]>) -> Result<usize, CipherError> {
        let (handle, _) = self.active()?;
        let Some(output) = output else {
            return Ok(self.output_size(input.len()));
        };

        let written = self.engine.update(handle, input, output)?;
        self.state.buffered = advance_buffered(self.state.buffered, input.len(), written);
        tracing::trace!(
            handle = %handle,
            consumed = input.len(),
            written,
            buffered = self.state.buffered,
            "cipher update"
        );
        Ok(written)
    }

    /// Like [`update`](Self::update) but returns exactly the produced bytes.
    pub fn update_vec(&mut self, input: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut output = vec![0u8; self.update(input, None)?];
        let written = self.update(input, Some(&mut output))?;
        output.truncate(written);
        Ok(output)
    }

    /// Processes the last chunk and completes the operation.
    ///
    /// Encryption appends PKCS5 padding. Decryption strips and validates it.
    ///
    /// # Arguments
    ///
    /// * `input` - Final chunk of the stream, possibly empty
    /// * `output` - Output buffer of at least
    ///   [`output_size(input.len())`](Self::output_size) bytes. If `None`,
    ///   returns that size instead.
    ///
    /// # Returns
    ///
    /// The exact number of bytes written.
    ///
    /// # Errors
    ///
    /// - [`CipherError::InvalidState`] unless initialized and not finalized
    /// - [`CipherError::ShortOutputBuffer`] if `output` is smaller than the
    ///   ceiling; the adapter is unchanged and the call may be retried
    /// - [`CipherError::IllegalBlockSize`] if the decryption input was not a
    ///   whole number of blocks
    /// - [`CipherError::BadPadding`] if the decrypted padding is invalid
    ///
    /// Once the engine has been driven the adapter is finalized, whether or not
    /// the call succeeds.
    pub fn finalize(
        &mut self,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, CipherError> {
        let (handle, direction) = self.active()?;
        let ceiling = self.output_size(input.len());
        let Some(output) = output else {
            return Ok(ceiling);
        };
        if output.len() < ceiling {
            Err(CipherError::ShortOutputBuffer)?;
        }

        self.state.phase = Phase::Finalized;
        self.state.buffered = 0;

        let mut count = self.engine.update(handle, input, output)?;
        count += self.engine.finalize(handle, &mut output[count..])?;
        tracing::trace!(handle = %handle, ?direction, count, "cipher finalized");
        Ok(count)
    }

    /// Like [`finalize`](Self::finalize) but returns exactly the produced
    /// bytes.
    pub fn finalize_vec(&mut self, input: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut output = vec![0u8; self.finalize(input, None)?];
        let written = self.finalize(input, Some(&mut output))?;
        output.truncate(written);
        Ok(output)
    }

    /// Releases the native handle now instead of on the reclaimer thread.
    pub fn dispose(mut self) {
        if let Some(guard) = self.state.guard.take() {
            guard.release_now();
        }
    }

    fn active(&self) -> Result<(HandleRef, Direction), CipherError> {
        match (self.state.phase, self.state.handle) {
            (Phase::Initialized(direction), Some(handle)) => Ok((handle, direction)),
            _ => Err(CipherError::InvalidState),
        }
    }
}

/// `(buffered + consumed - produced) mod BLOCK_SIZE`, never negative.
///
/// `produced` can exceed `buffered + consumed` when decryption releases a
/// block the engine was holding back.
fn advance_buffered(buffered: usize, consumed: usize, produced: usize) -> usize {
    let delta = (buffered + consumed) as i128 - produced as i128;
    delta.rem_euclid(BLOCK_SIZE as i128) as usize
}
