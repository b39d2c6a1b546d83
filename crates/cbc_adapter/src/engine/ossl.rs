// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! OpenSSL-backed native engine.
//!
//! Each cipher context is an OpenSSL `Crypter` (an `EVP_CIPHER_CTX`) stored in
//! a [`HandleTable`]. PKCS#5 padding is always enabled.
//!
//! # Output accounting
//!
//! OpenSSL requires `input.len() + block_size` bytes of output space on every
//! update, more than the caller-facing contract promises. The engine therefore
//! tracks how many bytes the EVP context holds and computes the exact output
//! of each call up front:
//!
//! - **Encrypt**: every complete block is emitted; fewer than 16 bytes stay held.
//! - **Decrypt**: same, except that when the running total is block-aligned the
//!   last block is held back for padding removal in `finalize`.
//!
//! When the caller's buffer is smaller than OpenSSL wants, output is staged in
//! a zeroizing scratch buffer and copied out.

use std::sync::Arc;
use std::sync::LazyLock;

use openssl::symm::Cipher;
use openssl::symm::Crypter;
use openssl::symm::Mode;
use zeroize::Zeroizing;

use super::*;

/// Per-handle state of the OpenSSL engine.
struct OsslContext {
    crypter: Crypter,
    direction: Direction,
    /// Bytes accepted but not yet emitted by the EVP context.
    held: usize,
    finalized: bool,
}

impl OsslContext {
    /// Exact number of bytes the next update over `input_len` bytes emits,
    /// and how many bytes remain held afterwards.
    fn plan_update(&self, input_len: usize) -> (usize, usize) {
        let total = self.held + input_len;
        if input_len == 0 {
            return (0, self.held);
        }
        let tail = total % BLOCK_SIZE;
        match self.direction {
            Direction::Encrypt => (total - tail, tail),
            Direction::Decrypt if tail == 0 => (total - BLOCK_SIZE, BLOCK_SIZE),
            Direction::Decrypt => (total - tail, tail),
        }
    }

    fn error(&self) -> CipherError {
        match self.direction {
            Direction::Encrypt => CipherError::EngineError,
            Direction::Decrypt => CipherError::BadPadding,
        }
    }

    fn update(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, CipherError> {
        if self.finalized {
            Err(CipherError::InvalidState)?;
        }

        let (expected, held) = self.plan_update(input.len());
        if output.len() < expected {
            Err(CipherError::ShortOutputBuffer)?;
        }
        if input.is_empty() {
            return Ok(0);
        }

        let written = if output.len() >= input.len() + BLOCK_SIZE {
            self.crypter
                .update(input, output)
                .map_err(|_| CipherError::EngineError)?
        } else {
            let mut scratch = Zeroizing::new(vec![0u8; input.len() + BLOCK_SIZE]);
            let count = self
                .crypter
                .update(input, &mut scratch)
                .map_err(|_| CipherError::EngineError)?;
            output[..count].copy_from_slice(&scratch[..count]);
            count
        };

        if written != expected {
            tracing::warn!(written, expected, "native update produced unexpected length");
            Err(CipherError::EngineError)?;
        }
        self.held = held;
        Ok(written)
    }

    fn finalize(&mut self, output: &mut [u8]) -> Result<usize, CipherError> {
        if self.finalized {
            Err(CipherError::InvalidState)?;
        }

        match self.direction {
            // Padding always yields exactly one block.
            Direction::Encrypt if output.len() < BLOCK_SIZE => {
                Err(CipherError::ShortOutputBuffer)?;
            }
            Direction::Decrypt if self.held % BLOCK_SIZE != 0 => {
                Err(CipherError::IllegalBlockSize)?;
            }
            _ => {}
        }

        self.finalized = true;
        self.held = 0;

        let mut scratch = Zeroizing::new([0u8; BLOCK_SIZE]);
        let count = self
            .crypter
            .finalize(&mut scratch[..])
            .map_err(|_| self.error())?;
        if output.len() < count {
            Err(CipherError::ShortOutputBuffer)?;
        }
        output[..count].copy_from_slice(&scratch[..count]);
        Ok(count)
    }
}

/// OpenSSL implementation of [`NativeCryptoEngine`].
#[derive(Default)]
pub struct OsslEngine {
    contexts: HandleTable<OsslContext>,
}

static SHARED_ENGINE: LazyLock<Arc<OsslEngine>> = LazyLock::new(|| Arc::new(OsslEngine::new()));

impl OsslEngine {
    /// Creates an engine with its own, empty handle table.
    pub fn new() -> Self {
        openssl::init();
        Self::default()
    }

    /// Process-wide engine used by [`StreamingCipherAdapter::new`].
    pub fn shared() -> Arc<OsslEngine> {
        SHARED_ENGINE.clone()
    }

    /// Number of contexts created and not yet released.
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Returns the AES-CBC cipher for a key of `key_size` bytes.
    fn cipher(key_size: usize) -> Result<Cipher, CipherError> {
        match key_size {
            16 => Ok(Cipher::aes_128_cbc()),
            24 => Ok(Cipher::aes_192_cbc()),
            32 => Ok(Cipher::aes_256_cbc()),
            _ => Err(CipherError::InvalidKey),
        }
    }
}

impl NativeCryptoEngine for OsslEngine {
    fn create_context(
        &self,
        direction: Direction,
        key: &[u8],
        iv: &[u8; BLOCK_SIZE],
    ) -> Result<CipherHandle, CipherError> {
        let mode = match direction {
            Direction::Encrypt => Mode::Encrypt,
            Direction::Decrypt => Mode::Decrypt,
        };
        let mut crypter = Crypter::new(Self::cipher(key.len())?, mode, key, Some(iv))
            .map_err(|_| CipherError::EngineError)?;
        crypter.pad(true);

        Ok(self.contexts.alloc_handle(OsslContext {
            crypter,
            direction,
            held: 0,
            finalized: false,
        }))
    }

    fn update(
        &self,
        handle: HandleRef,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, CipherError> {
        self.contexts
            .with_entry(handle, |ctx| ctx.update(input, output))
    }

    fn finalize(&self, handle: HandleRef, output: &mut [u8]) -> Result<usize, CipherError> {
        self.contexts.with_entry(handle, |ctx| ctx.finalize(output))
    }

    fn release(&self, handle: CipherHandle) -> Result<(), CipherError> {
        self.contexts.free_handle(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f,
        0x3c,
    ];
    const IV: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ];

    #[test]
    fn test_invalid_key_sizes() {
        let engine = OsslEngine::new();
        for len in [0usize, 8, 15, 17, 20, 31, 33, 64] {
            let key = vec![0u8; len];
            assert_eq!(
                engine
                    .create_context(Direction::Encrypt, &key, &IV)
                    .unwrap_err(),
                CipherError::InvalidKey
            );
        }
        assert_eq!(engine.live_contexts(), 0);
    }

    #[test]
    fn test_encrypt_update_emits_whole_blocks() {
        let engine = OsslEngine::new();
        let handle = engine
            .create_context(Direction::Encrypt, &KEY, &IV)
            .unwrap();
        let mut out = [0u8; 64];

        assert_eq!(engine.update(handle.handle_ref(), &[0u8; 5], &mut out).unwrap(), 0);
        assert_eq!(engine.update(handle.handle_ref(), &[0u8; 11], &mut out).unwrap(), 16);
        assert_eq!(engine.update(handle.handle_ref(), &[0u8; 16], &mut out).unwrap(), 16);
        assert_eq!(engine.finalize(handle.handle_ref(), &mut out).unwrap(), 16);
        engine.release(handle).unwrap();
    }

    #[test]
    fn test_decrypt_update_holds_last_aligned_block() {
        let engine = OsslEngine::new();
        let handle = engine
            .create_context(Direction::Decrypt, &KEY, &IV)
            .unwrap();
        let mut out = [0u8; 64];

        assert_eq!(engine.update(handle.handle_ref(), &[0u8; 16], &mut out).unwrap(), 0);
        assert_eq!(engine.update(handle.handle_ref(), &[0u8; 15], &mut out).unwrap(), 16);
        assert_eq!(engine.update(handle.handle_ref(), &[0u8; 1], &mut out).unwrap(), 0);
        engine.release(handle).unwrap();
    }

    #[test]
    fn test_tight_output_buffer() {
        let engine = OsslEngine::new();
        let handle = engine
            .create_context(Direction::Encrypt, &KEY, &IV)
            .unwrap();

        // Exactly the produced size is enough even though OpenSSL wants more.
        let mut out = [0u8; 16];
        assert_eq!(engine.update(handle.handle_ref(), &[7u8; 20], &mut out).unwrap(), 16);

        // Too small: rejected and nothing consumed.
        let mut small = [0u8; 15];
        assert_eq!(
            engine
                .update(handle.handle_ref(), &[7u8; 12], &mut small)
                .unwrap_err(),
            CipherError::ShortOutputBuffer
        );
        assert_eq!(engine.update(handle.handle_ref(), &[7u8; 12], &mut out).unwrap(), 16);
        engine.release(handle).unwrap();
    }

    #[test]
    fn test_decrypt_finalize_unaligned() {
        let engine = OsslEngine::new();
        let handle = engine
            .create_context(Direction::Decrypt, &KEY, &IV)
            .unwrap();
        let mut out = [0u8; 32];
        engine.update(handle.handle_ref(), &[0u8; 17], &mut out).unwrap();
        assert_eq!(
            engine.finalize(handle.handle_ref(), &mut out).unwrap_err(),
            CipherError::IllegalBlockSize
        );
        engine.release(handle).unwrap();
    }

    #[test]
    fn test_finalized_context_rejects_calls() {
        let engine = OsslEngine::new();
        let handle = engine
            .create_context(Direction::Encrypt, &KEY, &IV)
            .unwrap();
        let mut out = [0u8; 32];
        engine.finalize(handle.handle_ref(), &mut out).unwrap();
        assert_eq!(
            engine.update(handle.handle_ref(), &[1u8], &mut out).unwrap_err(),
            CipherError::InvalidState
        );
        assert_eq!(
            engine.finalize(handle.handle_ref(), &mut out).unwrap_err(),
            CipherError::InvalidState
        );
        engine.release(handle).unwrap();
    }

    #[test]
    fn test_release_invalidates_refs() {
        let engine = OsslEngine::new();
        let handle = engine
            .create_context(Direction::Encrypt, &KEY, &IV)
            .unwrap();
        let stale = handle.handle_ref();
        assert_eq!(engine.live_contexts(), 1);
        engine.release(handle).unwrap();
        assert_eq!(engine.live_contexts(), 0);

        let mut out = [0u8; 32];
        assert_eq!(
            engine.update(stale, &[0u8; 16], &mut out).unwrap_err(),
            CipherError::InvalidHandle
        );
    }
}
