// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.


use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use super::*;

/// NIST SP 800-38A F.2.1 key.
pub(crate) const NIST_KEY: [u8; 16] = [
    0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
];

/// NIST SP 800-38A F.2.1 IV.
pub(crate) const NIST_IV: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];

/// OpenSSL engine that counts context creations and releases.
#[derive(Default)]
pub(crate) struct CountingEngine {
    inner: OsslEngine,
    created: AtomicUsize,
    released: AtomicUsize,
}

impl CountingEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: OsslEngine::new(),
            ..Default::default()
        })
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl NativeCryptoEngine for CountingEngine {
    fn create_context(
        &self,
        direction: Direction,
        key: &[u8],
        iv: &[u8; BLOCK_SIZE],
    ) -> Result<CipherHandle, CipherError> {
        let handle = self.inner.create_context(direction, key, iv)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn update(
        &self,
        handle: HandleRef,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, CipherError> {
        self.inner.update(handle, input, output)
    }

    fn finalize(&self, handle: HandleRef, output: &mut [u8]) -> Result<usize, CipherError> {
        self.inner.finalize(handle, output)
    }

    fn release(&self, handle: CipherHandle) -> Result<(), CipherError> {
        self.inner.release(handle)?;
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Polls `cond` until it holds or a generous deadline passes.
pub(crate) fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Encrypts `plaintext` in `chunk`-sized updates followed by an empty
/// finalize.
pub(crate) fn encrypt_chunked(key: &[u8], iv: &[u8], plaintext: &[u8], chunk: usize) -> Vec<u8> {
    run_chunked(Direction::Encrypt, key, iv, plaintext, chunk).unwrap()
}

pub(crate) fn run_chunked(
    direction: Direction,
    key: &[u8],
    iv: &[u8],
    input: &[u8],
    chunk: usize,
) -> Result<Vec<u8>, CipherError> {
    let mut cipher = StreamingCipherAdapter::new();
    cipher.init(direction, key, CipherParams::Iv(iv))?;
    let mut output = Vec::new();
    for piece in input.chunks(chunk.max(1)) {
        output.extend(cipher.update_vec(piece)?);
    }
    output.extend(cipher.finalize_vec(&[])?);
    Ok(output)
}
