// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cryptographically secure random bytes from OpenSSL's `RAND_bytes`.

use super::*;

/// OpenSSL-backed random number generator.
#[derive(Debug, Clone)]
pub struct Rng;

impl Rng {
    /// Fills `buf` with random bytes.
    ///
    /// # Errors
    ///
    /// [`CipherError::RngError`] if OpenSSL's generator is not seeded or fails.
    pub fn rand_bytes(buf: &mut [u8]) -> Result<(), CipherError> {
        openssl::rand::rand_bytes(buf).map_err(|_| CipherError::RngError)
    }

    /// Returns a freshly generated IV.
    pub fn rand_iv() -> Result<[u8; BLOCK_SIZE], CipherError> {
        let mut iv = [0u8; BLOCK_SIZE];
        Self::rand_bytes(&mut iv)?;
        Ok(iv)
    }
}
