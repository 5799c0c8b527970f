//! Batch merkle-root verification through the native `merkle_tree` library.
//!
//! The library is trusted and side-effect free. This crate only guards the
//! boundary: it rejects inputs the native side cannot take and keeps the
//! `unsafe` call in one place.

use thiserror::Error;

/// Largest batch, in bytes, the native verifier accepts.
pub const MAX_BATCH_SIZE: usize = 8_301_147;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("batch is {len} bytes, above the {max} byte limit")]
    BatchTooLarge { len: usize, max: usize },
    #[error("built without the `native` feature; no merkle verifier is linked")]
    NativeUnavailable,
}

#[cfg(feature = "native")]
mod ffi {
    extern "C" {
        pub fn verify_batch_merkle_root_ffi(
            batch_bytes: *const u8,
            batch_len: u32,
            merkle_root: *const u8,
        ) -> bool;
    }
}

/// Check that `merkle_root` is the root of the merkle tree built over `batch`.
pub fn verify_batch_merkle_root(batch: &[u8], merkle_root: &[u8; 32]) -> Result<bool, VerifyError> {
    check_batch_len(batch.len())?;
    call_native(batch, merkle_root)
}

fn check_batch_len(len: usize) -> Result<(), VerifyError> {
    if len > MAX_BATCH_SIZE {
        return Err(VerifyError::BatchTooLarge {
            len,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

#[cfg(feature = "native")]
fn call_native(batch: &[u8], merkle_root: &[u8; 32]) -> Result<bool, VerifyError> {
    // SAFETY: both pointers are valid for the lengths passed; the library only
    // reads them for the duration of the call. `len` fits in u32 because it is
    // bounded by MAX_BATCH_SIZE.
    let ok = unsafe {
        ffi::verify_batch_merkle_root_ffi(batch.as_ptr(), batch.len() as u32, merkle_root.as_ptr())
    };
    Ok(ok)
}

#[cfg(not(feature = "native"))]
fn call_native(_batch: &[u8], _merkle_root: &[u8; 32]) -> Result<bool, VerifyError> {
    Err(VerifyError::NativeUnavailable)
}
