// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Error surface exposed to embedders of `smack-api`, and the mapping
//! down to the small set of negative errno-style exit codes a C-style
//! caller expects: `-ENOMEM`, `-ENOTSUP`, `-EINVAL`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("storage error: {0}")]
    Storage(#[from] smack_storage::Error),

    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("unknown compression codec: {0}")]
    UnknownCodec(String),

    #[error("key must be exactly {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Collapse an `ApiError` into the small negative-integer exit code
/// surface the public API promises. `NotFound`/`OutOfRange` have no
/// dedicated code; callers are expected to distinguish "no value" from a
/// hard failure via the `Result` itself, so those map to `-EINVAL` only
/// when flattened through this function.
pub fn to_errno(err: &ApiError) -> i32 {
    match err {
        ApiError::Storage(smack_storage::Error::IoError(e))
            if e.raw_os_error() == Some(libc::ENOMEM) =>
        {
            -libc::ENOMEM
        }
        ApiError::UnknownCodec(_) => -libc::ENOTSUP,
        _ => -libc::EINVAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_codec_maps_to_enotsup() {
        let err = ApiError::UnknownCodec("rot13".into());
        assert_eq!(to_errno(&err), -libc::ENOTSUP);
    }

    #[test]
    fn test_storage_not_found_maps_to_einval() {
        let err = ApiError::Storage(smack_storage::Error::NotFound);
        assert_eq!(to_errno(&err), -libc::EINVAL);
    }
}
