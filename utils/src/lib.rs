// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Small helpers shared by the smack crates: errno-flavoured `io::Error`
//! constructors and a `flexi_logger` based logging setup.

#[macro_use]
extern crate log;

use std::io::Error;

pub mod exec;
pub mod logger;

pub use logger::setup_logging;

/// Build an `io::Error` from the last OS error, optionally annotated with
/// a human readable context string.
#[macro_export]
macro_rules! last_error {
    () => {
        $crate::__last_error(None)
    };
    ($msg:expr) => {
        $crate::__last_error(Some(format!("{}", $msg)))
    };
}

/// `EINVAL`
#[macro_export]
macro_rules! einval {
    () => {
        std::io::Error::from_raw_os_error(libc::EINVAL)
    };
    ($msg:expr) => {{
        error!("einval: {}", $msg);
        std::io::Error::from_raw_os_error(libc::EINVAL)
    }};
}

/// `ENOENT`
#[macro_export]
macro_rules! enoent {
    () => {
        std::io::Error::from_raw_os_error(libc::ENOENT)
    };
    ($msg:expr) => {{
        warn!("enoent: {}", $msg);
        std::io::Error::from_raw_os_error(libc::ENOENT)
    }};
}

/// `ENOSYS`, used for interface methods that are intentionally unimplemented.
#[macro_export]
macro_rules! enosys {
    () => {
        std::io::Error::from_raw_os_error(libc::ENOSYS)
    };
    ($msg:expr) => {{
        error!("enosys: {}", $msg);
        std::io::Error::from_raw_os_error(libc::ENOSYS)
    }};
}

/// `EIO`, used to surface corrupt on-disk state.
#[macro_export]
macro_rules! eio {
    () => {
        std::io::Error::from_raw_os_error(libc::EIO)
    };
    ($msg:expr) => {{
        error!("eio: {}", $msg);
        std::io::Error::from_raw_os_error(libc::EIO)
    }};
}

#[doc(hidden)]
pub fn __last_error(msg: Option<String>) -> Error {
    let err = Error::last_os_error();
    if let Some(msg) = msg {
        error!("last_error: {}, context: {}", err, msg);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_einval_carries_errno() {
        let e: Error = einval!("bad argument");
        assert_eq!(e.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn test_enoent_carries_errno() {
        let e: Error = enoent!();
        assert_eq!(e.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_eio_carries_errno() {
        let e: Error = eio!("corrupt chunk header");
        assert_eq!(e.raw_os_error(), Some(libc::EIO));
    }
}
