// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Misc runtime helpers: panic backtraces and hex formatting for keys.

use std::panic;

/// Install a panic hook that logs a backtrace before unwinding. Mirrors the
/// behavior production daemons want: a crash should leave a trail in the log
/// file, not just on stderr.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let bt = backtrace::Backtrace::new();
        error!("panic: {}\n{:?}", info, bt);
    }));
}

/// Render a byte slice as a lowercase hex string, truncated to `max` bytes
/// with a trailing ellipsis marker. Used to keep 64-byte keys readable in
/// log lines without blowing up line length.
pub fn hex_prefix(data: &[u8], max: usize) -> String {
    let n = data.len().min(max);
    let mut s = String::with_capacity(n * 2 + 3);
    for b in &data[..n] {
        s.push_str(&format!("{:02x}", b));
    }
    if data.len() > n {
        s.push_str("..");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_prefix_truncates() {
        let data = [0u8; 64];
        let s = hex_prefix(&data, 8);
        assert_eq!(s, format!("{}..", "00".repeat(8)));
    }

    #[test]
    fn test_hex_prefix_short() {
        let data = [0xabu8, 0xcd];
        assert_eq!(hex_prefix(&data, 8), "abcd");
    }
}
