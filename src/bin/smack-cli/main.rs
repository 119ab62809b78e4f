// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Minimal example tool wrapping `smack-api`: `put`/`get`/`rm`/`sync`
//! against an engine rooted at a given path. Ambient tooling, not a
//! tested surface — its feature set is intentionally thin.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::{App, Arg, SubCommand};
use log::LevelFilter;

use smack_api::{Engine, EngineConfig};

fn main() -> Result<()> {
    let cmd = App::new("smack-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("put/get/rm/sync against a smack storage engine")
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .takes_value(true)
                .default_value("info")
                .possible_values(&["trace", "debug", "info", "warn", "error"])
                .help("global log verbosity"),
        )
        .arg(
            Arg::with_name("path")
                .long("path")
                .short("p")
                .takes_value(true)
                .required(true)
                .help("directory the engine is (or will be) rooted at"),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .takes_value(true)
                .help("JSON engine config overrides, e.g. '{\"codec\":\"lz4_fast\"}'"),
        )
        .subcommand(
            SubCommand::with_name("put")
                .about("write a key/value pair")
                .arg(Arg::with_name("KEY").required(true).help("128 hex chars (64 bytes)"))
                .arg(Arg::with_name("VALUE").required(true).help("value to store")),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("read a value by key")
                .arg(Arg::with_name("KEY").required(true)),
        )
        .subcommand(
            SubCommand::with_name("rm")
                .about("remove a key")
                .arg(Arg::with_name("KEY").required(true)),
        )
        .subcommand(SubCommand::with_name("sync").about("flush every blob and wait for drainage"))
        .get_matches();

    let level = LevelFilter::from_str(cmd.value_of("log-level").unwrap())
        .map_err(|e| anyhow!("invalid log level: {}", e))?;
    smack_utils::setup_logging(None, level).context("failed to initialize logging")?;
    smack_utils::exec::install_panic_hook();

    let path = cmd.value_of("path").unwrap();
    let config = match cmd.value_of("config") {
        Some(json) => EngineConfig::from_str(json).map_err(|e| anyhow!("{}", e))?,
        None => EngineConfig::default(),
    };
    let engine = Engine::open(path, config).map_err(|e| anyhow!("{}", e))?;

    match cmd.subcommand() {
        ("put", Some(sub)) => {
            let key = parse_key(sub.value_of("KEY").unwrap())?;
            let value = sub.value_of("VALUE").unwrap().as_bytes().to_vec();
            engine.write(&key, value).map_err(|e| anyhow!("{}", e))?;
        }
        ("get", Some(sub)) => {
            let key = parse_key(sub.value_of("KEY").unwrap())?;
            let value = engine.read(&key).map_err(|e| anyhow!("{}", e))?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        ("rm", Some(sub)) => {
            let key = parse_key(sub.value_of("KEY").unwrap())?;
            engine.remove(&key).map_err(|e| anyhow!("{}", e))?;
        }
        ("sync", Some(_)) => {
            engine.sync().map_err(|e| anyhow!("{}", e))?;
        }
        _ => bail!("no subcommand given; run with --help"),
    }

    Ok(())
}

/// Parse a 128-character hex string into a 64-byte key.
fn parse_key(hex: &str) -> Result<[u8; 64]> {
    if hex.len() != 128 {
        bail!("key must be 128 hex characters (64 bytes), got {}", hex.len());
    }
    let mut key = [0u8; 64];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("invalid hex digit at byte {}", i))?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_roundtrip() {
        let hex = "ab".repeat(64);
        let key = parse_key(&hex).unwrap();
        assert_eq!(key, [0xab; 64]);
    }

    #[test]
    fn test_parse_key_rejects_wrong_length() {
        assert!(parse_key("abcd").is_err());
    }
}
