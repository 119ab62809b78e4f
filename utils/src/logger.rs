// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup shared by the CLI tool and any embedder of `smack-api`.

use std::io;
use std::path::Path;

use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming, WriteMode};
use log::LevelFilter;

/// Initialize the global logger.
///
/// When `log_file` is `None`, log records are only duplicated to stderr at
/// `level` and above. When set, records go to a rotating file under the
/// given path and stderr carries a duplicate at `level`.
pub fn setup_logging(log_file: Option<&Path>, level: LevelFilter) -> io::Result<()> {
    let mut logger = Logger::try_with_env_or_str(level.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        .duplicate_to_stderr(Duplicate::from(level))
        .write_mode(WriteMode::BufferAndFlush);

    if let Some(path) = log_file {
        let spec = FileSpec::try_from(path).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        logger = logger
            .log_to_file(spec)
            .rotate(
                Criterion::Size(16 * 1024 * 1024),
                Naming::Numbers,
                Cleanup::KeepLogFiles(8),
            )
            .append();
    }

    logger
        .start()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(())
}
