// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::sync::OnceLock;

//==============================================================================
// Constants
//==============================================================================

/// Log filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_SPEC: &str = "warn";

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function. Holds the logger handle for the lifetime of the process.
static INIT_LOG: OnceLock<Option<LoggerHandle>> = OnceLock::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The log filter is read from the `RUST_LOG` environment variable.
pub fn initialize() {
    INIT_LOG.get_or_init(|| {
        let logger: Logger = match Logger::try_with_env_or_str(DEFAULT_LOG_SPEC) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("initialize(): invalid log filter ({:?})", e);
                return None;
            },
        };
        match logger.start() {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("initialize(): failed to start logger ({:?})", e);
                None
            },
        }
    });
}
