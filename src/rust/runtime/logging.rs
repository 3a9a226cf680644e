// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::sync::{
    Mutex,
    Once,
};

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Keeps the logger alive for the whole process.
static LOGGER: Mutex<Option<LoggerHandle>> = Mutex::new(None);

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The `RUST_LOG` environment variable takes precedence over `default_spec`.
pub fn initialize(default_spec: &str) {
    INIT_LOG.call_once(|| match Logger::try_with_env_or_str(default_spec) {
        Ok(logger) => match logger.start() {
            Ok(handle) => {
                if let Ok(mut slot) = LOGGER.lock() {
                    *slot = Some(handle);
                }
            },
            Err(e) => eprintln!("initialize(): failed to start logger ({:?})", e),
        },
        Err(e) => eprintln!("initialize(): invalid log specification {:?} ({:?})", default_spec, e),
    });
}
