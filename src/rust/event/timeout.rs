// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::{
    ErrorCode,
    Fail,
};
use ::std::{
    str::FromStr,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// What happens to a model whose streams stop making progress.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutPolicy {
    /// Log the stalled streams.
    Advisory,
    /// Log the stalled streams and abort their models.
    Abort,
}

/// Timeouts applied by the dispatch loop. A zero duration or poll count disables the check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeoutSettings {
    /// How long a stream may stay suspended.
    pub op_wait_timeout: Duration,
    /// How long a single kernel may run before it is reported.
    pub op_execute_timeout: Duration,
    /// Consecutive empty polls after which the loop looks for stalled streams.
    pub loop_timeout_polls: u64,
    pub policy: TimeoutPolicy,
}

/// Timeouts pushed by the task scheduler at run time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TimeoutConfig {
    pub op_wait_timeout_secs: u32,
    pub op_execute_timeout_secs: u32,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TimeoutSettings {
    pub fn apply(&mut self, config: TimeoutConfig) {
        self.op_wait_timeout = Duration::from_secs(config.op_wait_timeout_secs as u64);
        self.op_execute_timeout = Duration::from_secs(config.op_execute_timeout_secs as u64);
    }

    pub fn op_execute_timed_out(&self, elapsed: Duration) -> bool {
        !self.op_execute_timeout.is_zero() && elapsed > self.op_execute_timeout
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            op_wait_timeout: Duration::ZERO,
            op_execute_timeout: Duration::ZERO,
            loop_timeout_polls: 0,
            policy: TimeoutPolicy::Advisory,
        }
    }
}

impl FromStr for TimeoutPolicy {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(TimeoutPolicy::Advisory),
            "abort" => Ok(TimeoutPolicy::Abort),
            other => {
                let cause: String = format!("unknown timeout policy {:?}", other);
                error!("from_str(): {}", cause);
                Err(Fail::new(ErrorCode::ParameterInvalid, &cause))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
