// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod daemon;
pub mod dump;
pub mod event;
pub mod event_wait;
pub mod kernel;
pub mod model;
pub mod runtime;

pub use self::{
    daemon::{
        config::{
            Config,
            SchedulerConfig,
        },
        Daemon,
        SchedulerContext,
    },
    dump::OpDumpTaskManager,
    event::{
        AicpuEventManager,
        AicpuEventProcess,
        Event,
    },
    event_wait::EventWaitManager,
    model::{
        AicpuModel,
        AicpuModelManager,
        AicpuStream,
    },
    runtime::{
        ErrorCode,
        Fail,
        ModelId,
        StreamId,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equivalent or bails out of the enclosing function with an [anyhow::Error].
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        r#"ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`"#,
                        left_val,
                        right_val
                    )
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equivalent or bails out of the enclosing function with an [anyhow::Error].
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(
                        r#"ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`"#,
                        left_val,
                        right_val
                    )
                }
            },
        }
    }};
}
