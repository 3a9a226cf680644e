// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Model and stream execution engine.

pub mod descriptor;
mod manager;
#[allow(clippy::module_inception)]
mod model;
pub mod status;
pub mod stream;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    manager::AicpuModelManager,
    model::{
        AicpuModel,
        ModelReport,
        ModelServices,
        StreamActivation,
    },
    status::{
        ModelOperation,
        ModelStatus,
    },
    stream::{
        AicpuStream,
        StepResult,
        StreamState,
    },
};
