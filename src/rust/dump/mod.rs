// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Op data dump: descriptors of the tensors each task touches, and their capture on request.
//!
//! Descriptors are installed from op mapping messages and looked up by stream and task id. Capture copies live memory
//! through a bounded staging buffer into a [sink::DumpSink] without pausing the kernel that owns the memory.

pub mod memory;
pub mod op_mapping;
pub mod sink;
pub mod step;

mod manager;
mod task;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    manager::OpDumpTaskManager,
    memory::{
        DeviceMemory,
        HostMemory,
    },
    op_mapping::{
        OpMappingInfo,
        OpMappingInfoBuilder,
        OpMappingTask,
        TensorDesc,
    },
    sink::{
        DumpSink,
        FileDumpSink,
        MemoryDumpSink,
    },
    task::{
        OpDumpTask,
        StepAddrs,
    },
};
