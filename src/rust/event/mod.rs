// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Event dispatch: decoded driver events and the loop that serves them.

pub mod driver;
mod manager;
mod process;
pub mod timeout;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    kernel::KernelDescriptor,
    runtime::{
        ModelId,
        StreamId,
    },
};

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    driver::{
        ChannelDriver,
        ChannelDriverHost,
        DriverReply,
        DriverStatus,
        EventAck,
        EventDriver,
        EventSummary,
    },
    manager::AicpuEventManager,
    process::AicpuEventProcess,
    timeout::{
        TimeoutConfig,
        TimeoutPolicy,
        TimeoutSettings,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Event delivered by the driver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// Kernel execution request from the hardware task scheduler. Acknowledged with [EventAck].
    HwtsKernel(KernelRequest),
    /// Kernel execution request in message queue mode. Answered with [EventSummary::KernelResponse].
    MsgQueueKernel(KernelRequest),
    Control(ControlMessage),
    QueueNotEmpty { queue_id: u32 },
    QueueNotFull { queue_id: u32 },
    Cdq { queue_id: u32 },
    Timer { timer_id: u32 },
    Unknown { event_id: u32 },
}

/// Kernel execution request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KernelRequest {
    /// Identifier echoed back in the acknowledgement.
    pub event_id: u64,
    pub kernel: KernelDescriptor,
    pub stream_id: u32,
    pub task_id: u32,
    /// Capture the task's tensors after a successful run.
    pub dump_enabled: bool,
}

/// Control message from the task scheduler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlMessage {
    TaskReport { model_id: ModelId },
    ModelOperate { model_id: ModelId, cmd: ModelCmd },
    TimeoutConfig(TimeoutConfig),
    /// Serialized op mapping message.
    DumpLoad(Vec<u8>),
    DumpData { stream_id: u32, task_id: u32 },
    FftsPlusDump { stream_id: u32, task_id: u32, context_id: u32, thread_id: u32 },
}

/// Model operation carried by [ControlMessage::ModelOperate].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModelCmd {
    /// Serialized model descriptor.
    Load(Vec<u8>),
    Destroy,
    Abort,
    ActiveStream(StreamId),
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ControlMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::TaskReport { .. } => "TaskReport",
            ControlMessage::ModelOperate { cmd, .. } => match cmd {
                ModelCmd::Load(_) => "ModelLoad",
                ModelCmd::Destroy => "ModelDestroy",
                ModelCmd::Abort => "ModelAbort",
                ModelCmd::ActiveStream(_) => "ActiveStream",
            },
            ControlMessage::TimeoutConfig(_) => "TimeoutConfig",
            ControlMessage::DumpLoad(_) => "DumpLoad",
            ControlMessage::DumpData { .. } => "DumpData",
            ControlMessage::FftsPlusDump { .. } => "FftsPlusDump",
        }
    }
}
