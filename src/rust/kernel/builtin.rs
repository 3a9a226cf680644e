// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Model operate kernels that every registry starts with.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    event_wait::WaitKind,
    kernel::{
        Kernel,
        KernelRegistry,
        RunContext,
        TaskOutcome,
    },
    runtime::{
        fail::Fail,
        wire::WireReader,
        StreamId,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub mod names {
    pub const END_GRAPH: &str = "endGraph";
    pub const STREAM_END: &str = "streamEnd";
    pub const NOP: &str = "nop";
    pub const GOTO_TASK: &str = "gotoTask";
    pub const ACTIVE_STREAM: &str = "activeStream";
    pub const WAIT_QUEUE_NOT_EMPTY: &str = "waitQueueNotEmpty";
    pub const WAIT_QUEUE_NOT_FULL: &str = "waitQueueNotFull";
}

//======================================================================================================================
// Structures
//======================================================================================================================

struct EndGraph;

struct StreamEnd;

struct Nop;

/// Parameter block: target task index (`u32`).
struct GotoTask;

/// Parameter block: target stream id (`u32`).
struct ActiveStream;

/// Parameter block: queue id (`u32`).
struct WaitQueue(WaitKind);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

pub fn register_all(registry: &KernelRegistry) {
    registry.register(names::END_GRAPH, EndGraph);
    registry.register(names::STREAM_END, StreamEnd);
    registry.register(names::NOP, Nop);
    registry.register(names::GOTO_TASK, GotoTask);
    registry.register(names::ACTIVE_STREAM, ActiveStream);
    registry.register(names::WAIT_QUEUE_NOT_EMPTY, WaitQueue(WaitKind::QueueNotEmpty));
    registry.register(names::WAIT_QUEUE_NOT_FULL, WaitQueue(WaitKind::QueueNotFull));
}

fn first_u32(params: &[u8]) -> Result<u32, Fail> {
    WireReader::new(params).read_u32()
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Kernel for EndGraph {
    fn run(&self, _: &[u8], ctx: &mut RunContext) -> Result<TaskOutcome, Fail> {
        debug!("endGraph: model={:?} stream={}", ctx.model_id, ctx.stream_id);
        Ok(TaskOutcome::EndGraph)
    }
}

impl Kernel for StreamEnd {
    fn run(&self, _: &[u8], _: &mut RunContext) -> Result<TaskOutcome, Fail> {
        Ok(TaskOutcome::StreamEnd)
    }
}

impl Kernel for Nop {
    fn run(&self, _: &[u8], _: &mut RunContext) -> Result<TaskOutcome, Fail> {
        Ok(TaskOutcome::Next)
    }
}

impl Kernel for GotoTask {
    fn run(&self, params: &[u8], _: &mut RunContext) -> Result<TaskOutcome, Fail> {
        Ok(TaskOutcome::Goto(first_u32(params)? as usize))
    }
}

impl Kernel for ActiveStream {
    fn run(&self, params: &[u8], _: &mut RunContext) -> Result<TaskOutcome, Fail> {
        Ok(TaskOutcome::SwitchStream(StreamId::from(first_u32(params)?)))
    }
}

impl Kernel for WaitQueue {
    fn run(&self, params: &[u8], _: &mut RunContext) -> Result<TaskOutcome, Fail> {
        Ok(TaskOutcome::WaitEvent {
            kind: self.0,
            aux: first_u32(params)?,
        })
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
