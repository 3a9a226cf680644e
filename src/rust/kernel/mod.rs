// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Kernel invocation: the contract between the scheduler and the operator kernels it runs.

mod builtin;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    event_wait::WaitKind,
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        ModelId,
        StreamId,
    },
};
use ::parking_lot::RwLock;
use ::std::{
    collections::HashMap,
    sync::Arc,
};

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::builtin::names;

//======================================================================================================================
// Structures
//======================================================================================================================

/// What a kernel asks the stream to do next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// Continue with the following task.
    Next,
    /// Continue with the task at this index in the same stream.
    Goto(usize),
    /// Continue on another stream of the same model.
    SwitchStream(StreamId),
    /// Stop the stream until it is recovered.
    Suspend,
    /// Stop the stream until the given wait key of the owning model is notified.
    WaitEvent { kind: WaitKind, aux: u32 },
    /// The stream is done.
    StreamEnd,
    /// The model has completed one iteration of its graph.
    EndGraph,
}

/// Execution context handed to a kernel. Built fresh for every dispatch.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// Owning model, if the kernel runs as part of a model stream.
    pub model_id: Option<ModelId>,
    pub model_ts_id: u32,
    pub stream_id: StreamId,
    /// Index of the running task within its stream.
    pub task_index: usize,
    /// Whether the stream runs on the caller's thread.
    pub execute_inline: bool,
}

/// Kernel request coming from the task scheduler rather than from a model stream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KernelDescriptor {
    pub name: String,
    /// Shared object that provides the kernel.
    pub so_name: String,
    /// Parameter block.
    pub params: Vec<u8>,
}

/// An executable kernel.
pub trait Kernel: Send + Sync {
    fn run(&self, params: &[u8], ctx: &mut RunContext) -> Result<TaskOutcome, Fail>;
}

/// Registry of kernels by name.
pub struct KernelRegistry {
    kernels: RwLock<HashMap<String, Arc<dyn Kernel>>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl RunContext {
    pub fn new(model_id: ModelId, model_ts_id: u32, stream_id: StreamId, execute_inline: bool) -> Self {
        Self {
            model_id: Some(model_id),
            model_ts_id,
            stream_id,
            task_index: 0,
            execute_inline,
        }
    }

    /// Context for a kernel that does not belong to a loaded model.
    pub fn detached(stream_id: StreamId) -> Self {
        Self {
            model_id: None,
            model_ts_id: 0,
            stream_id,
            task_index: 0,
            execute_inline: true,
        }
    }
}

impl KernelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            kernels: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry holding the built-in model operate kernels.
    pub fn with_builtins() -> Self {
        let registry: Self = Self::new();
        builtin::register_all(&registry);
        registry
    }

    /// Registers `kernel` under `name`, replacing any kernel previously registered under that name.
    pub fn register<K: Kernel + 'static>(&self, name: &str, kernel: K) {
        if self
            .kernels
            .write()
            .insert(name.to_string(), Arc::new(kernel))
            .is_some()
        {
            debug!("register(): replaced kernel (name={:?})", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.read().contains_key(name)
    }

    /// Runs the kernel registered under `name`. The registry lock is released before the kernel runs.
    pub fn invoke(&self, name: &str, params: &[u8], ctx: &mut RunContext) -> Result<TaskOutcome, Fail> {
        let kernel: Arc<dyn Kernel> = match self.kernels.read().get(name) {
            Some(kernel) => kernel.clone(),
            None => {
                let cause: String = format!("kernel not registered (name={:?})", name);
                error!("invoke(): {}", cause);
                return Err(Fail::new(ErrorCode::KernelNotFound, &cause));
            },
        };
        kernel.run(params, ctx)
    }

    /// Runs a kernel requested by descriptor.
    pub fn invoke_descriptor(&self, kernel: &KernelDescriptor, ctx: &mut RunContext) -> Result<TaskOutcome, Fail> {
        trace!("invoke_descriptor(): name={:?} so={:?}", kernel.name, kernel.so_name);
        self.invoke(&kernel.name, &kernel.params, ctx)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<F> Kernel for F
where
    F: Fn(&[u8], &mut RunContext) -> Result<TaskOutcome, Fail> + Send + Sync,
{
    fn run(&self, params: &[u8], ctx: &mut RunContext) -> Result<TaskOutcome, Fail> {
        self(params, ctx)
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
