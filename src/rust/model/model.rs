// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    event_wait::{
        EventWaitManager,
        WaitKey,
        WaitKind,
        WaitStatus,
    },
    kernel::{
        KernelRegistry,
        RunContext,
        TaskOutcome,
    },
    model::{
        descriptor::{
            ModelInfo,
            QueueBinding,
        },
        status::{
            ModelOperation,
            ModelStatus,
        },
        stream::{
            AicpuStream,
            ClaimedTask,
            NextTask,
            StepResult,
            StreamState,
        },
    },
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        limits::MAX_INLINE_TASK_STEPS,
        ModelId,
        StreamId,
    },
};
use ::crossbeam_channel::Sender;
use ::parking_lot::{
    Mutex,
    MutexGuard,
};
use ::std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Request to run a stream on whichever worker thread picks it up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamActivation {
    pub model_id: ModelId,
    pub stream_id: StreamId,
}

/// Shared services a model needs while its streams run.
#[derive(Clone)]
pub struct ModelServices {
    pub kernels: Arc<KernelRegistry>,
    pub waits: Arc<EventWaitManager>,
    pub activations: Sender<StreamActivation>,
}

/// Summary returned by [AicpuModel::task_report].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ModelReport {
    pub model_id: ModelId,
    pub ts_id: u32,
    /// Number of completed graph iterations since load.
    pub iterations: u64,
    /// Whether an iteration completed since the previous report.
    pub end_of_graph: bool,
}

/// A loaded model: its streams, the queues bound to it and its status.
pub struct AicpuModel {
    model_id: ModelId,
    ts_id: u32,
    abnormal_handling: bool,
    status: Mutex<ModelStatus>,
    streams: BTreeMap<StreamId, Arc<Mutex<AicpuStream>>>,
    queues: Mutex<Vec<QueueBinding>>,
    iterations: AtomicU64,
    services: ModelServices,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AicpuModel {
    /// Builds a model from a decoded descriptor. On failure everything built so far is torn down and the original
    /// error is returned.
    pub fn load(info: ModelInfo, services: ModelServices) -> Result<Self, Fail> {
        let mut model: Self = Self {
            model_id: info.model_id,
            ts_id: info.ts_id,
            abnormal_handling: info.abnormal_handling,
            status: Mutex::new(ModelStatus::Uninit),
            streams: BTreeMap::new(),
            queues: Mutex::new(Vec::new()),
            iterations: AtomicU64::new(0),
            services,
        };
        model.check_operate_and_update_status(ModelOperation::Load)?;

        if let Err(e) = model.build(info) {
            error!("load(): failed to build model (model_id={}, error={:?})", model.model_id, e);
            model.teardown();
            return Err(e);
        }

        model.check_operate_and_update_status(ModelOperation::LoadDone)?;
        info!(
            "load(): model loaded (model_id={}, ts_id={}, streams={}, queues={})",
            model.model_id,
            model.ts_id,
            model.streams.len(),
            model.queues.lock().len()
        );
        Ok(model)
    }

    fn build(&mut self, info: ModelInfo) -> Result<(), Fail> {
        for stream in info.streams {
            for task in &stream.tasks {
                if !self.services.kernels.contains(&task.kernel_name) {
                    let cause: String = format!(
                        "kernel not registered (model_id={}, stream={}, task_id={}, kernel={:?})",
                        self.model_id, stream.stream_id, task.task_id, task.kernel_name
                    );
                    error!("build(): {}", cause);
                    return Err(Fail::new(ErrorCode::KernelNotFound, &cause));
                }
            }
            let stream_id: StreamId = stream.stream_id;
            self.streams
                .insert(stream_id, Arc::new(Mutex::new(AicpuStream::new(stream))));
        }
        self.queues.lock().extend(info.queues);
        Ok(())
    }

    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn ts_id(&self) -> u32 {
        self.ts_id
    }

    pub fn abnormal_handling(&self) -> bool {
        self.abnormal_handling
    }

    pub fn status(&self) -> ModelStatus {
        *self.status.lock()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Acquire)
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    pub fn queues(&self) -> Vec<QueueBinding> {
        self.queues.lock().clone()
    }

    pub fn is_bound_to_queue(&self, queue_id: u32) -> bool {
        self.queues.lock().iter().any(|q| q.queue_id == queue_id)
    }

    /// Current state of a stream.
    pub fn stream_state(&self, stream_id: StreamId) -> Result<StreamState, Fail> {
        Ok(self.stream(stream_id)?.lock().state())
    }

    /// Checks that `op` is allowed in the current status and applies the resulting transition.
    pub fn check_operate_and_update_status(&self, op: ModelOperation) -> Result<ModelStatus, Fail> {
        let mut status: MutexGuard<ModelStatus> = self.status.lock();
        match status.transition(op) {
            Some(next) => {
                if next != *status {
                    debug!(
                        "check_operate_and_update_status(): model_id={} {:?} -> {:?} ({:?})",
                        self.model_id, *status, next, op
                    );
                }
                *status = next;
                Ok(next)
            },
            None => {
                let cause: String = format!(
                    "operation not allowed (model_id={}, status={:?}, op={:?})",
                    self.model_id, *status, op
                );
                warn!("check_operate_and_update_status(): {}", cause);
                Err(Fail::new(ErrorCode::ModelStatusNotAllowOperate, &cause))
            },
        }
    }

    /// Runs `stream_id`. A stream that has finished starts a new pass. Inline execution happens on the calling
    /// thread; otherwise an activation is queued for the worker threads.
    pub fn execute_stream(&self, stream_id: StreamId, execute_inline: bool) -> Result<(), Fail> {
        let stream: Arc<Mutex<AicpuStream>> = self.stream(stream_id)?;
        self.check_operate_and_update_status(ModelOperation::Execute)?;
        if !execute_inline {
            return self.enqueue(stream_id);
        }
        let activated: bool = stream.lock().activate();
        if !activated {
            debug!(
                "execute_stream(): stream is suspended (model_id={}, stream={})",
                self.model_id, stream_id
            );
            return Ok(());
        }
        self.run_inline(stream_id)
    }

    /// Entry point of the `activeStream` control path. Behaves as [AicpuModel::execute_stream].
    pub fn active_stream(&self, stream_id: StreamId, execute_inline: bool) -> Result<(), Fail> {
        self.execute_stream(stream_id, execute_inline)
    }

    /// Resumes a suspended stream after the task that suspended it. A stream that is not suspended is left alone.
    pub fn recover_stream(&self, stream_id: StreamId, execute_inline: bool) -> Result<(), Fail> {
        if !self.stream(stream_id)?.lock().resume() {
            debug!(
                "recover_stream(): stream is not suspended (model_id={}, stream={})",
                self.model_id, stream_id
            );
            return Ok(());
        }
        self.execute_stream(stream_id, execute_inline)
    }

    /// Records the completion of one graph iteration.
    pub fn end_graph(&self) -> Result<(), Fail> {
        self.check_operate_and_update_status(ModelOperation::EndGraph)?;
        let iterations: u64 = self.iterations.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("end_graph(): model_id={} iterations={}", self.model_id, iterations);
        Ok(())
    }

    /// Reports the model status to the task scheduler and clears the end-of-graph mark.
    pub fn task_report(&self) -> Result<ModelReport, Fail> {
        let end_of_graph: bool = self.status() == ModelStatus::EndGraphPending;
        self.check_operate_and_update_status(ModelOperation::TaskReport)?;
        Ok(ModelReport {
            model_id: self.model_id,
            ts_id: self.ts_id,
            iterations: self.iterations(),
            end_of_graph,
        })
    }

    /// Stops the model and releases its resources.
    pub fn abort(&self) -> Result<(), Fail> {
        self.check_operate_and_update_status(ModelOperation::Abort)?;
        info!("abort(): aborting model (model_id={})", self.model_id);
        self.teardown();
        Ok(())
    }

    /// Releases the model's resources ahead of its removal.
    pub fn destroy(&self) -> Result<(), Fail> {
        self.check_operate_and_update_status(ModelOperation::Destroy)?;
        info!("destroy(): destroying model (model_id={})", self.model_id);
        self.teardown();
        Ok(())
    }

    /// Suspended streams that have been waiting for at least `limit`.
    pub fn suspended_streams_over(&self, limit: Duration, now: Instant) -> Vec<StreamId> {
        self.streams
            .iter()
            .filter(|(_, stream)| match stream.lock().suspended_for(now) {
                Some(waited) => waited >= limit,
                None => false,
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Wait keys of the queues bound to this model.
    pub fn queue_wait_keys(&self) -> Vec<WaitKey> {
        self.queues
            .lock()
            .iter()
            .flat_map(|q| {
                [
                    WaitKey::new(self.model_id, WaitKind::QueueNotEmpty, q.queue_id),
                    WaitKey::new(self.model_id, WaitKind::QueueNotFull, q.queue_id),
                ]
            })
            .collect()
    }

    /// Task loop of inline execution. Kernels run without any stream lock held.
    fn run_inline(&self, stream_id: StreamId) -> Result<(), Fail> {
        let mut ctx: RunContext = RunContext::new(self.model_id, self.ts_id, stream_id, true);
        for _ in 0..MAX_INLINE_TASK_STEPS {
            if !self.status().is_active() {
                let cause: String = format!(
                    "model left running state (model_id={}, status={:?})",
                    self.model_id,
                    self.status()
                );
                warn!("run_inline(): {}", cause);
                return Err(Fail::new(ErrorCode::Canceled, &cause));
            }

            // Resolve on every step: tasks may move execution to another stream.
            let current: StreamId = ctx.stream_id;
            let stream: Arc<Mutex<AicpuStream>> = self.stream(current)?;
            let next: NextTask = stream.lock().take_next_task();
            let claimed: ClaimedTask = match next {
                NextTask::Run(claimed) => claimed,
                NextTask::Busy => {
                    debug!(
                        "run_inline(): stream already running (model_id={}, stream={})",
                        self.model_id, current
                    );
                    return Ok(());
                },
                NextTask::Idle(step) => {
                    trace!("run_inline(): stream={} {:?}", current, step);
                    return Ok(());
                },
            };

            ctx.task_index = claimed.index;
            trace!(
                "run_inline(): stream={} index={} task_id={} kernel={:?}",
                current,
                claimed.index,
                claimed.task.task_id,
                claimed.task.kernel_name
            );
            let result: Result<TaskOutcome, Fail> =
                self.services.kernels.invoke(&claimed.task.kernel_name, &claimed.task.params, &mut ctx);

            // Held across wait registration: a notifier must not resume the stream before it is suspended.
            let mut guard: MutexGuard<AicpuStream> = stream.lock();
            match guard.finish_task(&claimed, result)? {
                StepResult::Continue => (),
                StepResult::EndGraph => {
                    drop(guard);
                    self.end_graph()?;
                },
                StepResult::Suspended | StepResult::StreamEnd => return Ok(()),
                StepResult::Wait { kind, aux } => {
                    self.check_wait_key(kind, aux)?;
                    let key: WaitKey = WaitKey::new(self.model_id, kind, aux);
                    match self.services.waits.wait_event(key, current) {
                        WaitStatus::Ready => (),
                        WaitStatus::Registered => {
                            guard.suspend();
                            debug!(
                                "run_inline(): stream suspended (model_id={}, stream={}, key={:?})",
                                self.model_id, current, key
                            );
                            return Ok(());
                        },
                    }
                },
                StepResult::Switch(target) => {
                    drop(guard);
                    let next: Arc<Mutex<AicpuStream>> = self.stream(target)?;
                    let activated: bool = next.lock().activate();
                    if !activated {
                        warn!(
                            "run_inline(): target stream is suspended (model_id={}, stream={})",
                            self.model_id, target
                        );
                        return Ok(());
                    }
                    trace!("run_inline(): switch stream {} -> {}", current, target);
                    ctx.stream_id = target;
                },
            }
        }

        warn!(
            "run_inline(): step limit reached, yielding (model_id={}, stream={})",
            self.model_id, ctx.stream_id
        );
        self.enqueue(ctx.stream_id)
    }

    fn stream(&self, stream_id: StreamId) -> Result<Arc<Mutex<AicpuStream>>, Fail> {
        match self.streams.get(&stream_id) {
            Some(stream) => Ok(stream.clone()),
            None => {
                let cause: String = format!("stream not found (model_id={}, stream={})", self.model_id, stream_id);
                error!("stream(): {}", cause);
                Err(Fail::new(ErrorCode::StreamNotFound, &cause))
            },
        }
    }

    fn check_wait_key(&self, kind: WaitKind, aux: u32) -> Result<(), Fail> {
        match kind {
            WaitKind::QueueNotEmpty | WaitKind::QueueNotFull if !self.is_bound_to_queue(aux) => {
                let cause: String = format!("queue not bound to model (model_id={}, queue_id={})", self.model_id, aux);
                error!("check_wait_key(): {}", cause);
                Err(Fail::new(ErrorCode::ParameterInvalid, &cause))
            },
            _ => Ok(()),
        }
    }

    fn enqueue(&self, stream_id: StreamId) -> Result<(), Fail> {
        let activation: StreamActivation = StreamActivation {
            model_id: self.model_id,
            stream_id,
        };
        if let Err(e) = self.services.activations.send(activation) {
            let cause: String = format!(
                "activation queue closed (model_id={}, stream={})",
                self.model_id, e.0.stream_id
            );
            error!("enqueue(): {}", cause);
            return Err(Fail::new(ErrorCode::Canceled, &cause));
        }
        trace!("enqueue(): model_id={} stream={}", self.model_id, stream_id);
        Ok(())
    }

    /// Wakes every waiter of the model, then releases its queues, then stops its streams.
    fn teardown(&self) {
        let mut keys: Vec<WaitKey> = self.queue_wait_keys();
        for kind in [WaitKind::PrepareMemory, WaitKind::Generic] {
            keys.push(WaitKey::new(self.model_id, kind, 0));
        }
        self.services.waits.clear_batch(&keys);
        self.services.waits.clear_model(self.model_id);

        self.queues.lock().clear();

        for stream in self.streams.values() {
            stream.lock().fail();
        }

        if let Err(e) = self.check_operate_and_update_status(ModelOperation::Release) {
            debug!("teardown(): {:?}", e);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
