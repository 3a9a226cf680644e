// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    daemon::SchedulerContext,
    event::{
        driver::EventSummary,
        timeout::{
            TimeoutPolicy,
            TimeoutSettings,
        },
        ControlMessage,
        KernelRequest,
        ModelCmd,
    },
    event_wait::{
        WaitKey,
        WaitKind,
    },
    kernel::{
        RunContext,
        TaskOutcome,
    },
    model::{
        descriptor::ModelInfo,
        AicpuModel,
        ModelReport,
        StreamActivation,
    },
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        ModelId,
        StreamId,
    },
};
use ::std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Turns decoded events into operations on the model and dump registries.
pub struct AicpuEventProcess {
    ctx: Arc<SchedulerContext>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AicpuEventProcess {
    pub fn new(ctx: Arc<SchedulerContext>) -> Self {
        Self { ctx }
    }

    /// Runs a kernel requested by the task scheduler, then dumps its tensors if asked to. A dump failure is logged and
    /// does not fail the request.
    pub fn process_kernel(&self, request: &KernelRequest) -> Result<(), Fail> {
        let stream_id: StreamId = StreamId::from(request.stream_id);
        let mut run_ctx: RunContext = match self.ctx.models().get_model_by_stream_id(stream_id) {
            Some(model) => RunContext::new(model.model_id(), model.ts_id(), stream_id, true),
            None => RunContext::detached(stream_id),
        };

        let start: Instant = Instant::now();
        let result: Result<TaskOutcome, Fail> = self.ctx.kernels().invoke_descriptor(&request.kernel, &mut run_ctx);
        let elapsed: Duration = start.elapsed();
        if self.ctx.timeouts().op_execute_timed_out(elapsed) {
            warn!(
                "process_kernel(): kernel ran past its execute timeout (kernel={:?}, stream={}, task={}, elapsed={:?})",
                request.kernel.name, request.stream_id, request.task_id, elapsed
            );
        }
        let outcome: TaskOutcome = result?;
        trace!(
            "process_kernel(): kernel={:?} stream={} task={} outcome={:?}",
            request.kernel.name,
            request.stream_id,
            request.task_id,
            outcome
        );

        if request.dump_enabled {
            if let Err(e) = self.ctx.dumps().dump_op_info(request.stream_id, request.task_id) {
                warn!(
                    "process_kernel(): dump failed (stream={}, task={}, error={:?})",
                    request.stream_id, request.task_id, e
                );
            }
        }
        Ok(())
    }

    /// Serves a control message and builds the summary sent back for it.
    pub fn process_control(&self, msg: ControlMessage) -> EventSummary {
        let request: &'static str = msg.name();
        debug!("process_control(): {}", request);
        let result: Result<(), Fail> = match msg {
            ControlMessage::TaskReport { model_id } => match self.process_task_report(model_id) {
                Ok(report) => return EventSummary::TaskReport(report),
                Err(e) => Err(e),
            },
            ControlMessage::ModelOperate { model_id, cmd } => self.process_model_operate(model_id, cmd),
            ControlMessage::TimeoutConfig(config) => {
                self.ctx.apply_timeout_config(config);
                Ok(())
            },
            ControlMessage::DumpLoad(buf) => self.ctx.dumps().load_op_mapping_info(&buf),
            ControlMessage::DumpData { stream_id, task_id } => self.ctx.dumps().dump_op_info(stream_id, task_id),
            ControlMessage::FftsPlusDump {
                stream_id,
                task_id,
                context_id,
                thread_id,
            } => self
                .ctx
                .dumps()
                .dump_ffts_plus_op_info(stream_id, task_id, context_id, thread_id),
        };
        let status: ErrorCode = match result {
            Ok(()) => ErrorCode::Ok,
            Err(e) => {
                warn!("process_control(): {} failed ({:?})", request, e);
                e.code
            },
        };
        EventSummary::ControlResponse { request, status }
    }

    pub fn process_task_report(&self, model_id: ModelId) -> Result<ModelReport, Fail> {
        self.ctx.models().require(model_id, "process_task_report")?.task_report()
    }

    pub fn process_model_operate(&self, model_id: ModelId, cmd: ModelCmd) -> Result<(), Fail> {
        match cmd {
            ModelCmd::Load(buf) => {
                let loaded: ModelId = ModelInfo::peek_model_id(&buf)?;
                if loaded != model_id {
                    let cause: String = format!(
                        "model id mismatch (request={}, descriptor={})",
                        model_id, loaded
                    );
                    error!("process_model_operate(): {}", cause);
                    return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
                }
                self.ctx.models().model_load(&buf)?;
                Ok(())
            },
            ModelCmd::Destroy => {
                self.ctx.models().model_destroy(model_id)?;
                self.ctx.dumps().unload_model(model_id);
                Ok(())
            },
            ModelCmd::Abort => {
                self.ctx.models().model_abort(model_id)?;
                self.ctx.dumps().unload_model(model_id);
                Ok(())
            },
            ModelCmd::ActiveStream(stream_id) => self
                .ctx
                .models()
                .require(model_id, "process_model_operate")?
                .active_stream(stream_id, true),
        }
    }

    /// Delivers a queue transition to the models bound to the queue and recovers the stream it releases, if any.
    pub fn process_queue_event(&self, kind: WaitKind, queue_id: u32) -> Result<(), Fail> {
        let models: Vec<Arc<AicpuModel>> = self.ctx.models().models_bound_to_queue(queue_id);
        if models.is_empty() {
            debug!("process_queue_event(): no model bound (queue_id={}, kind={:?})", queue_id, kind);
            return Ok(());
        }
        let mut first_error: Option<Fail> = None;
        for model in models {
            let key: WaitKey = WaitKey::new(model.model_id(), kind, queue_id);
            if let Some(stream_id) = self.ctx.waits().notify(key) {
                if let Err(e) = model.recover_stream(stream_id, true) {
                    error!(
                        "process_queue_event(): recover failed (model_id={}, stream={}, error={:?})",
                        model.model_id(),
                        stream_id,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs a stream whose execution was deferred to the worker threads.
    pub fn process_stream_activation(&self, activation: StreamActivation) -> Result<(), Fail> {
        match self.ctx.models().get_model(activation.model_id) {
            Some(model) => model.execute_stream(activation.stream_id, true),
            None => {
                debug!("process_stream_activation(): model gone ({:?})", activation);
                Ok(())
            },
        }
    }

    /// Looks for streams suspended for at least `limit` and applies the timeout policy to their models. Returns the
    /// number of models found stalled.
    pub fn check_stalled_streams(&self, limit: Duration) -> usize {
        let settings: TimeoutSettings = self.ctx.timeouts();
        let now: Instant = Instant::now();
        let mut stalled_models: usize = 0;
        for model in self.ctx.models().models() {
            let stalled: Vec<StreamId> = model.suspended_streams_over(limit, now);
            if stalled.is_empty() {
                continue;
            }
            stalled_models += 1;
            warn!(
                "check_stalled_streams(): model loop timeout (model_id={}, streams={:?}, limit={:?}, policy={:?})",
                model.model_id(),
                stalled,
                limit,
                settings.policy
            );
            if settings.policy == TimeoutPolicy::Abort {
                let model_id: ModelId = model.model_id();
                if let Err(e) = self.process_model_operate(model_id, ModelCmd::Abort) {
                    error!("check_stalled_streams(): abort failed (model_id={}, error={:?})", model_id, e);
                }
            }
        }
        stalled_models
    }
}
