// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    daemon::SchedulerContext,
    event::{
        driver::{
            DriverStatus,
            EventAck,
            EventSummary,
        },
        process::AicpuEventProcess,
        timeout::TimeoutSettings,
        Event,
    },
    event_wait::WaitKind,
    runtime::fail::{
        ErrorCode,
        Fail,
    },
};
use ::std::{
    sync::Arc,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Deferred stream activations served per poll, so that driver events are not starved.
const MAX_ACTIVATIONS_PER_POLL: usize = 64;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Dispatch loop of one worker thread.
pub struct AicpuEventManager {
    ctx: Arc<SchedulerContext>,
    process: AicpuEventProcess,
    thread_index: usize,
    running: bool,
    /// Consecutive polls that returned no event.
    wait_counter: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AicpuEventManager {
    pub fn new(ctx: Arc<SchedulerContext>, thread_index: usize) -> Self {
        Self {
            process: AicpuEventProcess::new(ctx.clone()),
            ctx,
            thread_index,
            running: false,
            wait_counter: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn wait_counter(&self) -> u64 {
        self.wait_counter
    }

    /// Serves pending stream activations, then waits for and processes at most one driver event.
    pub fn do_once(&mut self, timeout: Duration) -> Result<(), Fail> {
        self.running = true;
        self.drain_activations();

        let event: Event = match self.ctx.driver().wait_event(self.thread_index, timeout) {
            Ok(event) => event,
            Err(status) => return self.on_driver_status(status),
        };
        self.wait_counter = 0;
        self.process_event(event)
    }

    /// Dispatches one event. Replies are sent before returning, including for failed requests.
    pub fn process_event(&mut self, event: Event) -> Result<(), Fail> {
        trace!("process_event(): thread={} event={:?}", self.thread_index, event);
        match event {
            Event::HwtsKernel(request) => {
                let result: Result<(), Fail> = self.process.process_kernel(&request);
                self.ctx.driver().ack_event(EventAck {
                    event_id: request.event_id,
                    status: status_of(&result),
                })?;
                result
            },
            Event::MsgQueueKernel(request) => {
                let result: Result<(), Fail> = self.process.process_kernel(&request);
                self.ctx.driver().submit_event(EventSummary::KernelResponse {
                    event_id: request.event_id,
                    status: status_of(&result),
                })?;
                result
            },
            Event::Control(msg) => {
                let summary: EventSummary = self.process.process_control(msg);
                self.ctx.driver().submit_event(summary)
            },
            Event::QueueNotEmpty { queue_id } | Event::Cdq { queue_id } => {
                self.process.process_queue_event(WaitKind::QueueNotEmpty, queue_id)
            },
            Event::QueueNotFull { queue_id } => self.process.process_queue_event(WaitKind::QueueNotFull, queue_id),
            Event::Timer { timer_id } => {
                let limit: Duration = self.ctx.timeouts().op_wait_timeout;
                if !limit.is_zero() {
                    let stalled: usize = self.process.check_stalled_streams(limit);
                    trace!("process_event(): timer={} stalled_models={}", timer_id, stalled);
                }
                Ok(())
            },
            Event::Unknown { event_id } => {
                let cause: String = format!("unknown event (event_id={}, thread={})", event_id, self.thread_index);
                warn!("process_event(): {}", cause);
                Err(Fail::new(ErrorCode::NotFoundEvent, &cause))
            },
        }
    }

    /// Runs the dispatch loop until the scheduler stops or a fatal driver condition is reported. Returns the failure
    /// that ended the loop, which is [ErrorCode::RunInIllegalCpu] when the thread must move to another core.
    pub fn run(&mut self) -> Result<(), Fail> {
        let timeout: Duration = self.ctx.config().event_wait_timeout;
        info!("run(): dispatch loop started (thread={})", self.thread_index);
        while !self.ctx.is_stopped() {
            if let Err(e) = self.do_once(timeout) {
                if !self.running {
                    error!("run(): dispatch loop terminated (thread={}, error={:?})", self.thread_index, e);
                    return Err(e);
                }
                if e.code == ErrorCode::RunInIllegalCpu {
                    return Err(e);
                }
                debug!("run(): thread={} {:?}", self.thread_index, e);
            }
        }
        self.running = false;
        info!("run(): dispatch loop stopped (thread={})", self.thread_index);
        Ok(())
    }

    fn on_driver_status(&mut self, status: DriverStatus) -> Result<(), Fail> {
        match status {
            DriverStatus::NoEvent | DriverStatus::WaitTimeout => {
                self.count_idle_poll();
                Ok(())
            },
            DriverStatus::ProcessExit | DriverStatus::ParaError => {
                self.running = false;
                let cause: String = format!("driver reported {:?} (thread={})", status, self.thread_index);
                error!("do_once(): {}", cause);
                Err(Fail::new(status.error_code(), &cause))
            },
            DriverStatus::RunInIllegalCpu => {
                let cause: String = format!("running on an illegal cpu (thread={})", self.thread_index);
                warn!("do_once(): {}", cause);
                Err(Fail::new(ErrorCode::RunInIllegalCpu, &cause))
            },
            DriverStatus::Other(code) => {
                self.count_idle_poll();
                let cause: String = format!("driver error {} (thread={})", code, self.thread_index);
                warn!("do_once(): {}", cause);
                Err(Fail::new(ErrorCode::DriverError, &cause))
            },
        }
    }

    /// Counts a poll that delivered no event and runs the loop timeout check once enough of them piled up.
    fn count_idle_poll(&mut self) {
        self.wait_counter += 1;
        let settings: TimeoutSettings = self.ctx.timeouts();
        if settings.loop_timeout_polls != 0 && self.wait_counter >= settings.loop_timeout_polls {
            self.model_loop_time_out(&settings);
            self.wait_counter = 0;
        }
    }

    fn model_loop_time_out(&self, settings: &TimeoutSettings) {
        let stalled: usize = self.process.check_stalled_streams(settings.op_wait_timeout);
        if stalled != 0 {
            warn!(
                "model_loop_time_out(): {} model(s) without progress after {} polls (thread={})",
                stalled, self.wait_counter, self.thread_index
            );
        }
    }

    fn drain_activations(&self) {
        for activation in self.ctx.activations().try_iter().take(MAX_ACTIVATIONS_PER_POLL) {
            if let Err(e) = self.process.process_stream_activation(activation) {
                error!(
                    "drain_activations(): stream failed (activation={:?}, error={:?})",
                    activation, e
                );
            }
        }
    }
}

fn status_of(result: &Result<(), Fail>) -> ErrorCode {
    match result {
        Ok(()) => ErrorCode::Ok,
        Err(e) => e.code,
    }
}
