// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::Harness;
use ::aicpu_sched::{
    ensure_eq,
    event::AicpuEventProcess,
    event_wait::{
        WaitKey,
        WaitKind,
        WakeReason,
    },
    kernel::{
        names,
        KernelRegistry,
        RunContext,
        TaskOutcome,
    },
    model::{
        descriptor::{
            ModelInfoBuilder,
            QueueDirection,
        },
        ModelReport,
        StreamState,
    },
    AicpuModel,
    ErrorCode,
    Fail,
    ModelId,
    SchedulerContext,
    StreamId,
};
use ::anyhow::Result;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::{
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
        Barrier,
    },
    thread,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Helpers
//======================================================================================================================

/// Registry with the built-in kernels plus a `counter` kernel that bumps the returned counter.
fn counting_kernels() -> (KernelRegistry, Arc<AtomicUsize>) {
    let counter: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let kernels: KernelRegistry = KernelRegistry::with_builtins();
    let hits: Arc<AtomicUsize> = counter.clone();
    kernels.register(
        "counter",
        move |_: &[u8], _: &mut RunContext| -> Result<TaskOutcome, Fail> {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::Next)
        },
    );
    (kernels, counter)
}

fn queue_param(queue_id: u32) -> [u8; 4] {
    queue_id.to_le_bytes()
}

//======================================================================================================================
// Tests
//======================================================================================================================

#[test]
fn load_execute_destroy() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let buf: Vec<u8> = ModelInfoBuilder::new(3, 0)
        .stream(1, true)
        .task(1, 0, "counter", &[])
        .task(1, 1, "counter", &[])
        .task(1, 2, names::END_GRAPH, &[])
        .task(1, 3, names::STREAM_END, &[])
        .encode();

    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;
    model.execute_stream(StreamId::from(1), true)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 2);
    ensure_eq!(model.iterations(), 1);
    ensure_eq!(model.stream_state(StreamId::from(1))?, StreamState::Completed);

    let report: ModelReport = model.task_report()?;
    ensure_eq!(report.end_of_graph, true);
    ensure_eq!(model.task_report()?.end_of_graph, false);

    // A second pass restarts the head stream from its first task.
    model.active_stream(StreamId::from(1), true)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 4);

    harness.ctx.models().model_destroy(ModelId::from(3))?;
    ensure_eq!(harness.ctx.models().get_model(ModelId::from(3)).is_none(), true);
    ensure_eq!(harness.ctx.models().get_model_by_stream_id(StreamId::from(1)).is_none(), true);
    Ok(())
}

#[test]
fn load_rejects_duplicates_and_unknown_kernels() -> Result<()> {
    let (kernels, _counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let buf: Vec<u8> = ModelInfoBuilder::new(4, 0)
        .stream(10, true)
        .task(10, 0, "counter", &[])
        .encode();
    harness.ctx.models().model_load(&buf)?;
    match harness.ctx.models().model_load(&buf) {
        Err(e) => ensure_eq!(e.code, ErrorCode::ModelExists),
        Ok(_) => anyhow::bail!("duplicate load accepted"),
    }

    let bad: Vec<u8> = ModelInfoBuilder::new(5, 0)
        .stream(11, true)
        .task(11, 0, "noSuchKernel", &[])
        .encode();
    match harness.ctx.models().model_load(&bad) {
        Err(e) => ensure_eq!(e.code, ErrorCode::KernelNotFound),
        Ok(_) => anyhow::bail!("unknown kernel accepted"),
    }
    ensure_eq!(harness.ctx.models().get_model(ModelId::from(5)).is_none(), true);
    ensure_eq!(harness.ctx.models().model_count(), 1);

    let too_big: Vec<u8> = ModelInfoBuilder::new(4096, 0).stream(12, true).encode();
    match harness.ctx.models().model_load(&too_big) {
        Err(e) => ensure_eq!(e.code, ErrorCode::ParameterInvalid),
        Ok(_) => anyhow::bail!("model id over the limit accepted"),
    }

    match harness.ctx.models().model_abort(ModelId::from(77)) {
        Err(e) => ensure_eq!(e.code, ErrorCode::ModelNotFound),
        Ok(_) => anyhow::bail!("abort of an unknown model succeeded"),
    }
    Ok(())
}

#[test]
fn queue_wait_suspends_until_notified() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let buf: Vec<u8> = ModelInfoBuilder::new(6, 0)
        .stream(20, true)
        .task(20, 0, names::WAIT_QUEUE_NOT_EMPTY, &queue_param(7))
        .task(20, 1, "counter", &[])
        .queue(7, QueueDirection::Input, 0)
        .encode();
    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;

    model.execute_stream(StreamId::from(20), true)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 0);
    ensure_eq!(model.stream_state(StreamId::from(20))?, StreamState::Suspended);

    let process: AicpuEventProcess = AicpuEventProcess::new(harness.ctx.clone());
    process.process_queue_event(WaitKind::QueueNotEmpty, 7)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 1);
    ensure_eq!(model.stream_state(StreamId::from(20))?, StreamState::Completed);

    // A notification that arrives first is buffered and consumed by the next wait.
    process.process_queue_event(WaitKind::QueueNotEmpty, 7)?;
    model.active_stream(StreamId::from(20), true)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn waiting_on_an_unbound_queue_fails() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let buf: Vec<u8> = ModelInfoBuilder::new(7, 0)
        .stream(30, true)
        .task(30, 0, names::WAIT_QUEUE_NOT_FULL, &queue_param(99))
        .encode();
    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;
    match model.execute_stream(StreamId::from(30), true) {
        Err(e) => ensure_eq!(e.code, ErrorCode::ParameterInvalid),
        Ok(()) => anyhow::bail!("wait on an unbound queue accepted"),
    }
    Ok(())
}

#[test]
fn streams_switch_inline() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let buf: Vec<u8> = ModelInfoBuilder::new(8, 0)
        .stream(40, true)
        .stream(41, false)
        .task(40, 0, "counter", &[])
        .task(40, 1, names::ACTIVE_STREAM, &41u32.to_le_bytes())
        .task(41, 0, "counter", &[])
        .task(41, 1, "counter", &[])
        .encode();
    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;
    model.execute_stream(StreamId::from(40), true)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 3);
    ensure_eq!(model.stream_state(StreamId::from(41))?, StreamState::Completed);

    match model.execute_stream(StreamId::from(42), true) {
        Err(e) => ensure_eq!(e.code, ErrorCode::StreamNotFound),
        Ok(()) => anyhow::bail!("unknown stream executed"),
    }
    Ok(())
}

#[test]
fn abort_cancels_blocked_waiters() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let buf: Vec<u8> = ModelInfoBuilder::new(9, 0)
        .stream(50, true)
        .task(50, 0, names::NOP, &[])
        .encode();
    harness.ctx.models().model_load(&buf)?;

    let key: WaitKey = WaitKey::new(ModelId::from(9), WaitKind::PrepareMemory, 0);
    let barrier: Arc<Barrier> = Arc::new(Barrier::new(2));
    let waiter_ctx: Arc<SchedulerContext> = harness.ctx.clone();
    let waiter_barrier: Arc<Barrier> = barrier.clone();
    let waiter: thread::JoinHandle<Result<WakeReason, Fail>> = thread::spawn(move || {
        waiter_barrier.wait();
        waiter_ctx.waits().wait_blocking(key, Duration::from_secs(10))
    });
    barrier.wait();
    thread::sleep(Duration::from_millis(100));

    harness.ctx.models().model_abort(ModelId::from(9))?;
    let reason: Result<WakeReason, Fail> = match waiter.join() {
        Ok(reason) => reason,
        Err(_) => anyhow::bail!("waiter panicked"),
    };
    ensure_eq!(reason?, WakeReason::Canceled);
    ensure_eq!(harness.ctx.models().get_model(ModelId::from(9)).is_none(), true);

    // The id is free again once the abort returned.
    harness.ctx.models().model_load(&buf)?;
    Ok(())
}

#[test]
fn goto_out_of_range_fails_the_stream() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let buf: Vec<u8> = ModelInfoBuilder::new(10, 0)
        .stream(60, true)
        .task(60, 0, names::GOTO_TASK, &5u32.to_le_bytes())
        .encode();
    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;
    match model.execute_stream(StreamId::from(60), true) {
        Err(e) => ensure_eq!(e.code, ErrorCode::TaskIndexInvalid),
        Ok(()) => anyhow::bail!("goto past the last task accepted"),
    }
    ensure_eq!(model.stream_state(StreamId::from(60))?, StreamState::Failed);
    Ok(())
}

#[test]
fn executing_a_finished_stream_runs_it_again() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let buf: Vec<u8> = ModelInfoBuilder::new(11, 0)
        .stream(1, true)
        .task(1, 0, "counter", &[])
        .encode();
    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;
    model.execute_stream(StreamId::from(1), true)?;
    ensure_eq!(model.stream_state(StreamId::from(1))?, StreamState::Completed);
    model.execute_stream(StreamId::from(1), true)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 2);

    // Deferred executions restart the stream as well.
    model.execute_stream(StreamId::from(1), false)?;
    let process: AicpuEventProcess = AicpuEventProcess::new(harness.ctx.clone());
    for activation in harness.ctx.activations().try_iter() {
        process.process_stream_activation(activation)?;
    }
    ensure_eq!(counter.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn blocked_kernel_does_not_hold_up_watchdog_or_abort() -> Result<()> {
    let (entered_tx, entered_rx): (Sender<()>, Receiver<()>) = ::crossbeam_channel::bounded(1);
    let (release_tx, release_rx): (Sender<()>, Receiver<()>) = ::crossbeam_channel::bounded(1);
    let kernels: KernelRegistry = KernelRegistry::with_builtins();
    kernels.register(
        "block",
        move |_: &[u8], _: &mut RunContext| -> Result<TaskOutcome, Fail> {
            entered_tx
                .send(())
                .map_err(|_| Fail::new(ErrorCode::Canceled, "test finished"))?;
            release_rx
                .recv_timeout(Duration::from_secs(10))
                .map_err(|_| Fail::new(ErrorCode::Timeout, "never released"))?;
            Ok(TaskOutcome::Next)
        },
    );
    let harness: Harness = Harness::new(kernels);
    let buf: Vec<u8> = ModelInfoBuilder::new(12, 0)
        .stream(70, true)
        .task(70, 0, "block", &[])
        .task(70, 1, names::NOP, &[])
        .encode();
    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;
    let runner_model: Arc<AicpuModel> = model.clone();
    let runner: thread::JoinHandle<Result<(), Fail>> =
        thread::spawn(move || runner_model.execute_stream(StreamId::from(70), true));
    entered_rx.recv_timeout(Duration::from_secs(5))?;

    let started: Instant = Instant::now();
    let process: AicpuEventProcess = AicpuEventProcess::new(harness.ctx.clone());
    ensure_eq!(process.check_stalled_streams(Duration::from_secs(60)), 0);
    ensure_eq!(model.stream_state(StreamId::from(70))?, StreamState::Runnable);
    harness.ctx.models().model_abort(ModelId::from(12))?;
    let elapsed: Duration = started.elapsed();
    release_tx.send(())?;

    let result: Result<(), Fail> = match runner.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("runner panicked"),
    };
    ensure_eq!(elapsed < Duration::from_secs(2), true);
    match result {
        Err(e) => ensure_eq!(e.code, ErrorCode::Canceled),
        Ok(()) => anyhow::bail!("aborted stream kept running"),
    }
    ensure_eq!(model.stream_state(StreamId::from(70))?, StreamState::Failed);
    Ok(())
}

#[test]
fn destroy_releases_wait_entries() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let buf: Vec<u8> = ModelInfoBuilder::new(13, 0)
        .stream(80, true)
        .task(80, 0, names::WAIT_QUEUE_NOT_EMPTY, &queue_param(3))
        .queue(3, QueueDirection::Input, 0)
        .queue(4, QueueDirection::Output, 0)
        .encode();
    let model: Arc<AicpuModel> = harness.ctx.models().model_load(&buf)?;
    model.execute_stream(StreamId::from(80), true)?;

    // Signals without a waiter are coalesced into one entry.
    let process: AicpuEventProcess = AicpuEventProcess::new(harness.ctx.clone());
    for _ in 0..100 {
        process.process_queue_event(WaitKind::QueueNotFull, 4)?;
    }
    let key: WaitKey = WaitKey::new(ModelId::from(13), WaitKind::QueueNotFull, 4);
    ensure_eq!(harness.ctx.waits().pending(&key), 100);
    ensure_eq!(harness.ctx.waits().key_count(), 2);

    harness.ctx.models().model_destroy(ModelId::from(13))?;
    ensure_eq!(harness.ctx.waits().key_count(), 0);
    ensure_eq!(harness.ctx.waits().pending(&key), 0);
    Ok(())
}
