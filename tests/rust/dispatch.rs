// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    addr_of,
    Harness,
};
use ::aicpu_sched::{
    daemon::session::{
        ChannelSession,
        HostSession,
        SessionMessage,
    },
    dump::{
        OpMappingInfoBuilder,
        OpMappingTask,
        TensorDesc,
    },
    ensure_eq,
    event::{
        driver::DriverStatus,
        timeout::{
            TimeoutConfig,
            TimeoutPolicy,
        },
        ControlMessage,
        DriverReply,
        EventAck,
        EventSummary,
        KernelRequest,
        ModelCmd,
    },
    kernel::{
        names,
        KernelDescriptor,
        KernelRegistry,
        RunContext,
        TaskOutcome,
    },
    model::descriptor::{
        ModelInfoBuilder,
        QueueDirection,
    },
    AicpuEventManager,
    Daemon,
    ErrorCode,
    Event,
    Fail,
    ModelId,
    SchedulerConfig,
    StreamId,
};
use ::anyhow::Result;
use ::std::{
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    thread,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const POLL: Duration = Duration::from_millis(5);

//======================================================================================================================
// Helpers
//======================================================================================================================

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

fn kernel_request(event_id: u64, name: &str, stream_id: u32, task_id: u32) -> KernelRequest {
    KernelRequest {
        event_id,
        kernel: KernelDescriptor {
            name: name.to_string(),
            so_name: "libcpu_kernels.so".to_string(),
            params: Vec::new(),
        },
        stream_id,
        task_id,
        dump_enabled: false,
    }
}

fn control_status(reply: Option<DriverReply>) -> Result<(&'static str, ErrorCode)> {
    match reply {
        Some(DriverReply::Summary(EventSummary::ControlResponse { request, status })) => Ok((request, status)),
        other => anyhow::bail!("expected a control response, got {:?}", other),
    }
}

//======================================================================================================================
// Tests
//======================================================================================================================

#[test]
fn hwts_kernels_are_acknowledged() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);

    harness.host.send_event(Event::HwtsKernel(kernel_request(11, "counter", 1, 1)))?;
    manager.do_once(POLL)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 1);
    ensure_eq!(
        harness.reply(),
        Some(DriverReply::Ack(EventAck {
            event_id: 11,
            status: ErrorCode::Ok,
        }))
    );

    harness.host.send_event(Event::HwtsKernel(kernel_request(12, "missing", 1, 2)))?;
    match manager.do_once(POLL) {
        Err(e) => ensure_eq!(e.code, ErrorCode::KernelNotFound),
        Ok(()) => anyhow::bail!("unknown kernel ran"),
    }
    ensure_eq!(
        harness.reply(),
        Some(DriverReply::Ack(EventAck {
            event_id: 12,
            status: ErrorCode::KernelNotFound,
        }))
    );
    ensure_eq!(manager.is_running(), true);
    Ok(())
}

#[test]
fn message_queue_kernels_get_a_response() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);

    manager.process_event(Event::MsgQueueKernel(kernel_request(21, "counter", 2, 1)))?;
    ensure_eq!(counter.load(Ordering::SeqCst), 1);
    ensure_eq!(
        harness.reply(),
        Some(DriverReply::Summary(EventSummary::KernelResponse {
            event_id: 21,
            status: ErrorCode::Ok,
        }))
    );
    Ok(())
}

#[test]
fn dump_enabled_kernels_capture_tensors() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    let data: Vec<u8> = (0u8..16).collect();
    let mapping: Vec<u8> = OpMappingInfoBuilder::new(5, "net")
        .task(OpMappingTask::new(1, 10, "softmax").output(TensorDesc::new(addr_of(&data), 16)))
        .encode();
    manager.process_event(Event::Control(ControlMessage::DumpLoad(mapping)))?;
    ensure_eq!(control_status(harness.reply())?, ("DumpLoad", ErrorCode::Ok));

    let mut request: KernelRequest = kernel_request(31, names::NOP, 1, 10);
    request.dump_enabled = true;
    manager.process_event(Event::HwtsKernel(request))?;
    ensure_eq!(harness.sink.captured().len(), 1);
    ensure_eq!(harness.sink.captured()[0].data, data);
    Ok(())
}

#[test]
fn control_messages_drive_the_model_lifecycle() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    let model_id: ModelId = ModelId::from(12);
    let buf: Vec<u8> = ModelInfoBuilder::new(12, 1)
        .stream(3, true)
        .task(3, 0, "counter", &[])
        .task(3, 1, names::END_GRAPH, &[])
        .encode();

    manager.process_event(Event::Control(ControlMessage::ModelOperate {
        model_id,
        cmd: ModelCmd::Load(buf.clone()),
    }))?;
    ensure_eq!(control_status(harness.reply())?, ("ModelLoad", ErrorCode::Ok));

    // The request must name the model the descriptor carries.
    manager.process_event(Event::Control(ControlMessage::ModelOperate {
        model_id: ModelId::from(13),
        cmd: ModelCmd::Load(buf),
    }))?;
    ensure_eq!(control_status(harness.reply())?, ("ModelLoad", ErrorCode::ParameterInvalid));

    manager.process_event(Event::Control(ControlMessage::ModelOperate {
        model_id,
        cmd: ModelCmd::ActiveStream(StreamId::from(3)),
    }))?;
    ensure_eq!(control_status(harness.reply())?, ("ActiveStream", ErrorCode::Ok));
    ensure_eq!(counter.load(Ordering::SeqCst), 1);

    manager.process_event(Event::Control(ControlMessage::TaskReport { model_id }))?;
    match harness.reply() {
        Some(DriverReply::Summary(EventSummary::TaskReport(report))) => {
            ensure_eq!(report.model_id, model_id);
            ensure_eq!(report.ts_id, 1);
            ensure_eq!(report.iterations, 1);
            ensure_eq!(report.end_of_graph, true);
        },
        other => anyhow::bail!("expected a task report, got {:?}", other),
    }

    manager.process_event(Event::Control(ControlMessage::ModelOperate {
        model_id,
        cmd: ModelCmd::Destroy,
    }))?;
    ensure_eq!(control_status(harness.reply())?, ("ModelDestroy", ErrorCode::Ok));
    ensure_eq!(harness.ctx.models().get_model(model_id).is_none(), true);

    manager.process_event(Event::Control(ControlMessage::TaskReport { model_id }))?;
    ensure_eq!(control_status(harness.reply())?, ("TaskReport", ErrorCode::ModelNotFound));
    Ok(())
}

#[test]
fn timeout_config_is_applied() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    manager.process_event(Event::Control(ControlMessage::TimeoutConfig(TimeoutConfig {
        op_wait_timeout_secs: 30,
        op_execute_timeout_secs: 2,
    })))?;
    ensure_eq!(control_status(harness.reply())?, ("TimeoutConfig", ErrorCode::Ok));
    ensure_eq!(harness.ctx.timeouts().op_wait_timeout, Duration::from_secs(30));
    ensure_eq!(harness.ctx.timeouts().op_execute_timeout, Duration::from_secs(2));
    Ok(())
}

#[test]
fn queue_events_recover_waiting_streams() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    let buf: Vec<u8> = ModelInfoBuilder::new(14, 0)
        .stream(4, true)
        .task(4, 0, names::WAIT_QUEUE_NOT_FULL, &9u32.to_le_bytes())
        .task(4, 1, "counter", &[])
        .queue(9, QueueDirection::Output, 0)
        .encode();
    harness
        .ctx
        .models()
        .model_load(&buf)?
        .execute_stream(StreamId::from(4), true)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 0);

    // A transition in the other direction does not release the stream.
    manager.process_event(Event::QueueNotEmpty { queue_id: 9 })?;
    ensure_eq!(counter.load(Ordering::SeqCst), 0);
    manager.process_event(Event::QueueNotFull { queue_id: 9 })?;
    ensure_eq!(counter.load(Ordering::SeqCst), 1);

    // Nobody is bound to this queue.
    manager.process_event(Event::Cdq { queue_id: 100 })?;
    Ok(())
}

#[test]
fn deferred_streams_run_on_the_next_poll() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let harness: Harness = Harness::new(kernels);
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    let buf: Vec<u8> = ModelInfoBuilder::new(15, 0)
        .stream(5, true)
        .task(5, 0, "counter", &[])
        .encode();
    harness
        .ctx
        .models()
        .model_load(&buf)?
        .execute_stream(StreamId::from(5), false)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 0);

    manager.do_once(POLL)?;
    ensure_eq!(counter.load(Ordering::SeqCst), 1);
    ensure_eq!(manager.wait_counter(), 1);
    Ok(())
}

#[test]
fn unknown_events_are_not_fatal() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    harness.host.send_event(Event::Unknown { event_id: 63 })?;
    match manager.do_once(POLL) {
        Err(e) => ensure_eq!(e.code, ErrorCode::NotFoundEvent),
        Ok(()) => anyhow::bail!("unknown event accepted"),
    }
    ensure_eq!(manager.is_running(), true);
    Ok(())
}

#[test]
fn process_exit_stops_the_loop() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    harness.host.inject_status(DriverStatus::NoEvent)?;
    harness.host.inject_status(DriverStatus::ProcessExit)?;
    match manager.run() {
        Err(e) => ensure_eq!(e.code, ErrorCode::ProcessExit),
        Ok(()) => anyhow::bail!("loop survived process exit"),
    }
    ensure_eq!(manager.is_running(), false);
    Ok(())
}

#[test]
fn loop_timeout_aborts_stalled_models() -> Result<()> {
    let config: SchedulerConfig = SchedulerConfig {
        loop_timeout_polls: 2,
        loop_timeout_policy: TimeoutPolicy::Abort,
        ..SchedulerConfig::default()
    };
    let harness: Harness = Harness::with_config(config, KernelRegistry::with_builtins());
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    let buf: Vec<u8> = ModelInfoBuilder::new(16, 0)
        .stream(6, true)
        .task(6, 0, names::WAIT_QUEUE_NOT_EMPTY, &2u32.to_le_bytes())
        .queue(2, QueueDirection::Input, 0)
        .encode();
    harness
        .ctx
        .models()
        .model_load(&buf)?
        .execute_stream(StreamId::from(6), true)?;

    manager.do_once(POLL)?;
    ensure_eq!(harness.ctx.models().get_model(ModelId::from(16)).is_some(), true);
    manager.do_once(POLL)?;
    ensure_eq!(harness.ctx.models().get_model(ModelId::from(16)).is_none(), true);
    ensure_eq!(manager.wait_counter(), 0);
    Ok(())
}

#[test]
fn driver_errors_count_towards_the_loop_timeout() -> Result<()> {
    let config: SchedulerConfig = SchedulerConfig {
        loop_timeout_polls: 2,
        loop_timeout_policy: TimeoutPolicy::Abort,
        ..SchedulerConfig::default()
    };
    let harness: Harness = Harness::with_config(config, KernelRegistry::with_builtins());
    let mut manager: AicpuEventManager = AicpuEventManager::new(harness.ctx.clone(), 0);
    let buf: Vec<u8> = ModelInfoBuilder::new(17, 0)
        .stream(7, true)
        .task(7, 0, names::WAIT_QUEUE_NOT_EMPTY, &3u32.to_le_bytes())
        .queue(3, QueueDirection::Input, 0)
        .encode();
    harness
        .ctx
        .models()
        .model_load(&buf)?
        .execute_stream(StreamId::from(7), true)?;

    harness.host.inject_status(DriverStatus::Other(-5))?;
    match manager.do_once(POLL) {
        Err(e) => ensure_eq!(e.code, ErrorCode::DriverError),
        Ok(()) => anyhow::bail!("driver error swallowed"),
    }
    ensure_eq!(manager.wait_counter(), 1);
    harness.host.inject_status(DriverStatus::Other(-5))?;
    ensure_eq!(manager.do_once(POLL).is_err(), true);
    ensure_eq!(harness.ctx.models().get_model(ModelId::from(17)).is_none(), true);
    ensure_eq!(manager.wait_counter(), 0);
    Ok(())
}

#[test]
fn daemon_serves_workers_and_host_session() -> Result<()> {
    let (kernels, counter): (KernelRegistry, Arc<AtomicUsize>) = counting_kernels();
    let config: SchedulerConfig = SchedulerConfig {
        worker_threads: 2,
        ..SchedulerConfig::default()
    };
    let harness: Harness = Harness::with_config(config, kernels);
    let daemon: Daemon = Daemon::start(harness.ctx.clone())?;

    harness.host.send_event(Event::HwtsKernel(kernel_request(41, "counter", 7, 1)))?;
    ensure_eq!(
        harness.reply(),
        Some(DriverReply::Ack(EventAck {
            event_id: 41,
            status: ErrorCode::Ok,
        }))
    );
    ensure_eq!(counter.load(Ordering::SeqCst), 1);

    let (host, session): (ChannelSession, ChannelSession) = ChannelSession::pair();
    let server: thread::JoinHandle<Result<(), Fail>> = thread::spawn(move || daemon.run_until_closed(&session, 1));
    host.send_msg(
        1,
        SessionMessage::Request(ControlMessage::TaskReport {
            model_id: ModelId::from(99),
        }),
    )?;
    ensure_eq!(
        host.recv_msg(1)?,
        SessionMessage::Response(EventSummary::ControlResponse {
            request: "TaskReport",
            status: ErrorCode::ModelNotFound,
        })
    );
    host.send_msg(1, SessionMessage::SocketClosed)?;
    match server.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("session loop panicked"),
    }
    ensure_eq!(harness.ctx.is_stopped(), true);
    Ok(())
}
