// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Event driver interface and an in-process implementation backed by channels.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    event::Event,
    model::ModelReport,
    runtime::fail::{
        ErrorCode,
        Fail,
    },
};
use ::crossbeam_channel::{
    Receiver,
    RecvTimeoutError,
    Sender,
};
use ::std::time::Duration;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Conditions reported by the driver instead of an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriverStatus {
    NoEvent,
    WaitTimeout,
    /// The process is going away. Fatal for the dispatch loop.
    ProcessExit,
    /// The driver rejected the wait parameters. Fatal for the dispatch loop.
    ParaError,
    /// The calling thread runs on a core it must not use.
    RunInIllegalCpu,
    Other(i32),
}

/// Acknowledgement of an HWTS kernel request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventAck {
    pub event_id: u64,
    pub status: ErrorCode,
}

/// Summaries submitted back to the task scheduler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventSummary {
    KernelResponse { event_id: u64, status: ErrorCode },
    ControlResponse { request: &'static str, status: ErrorCode },
    TaskReport(ModelReport),
}

/// Anything a [ChannelDriver] sends back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriverReply {
    Ack(EventAck),
    Summary(EventSummary),
}

/// Event delivery and reply primitives provided by the platform.
pub trait EventDriver: Send + Sync {
    /// Waits up to `timeout` for the next event for `thread_index`.
    fn wait_event(&self, thread_index: usize, timeout: Duration) -> Result<Event, DriverStatus>;
    fn ack_event(&self, ack: EventAck) -> Result<(), Fail>;
    fn submit_event(&self, summary: EventSummary) -> Result<(), Fail>;
}

/// Scheduler side of the in-process driver.
pub struct ChannelDriver {
    events: Receiver<Result<Event, DriverStatus>>,
    replies: Sender<DriverReply>,
}

/// Platform side of the in-process driver: injects events and observes replies.
#[derive(Clone)]
pub struct ChannelDriverHost {
    events: Sender<Result<Event, DriverStatus>>,
    replies: Receiver<DriverReply>,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates a connected driver pair.
pub fn channel() -> (ChannelDriver, ChannelDriverHost) {
    let (event_tx, event_rx) = ::crossbeam_channel::unbounded();
    let (reply_tx, reply_rx) = ::crossbeam_channel::unbounded();
    (
        ChannelDriver {
            events: event_rx,
            replies: reply_tx,
        },
        ChannelDriverHost {
            events: event_tx,
            replies: reply_rx,
        },
    )
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DriverStatus {
    pub fn error_code(self) -> ErrorCode {
        match self {
            DriverStatus::NoEvent | DriverStatus::WaitTimeout => ErrorCode::Timeout,
            DriverStatus::ProcessExit => ErrorCode::ProcessExit,
            DriverStatus::ParaError => ErrorCode::ParameterInvalid,
            DriverStatus::RunInIllegalCpu => ErrorCode::RunInIllegalCpu,
            DriverStatus::Other(_) => ErrorCode::DriverError,
        }
    }
}

impl ChannelDriver {
    fn reply(&self, reply: DriverReply) -> Result<(), Fail> {
        if self.replies.send(reply).is_err() {
            let cause: &str = "driver host disconnected";
            warn!("reply(): {}", cause);
            return Err(Fail::new(ErrorCode::DriverError, cause));
        }
        Ok(())
    }
}

impl ChannelDriverHost {
    pub fn send_event(&self, event: Event) -> Result<(), Fail> {
        self.send(Ok(event))
    }

    /// Makes one pending `wait_event` call report `status`.
    pub fn inject_status(&self, status: DriverStatus) -> Result<(), Fail> {
        self.send(Err(status))
    }

    pub fn recv_reply(&self, timeout: Duration) -> Option<DriverReply> {
        self.replies.recv_timeout(timeout).ok()
    }

    pub fn try_recv_reply(&self) -> Option<DriverReply> {
        self.replies.try_recv().ok()
    }

    fn send(&self, item: Result<Event, DriverStatus>) -> Result<(), Fail> {
        if self.events.send(item).is_err() {
            let cause: &str = "driver disconnected";
            warn!("send(): {}", cause);
            return Err(Fail::new(ErrorCode::DriverError, cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl EventDriver for ChannelDriver {
    fn wait_event(&self, _thread_index: usize, timeout: Duration) -> Result<Event, DriverStatus> {
        match self.events.recv_timeout(timeout) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => Err(DriverStatus::WaitTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(DriverStatus::ProcessExit),
        }
    }

    fn ack_event(&self, ack: EventAck) -> Result<(), Fail> {
        self.reply(DriverReply::Ack(ack))
    }

    fn submit_event(&self, summary: EventSummary) -> Result<(), Fail> {
        self.reply(DriverReply::Summary(summary))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
