// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Message channel between the host and the scheduler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    event::{
        ControlMessage,
        EventSummary,
    },
    runtime::fail::{
        ErrorCode,
        Fail,
    },
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Message carried by a host session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionMessage {
    /// Control request from the host.
    Request(ControlMessage),
    /// Reply to a request.
    Response(EventSummary),
    /// The peer closed the session.
    SocketClosed,
}

/// Send and receive primitives of a host session.
pub trait HostSession: Send + Sync {
    fn send_msg(&self, session_id: u32, msg: SessionMessage) -> Result<(), Fail>;
    /// Blocks until a message arrives for `session_id`.
    fn recv_msg(&self, session_id: u32) -> Result<SessionMessage, Fail>;
}

/// One end of an in-process session.
pub struct ChannelSession {
    tx: Sender<SessionMessage>,
    rx: Receiver<SessionMessage>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ChannelSession {
    /// Creates two connected ends.
    pub fn pair() -> (ChannelSession, ChannelSession) {
        let (a_tx, b_rx) = ::crossbeam_channel::unbounded();
        let (b_tx, a_rx) = ::crossbeam_channel::unbounded();
        (ChannelSession { tx: a_tx, rx: a_rx }, ChannelSession { tx: b_tx, rx: b_rx })
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl HostSession for ChannelSession {
    fn send_msg(&self, session_id: u32, msg: SessionMessage) -> Result<(), Fail> {
        if self.tx.send(msg).is_err() {
            let cause: String = format!("session closed (session_id={})", session_id);
            warn!("send_msg(): {}", cause);
            return Err(Fail::new(ErrorCode::Io, &cause));
        }
        Ok(())
    }

    /// A dropped peer reads as [SessionMessage::SocketClosed].
    fn recv_msg(&self, session_id: u32) -> Result<SessionMessage, Fail> {
        match self.rx.recv() {
            Ok(msg) => Ok(msg),
            Err(_) => {
                debug!("recv_msg(): peer gone (session_id={})", session_id);
                Ok(SessionMessage::SocketClosed)
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
