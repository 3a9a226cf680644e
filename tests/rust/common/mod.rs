// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::aicpu_sched::{
    dump::{
        DeviceMemory,
        DumpSink,
        HostMemory,
        MemoryDumpSink,
    },
    event::{
        driver,
        ChannelDriver,
        ChannelDriverHost,
        DriverReply,
    },
    kernel::KernelRegistry,
    runtime::logging,
    SchedulerConfig,
    SchedulerContext,
};
use ::std::{
    sync::Arc,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// How long a test waits for a reply before giving up.
#[allow(dead_code)]
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

//======================================================================================================================
// Structures
//======================================================================================================================

/// A scheduler wired to a loopback driver and an in-memory dump sink.
#[allow(dead_code)]
pub struct Harness {
    pub ctx: Arc<SchedulerContext>,
    pub host: ChannelDriverHost,
    pub sink: MemoryDumpSink,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Harness {
    pub fn new(kernels: KernelRegistry) -> Self {
        Self::with_config(SchedulerConfig::default(), kernels)
    }

    pub fn with_config(config: SchedulerConfig, kernels: KernelRegistry) -> Self {
        logging::initialize("info");
        let (driver, host): (ChannelDriver, ChannelDriverHost) = driver::channel();
        let sink: MemoryDumpSink = MemoryDumpSink::new();
        // SAFETY: tests only map tensors they own.
        let memory: Arc<dyn DeviceMemory> = Arc::new(unsafe { HostMemory::new() });
        let dump_sink: Arc<dyn DumpSink> = Arc::new(sink.clone());
        let ctx: Arc<SchedulerContext> =
            SchedulerContext::new(config, Arc::new(driver), Arc::new(kernels), memory, dump_sink);
        Self { ctx, host, sink }
    }

    /// Next reply sent through the driver, if one arrives in time.
    #[allow(dead_code)]
    pub fn reply(&self) -> Option<DriverReply> {
        self.host.recv_reply(REPLY_TIMEOUT)
    }
}

/// Host address of `buf`, as a device pointer.
#[allow(dead_code)]
pub fn addr_of(buf: &[u8]) -> u64 {
    buf.as_ptr() as u64
}
