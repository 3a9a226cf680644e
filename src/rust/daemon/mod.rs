// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Scheduler process: shared context, worker threads and the host session loop.

pub mod config;
pub mod session;
pub mod thread_pool;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    daemon::{
        config::SchedulerConfig,
        session::{
            HostSession,
            SessionMessage,
        },
        thread_pool::ThreadPool,
    },
    dump::{
        DeviceMemory,
        DumpSink,
        FileDumpSink,
        OpDumpTaskManager,
    },
    event::{
        driver::EventDriver,
        timeout::{
            TimeoutConfig,
            TimeoutSettings,
        },
        AicpuEventProcess,
        EventSummary,
    },
    event_wait::EventWaitManager,
    kernel::KernelRegistry,
    model::{
        AicpuModelManager,
        ModelServices,
        StreamActivation,
    },
    runtime::fail::Fail,
};
use ::crossbeam_channel::Receiver;
use ::parking_lot::{
    RwLock,
    RwLockWriteGuard,
};
use ::std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Everything the dispatch loops share. One instance per scheduler process.
pub struct SchedulerContext {
    config: SchedulerConfig,
    models: AicpuModelManager,
    dumps: OpDumpTaskManager,
    waits: Arc<EventWaitManager>,
    kernels: Arc<KernelRegistry>,
    driver: Arc<dyn EventDriver>,
    timeouts: RwLock<TimeoutSettings>,
    activations: Receiver<StreamActivation>,
    stop: AtomicBool,
}

/// A running scheduler: the context plus its worker threads.
pub struct Daemon {
    ctx: Arc<SchedulerContext>,
    pool: ThreadPool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SchedulerContext {
    pub fn new(
        config: SchedulerConfig,
        driver: Arc<dyn EventDriver>,
        kernels: Arc<KernelRegistry>,
        memory: Arc<dyn DeviceMemory>,
        sink: Arc<dyn DumpSink>,
    ) -> Arc<Self> {
        let (activation_tx, activation_rx) = ::crossbeam_channel::unbounded();
        let waits: Arc<EventWaitManager> = Arc::new(EventWaitManager::new());
        let services: ModelServices = ModelServices {
            kernels: kernels.clone(),
            waits: waits.clone(),
            activations: activation_tx,
        };
        let timeouts: TimeoutSettings = config.timeout_settings();
        Arc::new(Self {
            models: AicpuModelManager::new(services),
            dumps: OpDumpTaskManager::new(memory, sink, config.staging_buffer_size),
            waits,
            kernels,
            driver,
            timeouts: RwLock::new(timeouts),
            activations: activation_rx,
            stop: AtomicBool::new(false),
            config,
        })
    }

    /// Context with the built-in kernels and file dumps under `default_dump_path`.
    pub fn with_driver(
        config: SchedulerConfig,
        driver: Arc<dyn EventDriver>,
        memory: Arc<dyn DeviceMemory>,
    ) -> Arc<Self> {
        let sink: Arc<dyn DumpSink> = Arc::new(FileDumpSink::new(&config.default_dump_path));
        Self::new(config, driver, Arc::new(KernelRegistry::with_builtins()), memory, sink)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn models(&self) -> &AicpuModelManager {
        &self.models
    }

    pub fn dumps(&self) -> &OpDumpTaskManager {
        &self.dumps
    }

    pub fn waits(&self) -> &EventWaitManager {
        &self.waits
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn driver(&self) -> &dyn EventDriver {
        self.driver.as_ref()
    }

    /// Snapshot of the current timeout settings.
    pub fn timeouts(&self) -> TimeoutSettings {
        *self.timeouts.read()
    }

    pub fn apply_timeout_config(&self, config: TimeoutConfig) {
        let mut timeouts: RwLockWriteGuard<TimeoutSettings> = self.timeouts.write();
        timeouts.apply(config);
        info!(
            "apply_timeout_config(): op_wait_timeout={:?} op_execute_timeout={:?}",
            timeouts.op_wait_timeout, timeouts.op_execute_timeout
        );
    }

    pub fn activations(&self) -> &Receiver<StreamActivation> {
        &self.activations
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl Daemon {
    /// Spawns the worker threads.
    pub fn start(ctx: Arc<SchedulerContext>) -> Result<Self, Fail> {
        let pool: ThreadPool = ThreadPool::start(ctx.clone())?;
        Ok(Self { ctx, pool })
    }

    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.ctx
    }

    /// Serves control requests from the host until the session closes, then stops the workers.
    pub fn run_until_closed(mut self, session: &dyn HostSession, session_id: u32) -> Result<(), Fail> {
        let process: AicpuEventProcess = AicpuEventProcess::new(self.ctx.clone());
        info!("run_until_closed(): serving session {}", session_id);
        loop {
            match session.recv_msg(session_id) {
                Ok(SessionMessage::Request(msg)) => {
                    let summary: EventSummary = process.process_control(msg);
                    if let Err(e) = session.send_msg(session_id, SessionMessage::Response(summary)) {
                        warn!("run_until_closed(): reply lost ({:?})", e);
                    }
                },
                Ok(SessionMessage::Response(summary)) => {
                    warn!("run_until_closed(): unexpected response from host ({:?})", summary);
                },
                Ok(SessionMessage::SocketClosed) => {
                    info!("run_until_closed(): session {} closed", session_id);
                    break;
                },
                Err(e) => {
                    error!("run_until_closed(): session {} failed ({:?})", session_id, e);
                    break;
                },
            }
        }
        self.shutdown_pool()
    }

    /// Stops the workers without waiting for the host.
    pub fn shutdown(mut self) -> Result<(), Fail> {
        self.shutdown_pool()
    }

    fn shutdown_pool(&mut self) -> Result<(), Fail> {
        let result: Result<(), Fail> = self.pool.stop();
        info!("shutdown(): {} model(s) still loaded", self.ctx.models().model_count());
        result
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
