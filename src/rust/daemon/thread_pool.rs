// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    daemon::SchedulerContext,
    event::AicpuEventManager,
    runtime::fail::{
        ErrorCode,
        Fail,
    },
};
use ::std::{
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Times a worker moves itself back onto the configured cores before giving up.
const MAX_REPIN_ATTEMPTS: usize = 3;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Fixed set of worker threads, each running its own dispatch loop.
pub struct ThreadPool {
    ctx: Arc<SchedulerContext>,
    workers: Vec<JoinHandle<Result<(), Fail>>>,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Restricts the calling thread to `cpus`. An empty set is a no-op.
pub fn bind_current_thread(cpus: &[usize]) -> Result<(), Fail> {
    if cpus.is_empty() {
        return Ok(());
    }
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            // SAFETY: `set` is a plain bit mask initialised by CPU_ZERO and only touched through the libc helpers.
            let ret: libc::c_int = unsafe {
                let mut set: libc::cpu_set_t = ::std::mem::zeroed();
                libc::CPU_ZERO(&mut set);
                for cpu in cpus {
                    if *cpu >= libc::CPU_SETSIZE as usize {
                        let cause: String = format!("cpu id out of range (cpu={})", cpu);
                        error!("bind_current_thread(): {}", cause);
                        return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
                    }
                    libc::CPU_SET(*cpu, &mut set);
                }
                libc::sched_setaffinity(0, ::std::mem::size_of::<libc::cpu_set_t>(), &set)
            };
            if ret != 0 {
                let cause: String = format!(
                    "sched_setaffinity failed (cpus={:?}, error={})",
                    cpus,
                    ::std::io::Error::last_os_error()
                );
                error!("bind_current_thread(): {}", cause);
                return Err(Fail::new(ErrorCode::InitFailed, &cause));
            }
            Ok(())
        } else {
            debug!("bind_current_thread(): thread pinning not supported on this platform (cpus={:?})", cpus);
            Ok(())
        }
    }
}

/// Body of one worker thread.
fn worker_main(ctx: Arc<SchedulerContext>, index: usize) -> Result<(), Fail> {
    let cpu_ids: Vec<usize> = ctx.config().cpu_ids.clone();
    if !cpu_ids.is_empty() {
        bind_current_thread(&[cpu_ids[index % cpu_ids.len()]])?;
    }

    let mut manager: AicpuEventManager = AicpuEventManager::new(ctx.clone(), index);
    let mut repins: usize = 0;
    loop {
        match manager.run() {
            Ok(()) => return Ok(()),
            Err(e) if e.code == ErrorCode::RunInIllegalCpu && repins < MAX_REPIN_ATTEMPTS => {
                repins += 1;
                warn!(
                    "worker_main(): moving worker back to its cores (thread={}, cpus={:?}, attempt={})",
                    index, cpu_ids, repins
                );
                bind_current_thread(&cpu_ids)?;
            },
            Err(e) => {
                error!("worker_main(): worker exited (thread={}, error={:?})", index, e);
                return Err(e);
            },
        }
    }
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ThreadPool {
    /// Spawns `worker_threads` workers.
    pub fn start(ctx: Arc<SchedulerContext>) -> Result<Self, Fail> {
        let count: usize = ctx.config().worker_threads;
        let mut pool: Self = Self {
            ctx: ctx.clone(),
            workers: Vec::with_capacity(count),
        };
        for index in 0..count {
            let worker_ctx: Arc<SchedulerContext> = ctx.clone();
            let spawned: ::std::io::Result<JoinHandle<Result<(), Fail>>> = thread::Builder::new()
                .name(format!("aicpu-worker-{}", index))
                .spawn(move || worker_main(worker_ctx, index));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    let cause: String = format!("cannot spawn worker (thread={}, error={})", index, e);
                    error!("start(): {}", cause);
                    if let Err(e) = pool.stop() {
                        warn!("start(): {:?}", e);
                    }
                    return Err(Fail::new(ErrorCode::InitFailed, &cause));
                },
            }
        }
        info!("start(): {} worker(s) running", count);
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Raises the stop flag and joins every worker. Returns the first worker failure.
    pub fn stop(&mut self) -> Result<(), Fail> {
        self.ctx.stop();
        let mut first_error: Option<Fail> = None;
        for (index, handle) in self.workers.drain(..).enumerate() {
            match handle.join() {
                Ok(Ok(())) => (),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                },
                Err(_) => {
                    let cause: String = format!("worker panicked (thread={})", index);
                    error!("stop(): {}", cause);
                    first_error.get_or_insert(Fail::new(ErrorCode::InitFailed, &cause));
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            if let Err(e) = self.stop() {
                warn!("drop(): {:?}", e);
            }
        }
    }
}
