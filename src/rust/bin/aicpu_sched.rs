// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::aicpu_sched::{
    daemon::{
        session::{
            ChannelSession,
            HostSession,
            SessionMessage,
        },
        Daemon,
    },
    dump::{
        DeviceMemory,
        HostMemory,
    },
    event::{
        driver,
        timeout::TimeoutConfig,
        ChannelDriver,
        ChannelDriverHost,
        ControlMessage,
        ModelCmd,
    },
    runtime::logging,
    Config,
    Fail,
    ModelId,
    SchedulerConfig,
    SchedulerContext,
    StreamId,
};
use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::std::{
    fs,
    io::{
        self,
        BufRead,
    },
    process,
    sync::Arc,
    thread,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Session served on standard input.
const CONSOLE_SESSION_ID: u32 = 0;

//======================================================================================================================
// Program Arguments
//======================================================================================================================

/// Program Arguments
#[derive(Debug)]
pub struct ProgramArguments {
    /// Configuration file.
    config: String,
    /// Overrides the device id of the configuration file.
    device_id: Option<u32>,
    /// Overrides the worker count of the configuration file.
    workers: Option<usize>,
}

/// Associate functions for Program Arguments
impl ProgramArguments {
    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_author: &'static str, app_about: &'static str) -> Self {
        let matches: ArgMatches = Command::new(app_name)
            .author(app_author)
            .about(app_about)
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(true)
                    .value_name("FILE")
                    .help("Sets the configuration file"),
            )
            .arg(
                Arg::new("device-id")
                    .long("device-id")
                    .value_parser(clap::value_parser!(u32))
                    .required(false)
                    .value_name("ID")
                    .help("Overrides the device id"),
            )
            .arg(
                Arg::new("workers")
                    .long("workers")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Overrides the number of worker threads"),
            )
            .get_matches();

        Self {
            config: matches.get_one::<String>("config").cloned().unwrap_or_default(),
            device_id: matches.get_one::<u32>("device-id").copied(),
            workers: matches.get_one::<usize>("workers").copied(),
        }
    }
}

//======================================================================================================================
// Console
//======================================================================================================================

/// Parses one console line into a control request. Blank lines and comments yield `None`.
fn parse_command(line: &str) -> Result<Option<ControlMessage>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let (command, args): (&str, &[&str]) = match words.split_first() {
        None => return Ok(None),
        Some((command, _)) if command.starts_with('#') => return Ok(None),
        Some((command, args)) => (*command, args),
    };
    let arg = |i: usize| -> Result<u32> {
        match args.get(i) {
            Some(word) => Ok(word.parse::<u32>()?),
            None => anyhow::bail!("{}: missing argument {}", command, i + 1),
        }
    };
    let msg: ControlMessage = match command {
        "load" => {
            let path: &str = match args.first() {
                Some(path) => *path,
                None => anyhow::bail!("load: missing model descriptor file"),
            };
            let buf: Vec<u8> = fs::read(path)?;
            let model_id: ModelId = ::aicpu_sched::model::descriptor::ModelInfo::peek_model_id(&buf)?;
            ControlMessage::ModelOperate {
                model_id,
                cmd: ModelCmd::Load(buf),
            }
        },
        "destroy" => ControlMessage::ModelOperate {
            model_id: ModelId::from(arg(0)?),
            cmd: ModelCmd::Destroy,
        },
        "abort" => ControlMessage::ModelOperate {
            model_id: ModelId::from(arg(0)?),
            cmd: ModelCmd::Abort,
        },
        "active" => ControlMessage::ModelOperate {
            model_id: ModelId::from(arg(0)?),
            cmd: ModelCmd::ActiveStream(StreamId::from(arg(1)?)),
        },
        "report" => ControlMessage::TaskReport {
            model_id: ModelId::from(arg(0)?),
        },
        "timeout" => ControlMessage::TimeoutConfig(TimeoutConfig {
            op_wait_timeout_secs: arg(0)?,
            op_execute_timeout_secs: arg(1)?,
        }),
        "dump-load" => match args.first() {
            Some(path) => ControlMessage::DumpLoad(fs::read(path)?),
            None => anyhow::bail!("dump-load: missing op mapping file"),
        },
        "dump" => ControlMessage::DumpData {
            stream_id: arg(0)?,
            task_id: arg(1)?,
        },
        other => anyhow::bail!("unknown command {:?}", other),
    };
    Ok(Some(msg))
}

/// Feeds standard input to `host` until end of file, then closes the session.
fn console_reader(host: Arc<ChannelSession>) {
    for line in io::stdin().lock().lines() {
        let line: String = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("console_reader(): {}", e);
                break;
            },
        };
        match parse_command(&line) {
            Ok(Some(msg)) => {
                if host.send_msg(CONSOLE_SESSION_ID, SessionMessage::Request(msg)).is_err() {
                    return;
                }
            },
            Ok(None) => (),
            Err(e) => eprintln!("error: {}", e),
        }
    }
    if let Err(e) = host.send_msg(CONSOLE_SESSION_ID, SessionMessage::SocketClosed) {
        debug!("console_reader(): {:?}", e);
    }
}

/// Prints the replies the daemon sends to the console.
fn console_writer(host: Arc<ChannelSession>) {
    loop {
        match host.recv_msg(CONSOLE_SESSION_ID) {
            Ok(SessionMessage::Response(summary)) => println!("{:?}", summary),
            Ok(SessionMessage::SocketClosed) | Err(_) => return,
            Ok(SessionMessage::Request(_)) => (),
        }
    }
}

//======================================================================================================================
// Main
//======================================================================================================================

fn run(args: &ProgramArguments) -> Result<(), Fail> {
    let config: Config = Config::new(&args.config)?;
    let mut sched: SchedulerConfig = SchedulerConfig::from_config(&config)?;
    if let Some(device_id) = args.device_id {
        sched.device_id = device_id;
    }
    if let Some(workers) = args.workers {
        sched.worker_threads = workers;
    }
    logging::initialize(&sched.log_spec);
    info!(
        "run(): device_id={} workers={} cpus={:?}",
        sched.device_id, sched.worker_threads, sched.cpu_ids
    );

    // The driver host stays alive for the whole run so that the workers keep polling.
    let (driver, _driver_host): (ChannelDriver, ChannelDriverHost) = driver::channel();
    // SAFETY: op mappings reach this process only through the console of its own operator, who supplies addresses
    // of tensors mapped here.
    let memory: Arc<dyn DeviceMemory> = Arc::new(unsafe { HostMemory::new() });
    let ctx: Arc<SchedulerContext> = SchedulerContext::with_driver(sched, Arc::new(driver), memory);
    let daemon: Daemon = Daemon::start(ctx)?;

    let (host, session): (ChannelSession, ChannelSession) = ChannelSession::pair();
    let host: Arc<ChannelSession> = Arc::new(host);
    let reader_host: Arc<ChannelSession> = host.clone();
    thread::spawn(move || console_reader(reader_host));
    thread::spawn(move || console_writer(host));

    daemon.run_until_closed(&session, CONSOLE_SESSION_ID)
}

fn main() {
    let args: ProgramArguments = ProgramArguments::new(
        "aicpu-sched",
        "Microsoft Corporation",
        "AICPU schedule daemon: loads models and dispatches their streams.",
    );
    if let Err(e) = run(&args) {
        // Logging may not be up yet when the configuration is unusable.
        logging::initialize("info");
        error!("main(): {}", e);
        process::exit(-1);
    }
}
