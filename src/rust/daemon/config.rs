// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    event::timeout::{
        TimeoutPolicy,
        TimeoutSettings,
    },
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        limits::DEFAULT_DUMP_STAGING_BUFFER_SIZE,
    },
};
use ::std::{
    fs,
    ops::Index,
    str::FromStr,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Scheduler options.
mod sched_config {
    pub const SECTION_NAME: &str = "aicpu_sched";
    pub const DEVICE_ID: &str = "device_id";
    pub const WORKER_THREADS: &str = "worker_threads";
    pub const CPU_IDS: &str = "cpu_ids";
    pub const EVENT_WAIT_TIMEOUT_MS: &str = "event_wait_timeout_ms";
    pub const LOOP_TIMEOUT_POLLS: &str = "loop_timeout_polls";
    pub const LOOP_TIMEOUT_POLICY: &str = "loop_timeout_policy";
    pub const OP_WAIT_TIMEOUT_SECS: &str = "op_wait_timeout_secs";
    pub const OP_EXECUTE_TIMEOUT_SECS: &str = "op_execute_timeout_secs";
}

// Dump options.
mod dump_config {
    pub const SECTION_NAME: &str = "dump";
    pub const STAGING_BUFFER_SIZE: &str = "staging_buffer_size";
    pub const DEFAULT_DUMP_PATH: &str = "default_dump_path";
}

// Logging options.
mod logging_config {
    pub const SECTION_NAME: &str = "logging";
    pub const SPEC: &str = "spec";
}

/// Log specification used when the configuration does not name one.
const DEFAULT_LOG_SPEC: &str = "info";

//======================================================================================================================
// Structures
//======================================================================================================================

/// AICPU scheduler configuration file.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// Typed snapshot of the options the scheduler reads at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchedulerConfig {
    pub device_id: u32,
    pub worker_threads: usize,
    /// Cores the workers are pinned to. Empty leaves placement to the OS.
    pub cpu_ids: Vec<usize>,
    pub event_wait_timeout: Duration,
    pub loop_timeout_polls: u64,
    pub loop_timeout_policy: TimeoutPolicy,
    pub op_wait_timeout: Duration,
    pub op_execute_timeout: Duration,
    pub staging_buffer_size: usize,
    pub default_dump_path: String,
    pub log_spec: String,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let config_str: String = match fs::read_to_string(config_path) {
            Ok(s) => s,
            Err(e) => {
                let cause: String = format!("cannot read configuration file {:?} ({})", config_path, e);
                error!("new(): {}", cause);
                return Err(Fail::new(ErrorCode::InitFailed, &cause));
            },
        };
        Self::from_str(&config_str)
    }

    /// Parses configuration text. The first YAML document is used.
    pub fn from_yaml_str(config_str: &str) -> Result<Self, Fail> {
        let mut docs: Vec<Yaml> = match YamlLoader::load_from_str(config_str) {
            Ok(docs) => docs,
            Err(e) => {
                let cause: String = format!("malformed configuration ({})", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::new(ErrorCode::InitFailed, &cause));
            },
        };
        if docs.is_empty() {
            let cause: &str = "empty configuration";
            error!("from_yaml_str(): {}", cause);
            return Err(Fail::new(ErrorCode::InitFailed, cause));
        }
        Ok(Self(docs.swap_remove(0)))
    }

    //==================================================================================================================
    // Scheduler
    //==================================================================================================================

    pub fn device_id(&self) -> Result<u32, Fail> {
        if let Some(device_id) = Self::get_typed_env_option(sched_config::DEVICE_ID)? {
            Ok(device_id)
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::DEVICE_ID)
        }
    }

    pub fn worker_threads(&self) -> Result<usize, Fail> {
        let count: usize = if let Some(count) = Self::get_typed_env_option(sched_config::WORKER_THREADS)? {
            count
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::WORKER_THREADS)?
        };
        if count == 0 {
            let cause: String = format!("parameter \"{}\" must be positive", sched_config::WORKER_THREADS);
            error!("worker_threads(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        Ok(count)
    }

    /// Cores the workers are pinned to. The option may be omitted. The environment override is a comma-separated
    /// list.
    pub fn cpu_ids(&self) -> Result<Vec<usize>, Fail> {
        if let Ok(var) = ::std::env::var(sched_config::CPU_IDS.to_uppercase()) {
            return Self::parse_cpu_list(&var);
        }
        let section: &Yaml = self.get_sched_config()?;
        match section.index(sched_config::CPU_IDS) {
            Yaml::BadValue | Yaml::Null => Ok(Vec::new()),
            Yaml::Array(items) => {
                let mut cpu_ids: Vec<usize> = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_i64().and_then(|id| usize::try_from(id).ok()) {
                        Some(id) => cpu_ids.push(id),
                        None => {
                            let cause: String = format!("parameter \"{}\" has unexpected type", sched_config::CPU_IDS);
                            error!("cpu_ids(): {}", cause);
                            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
                        },
                    }
                }
                Ok(cpu_ids)
            },
            _ => {
                let cause: String = format!("parameter \"{}\" has unexpected type", sched_config::CPU_IDS);
                error!("cpu_ids(): {}", cause);
                Err(Fail::new(ErrorCode::ParameterInvalid, &cause))
            },
        }
    }

    pub fn event_wait_timeout(&self) -> Result<Duration, Fail> {
        let millis: u64 = if let Some(millis) = Self::get_typed_env_option(sched_config::EVENT_WAIT_TIMEOUT_MS)? {
            millis
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::EVENT_WAIT_TIMEOUT_MS)?
        };
        Ok(Duration::from_millis(millis))
    }

    pub fn loop_timeout_polls(&self) -> Result<u64, Fail> {
        if let Some(polls) = Self::get_typed_env_option(sched_config::LOOP_TIMEOUT_POLLS)? {
            Ok(polls)
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::LOOP_TIMEOUT_POLLS)
        }
    }

    pub fn loop_timeout_policy(&self) -> Result<TimeoutPolicy, Fail> {
        if let Some(policy) = Self::get_typed_env_option(sched_config::LOOP_TIMEOUT_POLICY)? {
            Ok(policy)
        } else {
            Self::get_typed_str_option(self.get_sched_config()?, sched_config::LOOP_TIMEOUT_POLICY, |s| {
                TimeoutPolicy::from_str(s).ok()
            })
        }
    }

    pub fn op_wait_timeout(&self) -> Result<Duration, Fail> {
        let secs: u64 = if let Some(secs) = Self::get_typed_env_option(sched_config::OP_WAIT_TIMEOUT_SECS)? {
            secs
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::OP_WAIT_TIMEOUT_SECS)?
        };
        Ok(Duration::from_secs(secs))
    }

    pub fn op_execute_timeout(&self) -> Result<Duration, Fail> {
        let secs: u64 = if let Some(secs) = Self::get_typed_env_option(sched_config::OP_EXECUTE_TIMEOUT_SECS)? {
            secs
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::OP_EXECUTE_TIMEOUT_SECS)?
        };
        Ok(Duration::from_secs(secs))
    }

    //==================================================================================================================
    // Dump
    //==================================================================================================================

    pub fn staging_buffer_size(&self) -> Result<usize, Fail> {
        let size: usize = if let Some(size) = Self::get_typed_env_option(dump_config::STAGING_BUFFER_SIZE)? {
            size
        } else {
            match self.get_dump_config() {
                Ok(section) => Self::get_int_option(section, dump_config::STAGING_BUFFER_SIZE)?,
                Err(_) => DEFAULT_DUMP_STAGING_BUFFER_SIZE,
            }
        };
        if size == 0 {
            let cause: String = format!("parameter \"{}\" must be positive", dump_config::STAGING_BUFFER_SIZE);
            error!("staging_buffer_size(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        Ok(size)
    }

    pub fn default_dump_path(&self) -> Result<String, Fail> {
        if let Some(path) = Self::get_typed_env_option(dump_config::DEFAULT_DUMP_PATH)? {
            Ok(path)
        } else {
            match self.get_dump_config() {
                Ok(section) => Self::get_typed_option(section, dump_config::DEFAULT_DUMP_PATH, |y| {
                    y.as_str().map(str::to_string)
                }),
                Err(_) => Ok(String::from(".")),
            }
        }
    }

    //==================================================================================================================
    // Logging
    //==================================================================================================================

    /// Log specification handed to the logger. Falls back to `info` when the section is absent.
    pub fn log_spec(&self) -> Result<String, Fail> {
        match Self::get_subsection(&self.0, logging_config::SECTION_NAME) {
            Ok(section) => Self::get_typed_option(section, logging_config::SPEC, |y| y.as_str().map(str::to_string)),
            Err(_) => Ok(String::from(DEFAULT_LOG_SPEC)),
        }
    }

    //==================================================================================================================
    // Helpers
    //==================================================================================================================

    fn get_sched_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, sched_config::SECTION_NAME)
    }

    fn get_dump_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, dump_config::SECTION_NAME)
    }

    fn parse_cpu_list(list: &str) -> Result<Vec<usize>, Fail> {
        let mut cpu_ids: Vec<usize> = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.parse::<usize>() {
                Ok(id) => cpu_ids.push(id),
                Err(_) => {
                    let cause: String = format!("parameter {} has unexpected type", sched_config::CPU_IDS);
                    error!("parse_cpu_list(): {}", cause);
                    return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
                },
            }
        }
        Ok(cpu_ids)
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists and is a mapping.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(ErrorCode::ParameterInvalid, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(ErrorCode::ParameterInvalid, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(ErrorCode::ParameterInvalid, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        let option: &Yaml = Self::get_option(yaml, index)?;
        if let Some(value) = option.as_str() {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        Err(Fail::new(ErrorCode::ParameterInvalid, message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().trim().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(ErrorCode::ParameterInvalid, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(ErrorCode::ParameterInvalid, message.as_str()))
            },
        }
    }
}

impl SchedulerConfig {
    /// Reads every option from `config`, failing on the first missing or malformed one.
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        Ok(Self {
            device_id: config.device_id()?,
            worker_threads: config.worker_threads()?,
            cpu_ids: config.cpu_ids()?,
            event_wait_timeout: config.event_wait_timeout()?,
            loop_timeout_polls: config.loop_timeout_polls()?,
            loop_timeout_policy: config.loop_timeout_policy()?,
            op_wait_timeout: config.op_wait_timeout()?,
            op_execute_timeout: config.op_execute_timeout()?,
            staging_buffer_size: config.staging_buffer_size()?,
            default_dump_path: config.default_dump_path()?,
            log_spec: config.log_spec()?,
        })
    }

    /// Initial timeout settings of the dispatch loop.
    pub fn timeout_settings(&self) -> TimeoutSettings {
        TimeoutSettings {
            op_wait_timeout: self.op_wait_timeout,
            op_execute_timeout: self.op_execute_timeout,
            loop_timeout_polls: self.loop_timeout_polls,
            policy: self.loop_timeout_policy,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Config {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml_str(s)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            worker_threads: 1,
            cpu_ids: Vec::new(),
            event_wait_timeout: Duration::from_millis(10),
            loop_timeout_polls: 0,
            loop_timeout_policy: TimeoutPolicy::Advisory,
            op_wait_timeout: Duration::ZERO,
            op_execute_timeout: Duration::ZERO,
            staging_buffer_size: DEFAULT_DUMP_STAGING_BUFFER_SIZE,
            default_dump_path: String::from("."),
            log_spec: String::from(DEFAULT_LOG_SPEC),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
