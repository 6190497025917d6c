// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Platform options. These apply to every component of a core.
mod platform_config {
    pub const SECTION_NAME: &str = "kymera";
    // Processor this core runs on. Processor zero is the primary core.
    pub const PROCESSOR_ID: &str = "processor_id";
    // Number of processors in the system.
    pub const NUM_PROCESSORS: &str = "num_processors";
}

// Scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    pub const MAX_MESSAGES: &str = "max_messages";
    pub const TASK_POOL_CAPACITY: &str = "task_pool_capacity";
    pub const EXIT_WHEN_IDLE: &str = "exit_when_idle";
}

// Operator manager options.
mod opmgr_config {
    pub const SECTION_NAME: &str = "opmgr";
    pub const NUM_AGGREGATES: &str = "num_aggregates";
    pub const AGGREGATE_QUEUE_DEPTH: &str = "aggregate_queue_depth";
    pub const THREAD_OFFLOAD: &str = "thread_offload";
    pub const MAX_OPID: &str = "max_opid";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Kymera configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// Scheduler parameters of one core.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub processor_id: u8,
    /// Bound on queued messages plus raised bg-ints. Exceeding it is fatal.
    pub max_messages: usize,
    /// Number of task blocks available to the dynamic task factory.
    pub task_pool_capacity: usize,
    /// Return from the scheduler loop when there is no work and no timer pending.
    pub exit_when_idle: bool,
}

/// Operator manager parameters of one core.
#[derive(Clone, Debug)]
pub struct OpMgrConfig {
    pub processor_id: u8,
    pub num_processors: usize,
    /// Number of command aggregates that may be in flight at once.
    pub num_aggregates: usize,
    /// Number of list commands that may wait for a free aggregate. Zero rejects them immediately.
    pub aggregate_queue_depth: usize,
    /// Create operators aimed at a secondary core that has not started on the primary core instead.
    pub thread_offload: bool,
    /// Largest internal operator identifier.
    pub max_opid: u16,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Common associated functions for Kymera configuration object.
impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_str(&config_s)
    }

    /// Parses a configuration from a YAML document.
    pub fn from_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = YamlLoader::load_from_str(config_s)?;
        let config_obj: &Yaml = match &config[..] {
            [c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };
        Ok(Self(config_obj.clone()))
    }

    /// Platform config: Reads the processor identifier of this core.
    pub fn processor_id(&self) -> Result<u8, Fail> {
        let processor_id: u8 = self.get_int(
            platform_config::SECTION_NAME,
            platform_config::PROCESSOR_ID,
            0,
        )?;
        if processor_id as usize >= limits::MAX_PROCESSORS {
            let message: String = format!("parameter \"{}\" is out of range", platform_config::PROCESSOR_ID);
            return Err(Fail::new(libc::ERANGE, &message));
        }
        Ok(processor_id)
    }

    /// Platform config: Reads the number of processors in the system.
    pub fn num_processors(&self) -> Result<usize, Fail> {
        let num_processors: usize = self.get_int(
            platform_config::SECTION_NAME,
            platform_config::NUM_PROCESSORS,
            1,
        )?;
        if num_processors == 0 || num_processors > limits::MAX_PROCESSORS {
            let message: String = format!("parameter \"{}\" is out of range", platform_config::NUM_PROCESSORS);
            return Err(Fail::new(libc::ERANGE, &message));
        }
        Ok(num_processors)
    }

    /// Scheduler config: Reads the bound on outstanding messages.
    pub fn max_messages(&self) -> Result<usize, Fail> {
        self.get_int(
            scheduler_config::SECTION_NAME,
            scheduler_config::MAX_MESSAGES,
            limits::DEFAULT_MAX_MESSAGES,
        )
    }

    /// Scheduler config: Reads the number of task blocks.
    pub fn task_pool_capacity(&self) -> Result<usize, Fail> {
        self.get_int(
            scheduler_config::SECTION_NAME,
            scheduler_config::TASK_POOL_CAPACITY,
            limits::DEFAULT_TASK_POOL_CAPACITY,
        )
    }

    /// Scheduler config: Reads whether the scheduler loop returns when idle.
    pub fn exit_when_idle(&self) -> Result<bool, Fail> {
        self.get_bool(scheduler_config::SECTION_NAME, scheduler_config::EXIT_WHEN_IDLE, true)
    }

    /// Operator manager config: Reads the number of concurrently in-flight aggregates.
    pub fn num_aggregates(&self) -> Result<usize, Fail> {
        let num_aggregates: usize = self.get_int(
            opmgr_config::SECTION_NAME,
            opmgr_config::NUM_AGGREGATES,
            limits::DEFAULT_NUM_AGGREGATES,
        )?;
        if num_aggregates == 0 || num_aggregates > limits::MAX_AGGREGATES {
            let message: String = format!("parameter \"{}\" is out of range", opmgr_config::NUM_AGGREGATES);
            return Err(Fail::new(libc::ERANGE, &message));
        }
        Ok(num_aggregates)
    }

    /// Operator manager config: Reads how many list commands may wait for an aggregate.
    pub fn aggregate_queue_depth(&self) -> Result<usize, Fail> {
        self.get_int(opmgr_config::SECTION_NAME, opmgr_config::AGGREGATE_QUEUE_DEPTH, 0)
    }

    /// Operator manager config: Reads whether thread offload is enabled.
    pub fn thread_offload(&self) -> Result<bool, Fail> {
        self.get_bool(opmgr_config::SECTION_NAME, opmgr_config::THREAD_OFFLOAD, false)
    }

    /// Operator manager config: Reads the largest internal operator identifier.
    pub fn max_opid(&self) -> Result<u16, Fail> {
        let max_opid: u16 = self.get_int(opmgr_config::SECTION_NAME, opmgr_config::MAX_OPID, limits::MAX_OPID)?;
        if max_opid == 0 || max_opid > limits::MAX_OPID {
            let message: String = format!("parameter \"{}\" is out of range", opmgr_config::MAX_OPID);
            return Err(Fail::new(libc::ERANGE, &message));
        }
        Ok(max_opid)
    }

    /// Reads an integer option. The environment overrides the configuration file, which overrides `default`.
    fn get_int<T: TryFrom<i64> + FromStr>(&self, section: &str, index: &str, default: T) -> Result<T, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(value);
        }
        match self.get_section_option(section, index)? {
            Some(yaml) => Self::get_int_option(yaml, index),
            None => Ok(default),
        }
    }

    /// Reads a boolean option. The environment overrides the configuration file, which overrides `default`.
    fn get_bool(&self, section: &str, index: &str, default: bool) -> Result<bool, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(value);
        }
        match self.get_section_option(section, index)? {
            Some(yaml) => Self::get_bool_option(yaml, index),
            None => Ok(default),
        }
    }

    /// Finds option `index` of `section`. A missing section or option is not an error.
    fn get_section_option(&self, section: &str, index: &str) -> Result<Option<&Yaml>, Fail> {
        let yaml: &Yaml = self.0.index(section);
        match yaml {
            Yaml::BadValue | Yaml::Null => return Ok(None),
            Yaml::Hash(_) => (),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", section);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            },
        };
        match yaml.index(index) {
            Yaml::BadValue => Ok(None),
            value => Ok(Some(value)),
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        // Check for the environment variable.
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Verifies that `yaml` is an integer and that the destination type may hold its value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = match yaml.as_i64() {
            Some(val) => val,
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            },
        };
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        match yaml.as_bool() {
            Some(val) => Ok(val),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        Ok(Self {
            processor_id: config.processor_id()?,
            max_messages: config.max_messages()?,
            task_pool_capacity: config.task_pool_capacity()?,
            exit_when_idle: config.exit_when_idle()?,
        })
    }
}

impl OpMgrConfig {
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        let processor_id: u8 = config.processor_id()?;
        let num_processors: usize = config.num_processors()?;
        if processor_id as usize >= num_processors {
            let cause: String = format!(
                "processor_id {} is not below num_processors {}",
                processor_id, num_processors
            );
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(Self {
            processor_id,
            num_processors,
            num_aggregates: config.num_aggregates()?,
            aggregate_queue_depth: config.aggregate_queue_depth()?,
            thread_offload: config.thread_offload()?,
            max_opid: config.max_opid()?,
        })
    }

    /// Whether this core runs on the primary processor.
    pub fn is_primary(&self) -> bool {
        self.processor_id == 0
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            processor_id: 0,
            max_messages: limits::DEFAULT_MAX_MESSAGES,
            task_pool_capacity: limits::DEFAULT_TASK_POOL_CAPACITY,
            exit_when_idle: true,
        }
    }
}

impl Default for OpMgrConfig {
    fn default() -> Self {
        Self {
            processor_id: 0,
            num_processors: 1,
            num_aggregates: limits::DEFAULT_NUM_AGGREGATES,
            aggregate_queue_depth: 0,
            thread_offload: false,
            max_opid: limits::MAX_OPID,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
