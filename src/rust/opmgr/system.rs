// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::{
        Config,
        OpMgrConfig,
        SchedulerConfig,
    },
    opmgr::{
        kip::KipEndpoint,
        SharedOpMgr,
    },
    runtime::{
        fail::Fail,
        scheduler::SharedScheduler,
    },
};
use ::std::time::Instant;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One processor: a scheduler and the operator manager that runs on it.
pub struct Core {
    pub sched: SharedScheduler,
    pub opmgr: SharedOpMgr,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Core {
    pub fn new(config: &Config) -> Result<Self, Fail> {
        Self::with_configs(SchedulerConfig::from_config(config)?, OpMgrConfig::from_config(config)?)
    }

    /// Builds a core from explicit parameters. The scheduler must exit when idle for [Core::run] to return.
    pub fn with_configs(sched_config: SchedulerConfig, opmgr_config: OpMgrConfig) -> Result<Self, Fail> {
        if sched_config.processor_id != opmgr_config.processor_id {
            let cause: String = format!(
                "scheduler runs on processor {} but operator manager on processor {}",
                sched_config.processor_id, opmgr_config.processor_id
            );
            error!("with_configs(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if !sched_config.exit_when_idle {
            warn!("with_configs(): scheduler of processor {} never returns when idle", sched_config.processor_id);
        }
        let sched: SharedScheduler = SharedScheduler::new(sched_config, Instant::now());
        let opmgr: SharedOpMgr = SharedOpMgr::new(opmgr_config, sched.clone());
        Ok(Self { sched, opmgr })
    }

    pub fn processor_id(&self) -> u8 {
        self.opmgr.processor_id()
    }

    /// Connects a primary core to a secondary core and marks the secondary as started.
    pub fn link(primary: &mut Core, secondary: &mut Core) -> Result<(), Fail> {
        if !primary.opmgr.is_primary() || secondary.opmgr.is_primary() {
            let cause: &str = "link must join the primary processor to a secondary processor";
            error!("link(): {}", cause);
            return Err(Fail::new(libc::EINVAL, cause));
        }
        let (primary_end, secondary_end): (KipEndpoint, KipEndpoint) = KipEndpoint::pair();
        primary.opmgr.attach_kip(primary_end)?;
        secondary.opmgr.attach_kip(secondary_end)?;
        primary.opmgr.set_aux_processor_started(true);
        info!(
            "link(): processor {} linked to processor {}",
            primary.processor_id(),
            secondary.processor_id()
        );
        Ok(())
    }

    /// Moves received frames onto the scheduler and runs it until idle. Returns the amount of work done.
    pub fn run(&mut self) -> Result<usize, Fail> {
        let before: u64 = self.sched.num_dispatched();
        let frames: usize = self.opmgr.pump_kip()?;
        self.sched.sched();
        let dispatched: u64 = self.sched.num_dispatched() - before;
        Ok(frames + dispatched as usize)
    }

    /// Runs every core in turn until a full pass does no work.
    pub fn run_until_idle(cores: &mut [&mut Core]) -> Result<(), Fail> {
        loop {
            let mut work: usize = 0;
            for core in cores.iter_mut() {
                work += core.run()?;
            }
            if work == 0 {
                return Ok(());
            }
        }
    }

    /// Drops every operator, task and pending request of this core.
    pub fn shutdown(&mut self) {
        self.opmgr.shutdown();
        self.sched.shutdown();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
