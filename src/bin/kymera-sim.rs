// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgAction,
    ArgMatches,
    Command,
};
use ::kymera::{
    opmgr::{
        capability::{
            CAP_ID_BASIC_PASSTHROUGH,
            PASSTHROUGH_MSG_GET_FRAMES,
            PASSTHROUGH_MSG_SET_GAIN,
        },
        ConnectionId,
        CreateKeyValue,
        CreateResult,
        ExtOpId,
        ListResult,
        MessageResult,
        Status,
        OPERATOR_CREATE_KEY_PROCESSOR_ID,
    },
    runtime::logging,
    Config,
    Core,
    OpMgrConfig,
    SchedulerConfig,
    SharedOpMgr,
};
use ::log::warn;
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Client id the simulator issues commands as.
const SIM_CLIENT_ID: u8 = 0x08;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Debug)]
pub struct ProgramArguments {
    config_path: Option<String>,
    num_ops: usize,
    num_kicks: usize,
    dual_core: bool,
}

struct Application {
    cores: Vec<Core>,
    con_id: ConnectionId,
}

type Slot<T> = Rc<RefCell<Option<T>>>;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ProgramArguments {
    const DEFAULT_NUM_OPS: usize = 4;
    const DEFAULT_NUM_KICKS: usize = 3;

    pub fn new() -> Result<Self> {
        let matches: ArgMatches = Command::new("kymera-sim")
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets the YAML configuration file"),
            )
            .arg(
                Arg::new("ops")
                    .long("ops")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets the number of operators to create"),
            )
            .arg(
                Arg::new("kicks")
                    .long("kicks")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets the number of processing rounds"),
            )
            .arg(
                Arg::new("dual")
                    .long("dual")
                    .action(ArgAction::SetTrue)
                    .help("Runs a primary and a secondary core"),
            )
            .get_matches();

        let num_ops: usize = matches
            .get_one::<usize>("ops")
            .copied()
            .unwrap_or(Self::DEFAULT_NUM_OPS);
        if num_ops == 0 {
            anyhow::bail!("at least one operator is required");
        }

        Ok(Self {
            config_path: matches.get_one::<String>("config").cloned(),
            num_ops,
            num_kicks: matches
                .get_one::<usize>("kicks")
                .copied()
                .unwrap_or(Self::DEFAULT_NUM_KICKS),
            dual_core: matches.get_flag("dual"),
        })
    }
}

impl Application {
    pub fn new(args: &ProgramArguments) -> Result<Self> {
        let (sched_config, mut opmgr_config): (SchedulerConfig, OpMgrConfig) = match &args.config_path {
            Some(path) => {
                let config: Config = Config::new(path)?;
                (SchedulerConfig::from_config(&config)?, OpMgrConfig::from_config(&config)?)
            },
            None => (SchedulerConfig::default(), OpMgrConfig::default()),
        };

        let mut cores: Vec<Core> = Vec::new();
        if args.dual_core {
            opmgr_config.num_processors = opmgr_config.num_processors.max(2);
            let secondary_sched: SchedulerConfig = SchedulerConfig {
                processor_id: 1,
                ..sched_config.clone()
            };
            let secondary_opmgr: OpMgrConfig = OpMgrConfig {
                processor_id: 1,
                ..opmgr_config.clone()
            };
            let mut primary: Core = Core::with_configs(sched_config, opmgr_config)?;
            let mut secondary: Core = Core::with_configs(secondary_sched, secondary_opmgr)?;
            Core::link(&mut primary, &mut secondary)?;
            cores.push(primary);
            cores.push(secondary);
        } else {
            cores.push(Core::with_configs(sched_config, opmgr_config)?);
        }

        Ok(Self {
            cores,
            con_id: ConnectionId::from_client(SIM_CLIENT_ID),
        })
    }

    pub fn run(&mut self, args: &ProgramArguments) -> Result<()> {
        let num_cores: usize = self.cores.len();
        let mut ops: Vec<ExtOpId> = Vec::new();
        for i in 0..args.num_ops {
            let processor_id: u8 = (i % num_cores) as u8;
            let op_id: ExtOpId = self.create(processor_id)?;
            println!("created {:?} on processor {}", op_id, processor_id);
            ops.push(op_id);
        }

        for (i, op_id) in ops.iter().enumerate() {
            let params: [u16; 2] = [PASSTHROUGH_MSG_SET_GAIN, (i + 1) as u16];
            let result: MessageResult = self.message(*op_id, &params)?;
            if result.status != Status::Ok {
                anyhow::bail!("set gain of {:?} failed: {:?}", op_id, result.status);
            }
        }

        let result: ListResult = self.list(&ops, |opmgr, con_id, ops, callback| {
            opmgr.start_operator(con_id, ops, callback)
        })?;
        println!("start: {:?} ({} of {})", result.status, result.count, ops.len());

        for _ in 0..args.num_kicks {
            for op_id in ops.iter() {
                let processor_id: usize = self.processor_of(*op_id);
                if let Err(e) = self.cores[processor_id].opmgr.kick_operator(*op_id) {
                    warn!("run(): kick of {:?} failed: {:?}", op_id, e);
                }
            }
            self.run_until_idle()?;
        }

        for op_id in ops.iter() {
            let result: MessageResult = self.message(*op_id, &[PASSTHROUGH_MSG_GET_FRAMES])?;
            match result.response.as_slice() {
                [PASSTHROUGH_MSG_GET_FRAMES, low, high] => {
                    let frames: u32 = (*low as u32) | ((*high as u32) << 16);
                    println!("{:?}: {} frames", op_id, frames);
                },
                other => warn!("run(): unexpected response from {:?}: {:?}", op_id, other),
            }
        }

        let result: ListResult = self.list(&ops, |opmgr, con_id, ops, callback| {
            opmgr.stop_operator(con_id, ops, callback)
        })?;
        println!("stop: {:?} ({} of {})", result.status, result.count, ops.len());

        let result: ListResult = self.list(&ops, |opmgr, con_id, ops, callback| {
            opmgr.destroy_operator(con_id, ops, callback)
        })?;
        println!("destroy: {:?} ({} of {})", result.status, result.count, ops.len());

        for core in self.cores.iter_mut() {
            core.shutdown();
        }
        Ok(())
    }

    fn create(&mut self, processor_id: u8) -> Result<ExtOpId> {
        let slot: Slot<CreateResult> = Rc::new(RefCell::new(None));
        let sink: Slot<CreateResult> = slot.clone();
        let keys: [CreateKeyValue; 1] = [CreateKeyValue::new(OPERATOR_CREATE_KEY_PROCESSOR_ID, processor_id as u32)];
        self.cores[0].opmgr.create_operator_ex(
            self.con_id,
            CAP_ID_BASIC_PASSTHROUGH,
            None,
            &keys,
            Box::new(move |_opmgr: &mut SharedOpMgr, result: CreateResult| {
                *sink.borrow_mut() = Some(result);
            }),
        );
        self.run_until_idle()?;
        let result: Option<CreateResult> = slot.borrow_mut().take();
        match result {
            Some(result) if result.status == Status::Ok => Ok(result.op_id),
            Some(result) => anyhow::bail!("create failed: {:?}", result.status),
            None => anyhow::bail!("create did not complete"),
        }
    }

    fn message(&mut self, op_id: ExtOpId, params: &[u16]) -> Result<MessageResult> {
        let slot: Slot<MessageResult> = Rc::new(RefCell::new(None));
        let sink: Slot<MessageResult> = slot.clone();
        self.cores[0].opmgr.operator_message(
            self.con_id,
            op_id,
            params,
            Box::new(move |_opmgr: &mut SharedOpMgr, result: MessageResult| {
                *sink.borrow_mut() = Some(result);
            }),
        );
        self.run_until_idle()?;
        let result: Option<MessageResult> = slot.borrow_mut().take();
        match result {
            Some(result) => Ok(result),
            None => anyhow::bail!("operator message to {:?} did not complete", op_id),
        }
    }

    fn list<F>(&mut self, ops: &[ExtOpId], issue: F) -> Result<ListResult>
    where
        F: FnOnce(&mut SharedOpMgr, ConnectionId, &[ExtOpId], Box<dyn FnOnce(&mut SharedOpMgr, ListResult)>),
    {
        let slot: Slot<ListResult> = Rc::new(RefCell::new(None));
        let sink: Slot<ListResult> = slot.clone();
        issue(
            &mut self.cores[0].opmgr,
            self.con_id,
            ops,
            Box::new(move |_opmgr: &mut SharedOpMgr, result: ListResult| {
                *sink.borrow_mut() = Some(result);
            }),
        );
        self.run_until_idle()?;
        let result: Option<ListResult> = slot.borrow_mut().take();
        match result {
            Some(result) => Ok(result),
            None => anyhow::bail!("list command did not complete"),
        }
    }

    fn processor_of(&self, op_id: ExtOpId) -> usize {
        let processor_id: u8 = self.cores[0]
            .opmgr
            .registry()
            .get_processor_id_from_opid(op_id.to_int())
            .unwrap_or(0);
        (processor_id as usize).min(self.cores.len() - 1)
    }

    fn run_until_idle(&mut self) -> Result<()> {
        let mut cores: Vec<&mut Core> = self.cores.iter_mut().collect();
        Core::run_until_idle(&mut cores)?;
        Ok(())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn main() -> Result<()> {
    logging::initialize();
    let args: ProgramArguments = ProgramArguments::new()?;
    let mut app: Application = Application::new(&args)?;
    app.run(&args)
}
