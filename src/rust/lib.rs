// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod opmgr;
pub mod runtime;

pub use self::{
    config::{
        Config,
        OpMgrConfig,
        SchedulerConfig,
    },
    opmgr::{
        system::Core,
        OpMgr,
        SharedOpMgr,
    },
    runtime::{
        fail::Fail,
        scheduler::{
            Priority,
            SharedScheduler,
            TaskId,
        },
    },
};

/// Ensures that two expressions are equal, bailing out of the enclosing `anyhow` function otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the enclosing `anyhow` function otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}
