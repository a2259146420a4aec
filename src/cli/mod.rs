//! Command implementations for the `presence-hall` binary.

mod commands;
mod duration;

pub(crate) use commands::{
    cmd_alive, cmd_gc, cmd_list, cmd_register, cmd_stats, cmd_unregister, load_config,
    ConfigOverrides,
};
pub(crate) use duration::parse_duration;
