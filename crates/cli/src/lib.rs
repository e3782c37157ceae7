//! umbra-cli: argument parsing and command execution.

pub mod commands;
