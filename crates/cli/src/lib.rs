//! `comfyflow` command-line front end.
//!
//! Argument definitions live in [`cli`], command execution in
//! [`commands`]. The binary entrypoint lives in `main.rs`.

pub mod cli;
pub mod commands;
