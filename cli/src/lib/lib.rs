//! Library half of the `cosmo` binary: argument parsing support, file/stdin
//! input handling, error reporting, and the REPL loop. Split from
//! `main.rs` so each piece can be exercised without going through the
//! actual process entry point.

pub mod commands;
pub mod common;
pub mod cosmo;
pub mod repl;
