//! Command line runner for the stream watcher.
//!
//! The binary is a thin shell: configuration loading, logging setup, signal
//! handling and an optional read-only health endpoint around
//! [`watcher::Orchestrator`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod health;
pub mod logging;
