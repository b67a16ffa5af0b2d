//! Core modules of the update task engine.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod lock;
pub mod progress;
pub mod resolver;
pub mod runner;
pub mod schemas;
pub mod task;
pub mod time;
