//! flowrun - Task-flow runner with a toolbox of named programs and a scheduling daemon

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod executors;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod observer;
pub mod parser;
pub mod schedule;
pub mod scheduler;
pub mod server;
pub mod tokenizer;
pub mod toolbox;
