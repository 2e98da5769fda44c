#![doc = include_str!("../README.md")]

pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod fcfs;
pub mod heuristics;
pub mod metrics;
pub mod oracle;
pub mod placeholder;
pub mod simulation;
pub mod task;
pub mod workflow;
