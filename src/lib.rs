//! device-monitor - shared device telemetry scheduler
//!
//! Polls MikroTik RouterOS and Ubiquiti airOS devices once per host no matter
//! how many viewers watch them, caching the latest snapshot per device class.
//! [`service::MonitorService`] is the entry point; the binary only wires it to
//! configuration and persistence.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod models;
pub mod parsers;
pub mod pool;
pub mod scheduler;
pub mod service;
