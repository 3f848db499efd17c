//! # outbox-rs
//!
//! Transactional outbox relay. Producers enqueue a method invocation in the
//! same database transaction as their business change; relays running in
//! any number of processes claim pending records with an optimistic
//! conditional update, invoke the registered method, and record `SUCCESS`
//! or `FAIL`. Delivery is at-least-once.

pub mod claim;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod reaper;
pub mod registry;
pub mod relay;
pub mod store;
pub mod telemetry;
