//! Request-interception agent with a durable response cache and retry queue.
//!
//! Every outgoing request is classified into a traffic class, and the class
//! picks a strategy: cache-first, network-first, passthrough, or
//! deferred-queue. Responses live in versioned store generations that are
//! swapped wholesale on activation; deferred requests wait in a persisted
//! FIFO queue until a sync signal drains them.

pub mod agent;
pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod notify;
pub mod queue;
pub mod stats;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, Interception};
pub use classify::{ClassifierRules, TrafficClass};
pub use config::Config;
pub use error::AgentError;
pub use http::{Request, Response, ResponseSource};
