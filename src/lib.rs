//! Shop catalog → Google Shopping (Atom) and Meta catalog (RSS) product feeds.
//!
//! The pipeline is fetch ([`catalog`]) → build ([`model`]) → map
//! ([`mapping`]) → write and publish ([`feed`]), driven by
//! [`orchestrator::RunContext`].

pub mod catalog;
pub mod config;
pub mod feed;
pub mod mapping;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod util;
