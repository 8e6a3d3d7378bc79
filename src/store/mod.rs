//! Relational store for orders, workflows, checkpoints and protocol results.
//!
//! Every mutual-exclusion guarantee in the crate is expressed as a condition
//! on a single SQL statement here; nothing holds an in-process lock across
//! calls.

pub mod db;
pub mod models;

pub use db::{DbHandle, PipelineDb};
pub use models::*;
