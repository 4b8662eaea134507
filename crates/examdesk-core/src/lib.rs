//! examdesk-core — Exam session engine.
//!
//! This crate holds the data model, collaborator traits and the client-side
//! session engine: attendance lifecycle, countdown, answer synchronisation,
//! matching answers and score aggregation.

pub mod attendance;
pub mod controller;
pub mod countdown;
pub mod error;
pub mod grading;
pub mod matching;
pub mod model;
pub mod paper;
pub mod report;
pub mod scoring;
pub mod sync_queue;
pub mod traits;

#[cfg(test)]
mod testing;
