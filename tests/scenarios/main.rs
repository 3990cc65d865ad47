//! Scenario-based tests for stagerun

#[path = "../helpers.rs"]
mod helpers;

mod batch_queue;
mod chunked_selection;
mod failure_handling;
mod success_chain;
