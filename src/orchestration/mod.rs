//! Pool and cycle orchestration.
//!
//! [`pool::AgentPool`] tracks every agent, their relationships and usage;
//! [`coordinator::CycleCoordinator`] drives the coordinate / work / evaluate
//! loop on top of it, persisting progress through [`state_files`].

pub mod coordinator;
pub mod decision;
pub mod pool;
pub mod prompts;
pub mod relationships;
pub mod state_files;
pub mod types;
pub mod usage_ledger;
pub mod vcs;
