//! Keeper that drives infra markets through their lifecycle: it follows
//! market events and deadlines and submits escape, close, declare and sweep
//! transactions through a single nonce-ordered queue.

pub mod config;
pub mod contracts;
pub mod controller;
pub mod events;
pub mod heartbeat;
pub mod keeper;
pub mod ledger;
pub mod queue;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;
