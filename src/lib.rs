//! Quorum Oracle
//!
//! Multi-validator price consensus engine. Independent validators submit
//! periodic price observations per asset; the engine aggregates each round's
//! buffer into a median consensus, guards commits with a deviation circuit
//! breaker, maintains a trailing TWAP, detects staleness, and falls back to
//! an external reference feed when the primary signal goes quiet.

pub mod audit;
pub mod auth;
pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod fallback;
pub mod types;

pub use consensus::ConsensusEngine;
