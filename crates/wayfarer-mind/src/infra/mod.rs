//! Infrastructure
//!
//! Local implementations of collaborator contracts.

pub mod bus;
pub mod embedding;
pub mod runner;
