//! Core type definitions for Wayfarer

pub mod behavior;
pub mod geometry;
pub mod snapshot;
