//! Wayfarer domain logic
//!
//! Pure data structures and policies: buffers, memories, the episode log
//! and the rules that decide when to think.

pub mod aim;
pub mod automemory;
pub mod episodes;
pub mod events;
pub mod pending;
pub mod perception;
pub mod semantic;
pub mod spatial;
pub mod trigger;
