//! Local analyses shipped with the engine.

pub mod interval;
