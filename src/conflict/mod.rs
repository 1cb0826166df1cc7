//! Conflict detection and resolution

pub mod strategy;

pub use strategy::{detect_conflict, resolve, ConflictOutcome, ConflictRecord, ConflictSide, ConflictStrategy};

// vim: ts=4
