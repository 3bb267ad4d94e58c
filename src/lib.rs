//! Gradewatch Library
//!
//! Core engine for watching a school portal on behalf of registered users
//! and messaging each one the grades that are new since the last check.

pub mod config;
pub mod diff;
pub mod messaging;
pub mod parser;
pub mod portal;
pub mod scheduler;
pub mod setup;
pub mod storage;
pub mod types;

pub use types::*;
