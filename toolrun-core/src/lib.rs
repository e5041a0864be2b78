//! Toolrun Core
//!
//! Core types shared by the toolrun execution engine, scheduler and CLI.
//!
//! This crate contains:
//! - Domain types: script descriptors, jobs and their state machine,
//!   execution results and the error taxonomy
//! - DTOs: read-only views used for status and statistics reporting

pub mod domain;
pub mod dto;
