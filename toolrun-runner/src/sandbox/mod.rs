//! Process sandboxing
//!
//! Environment filtering, working directory and access posture
//! ([`SandboxPolicy`]) plus kernel resource limits ([`ProcessLimits`]).

mod limits;
mod policy;

pub use limits::{ProcessLimits, ResourceLimits, parse_memory_limit};
pub use policy::{FilesystemAccess, NetworkAccess, SandboxPolicy, is_sensitive};
