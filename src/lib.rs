//! Hatch: an interpreter for block-based visual scripting projects.
//!
//! A project is compiled per target into scripts bound to hats, registered
//! with a [`Scheduler`], and run as concurrent tokio tasks by the [`Vm`].

use std::sync::{Mutex, MutexGuard};

pub mod audio;
pub mod compiler;
pub mod config;
pub mod costume;
pub mod environment;
pub mod error;
pub mod hat;
pub mod input;
pub mod opcode;
pub mod project;
pub mod scheduler;
pub mod scope;
pub mod script;
pub mod target;
pub mod value;
pub mod vm;

pub use config::{RuntimeConfig, StopMode};
pub use environment::Environment;
pub use error::{HatchError, HatchResult};
pub use hat::{EventPayload, Hat, HatKind, KeyIndex};
pub use project::{ArchiveAssets, AssetSource, MemoryAssets, ProjectJson};
pub use scheduler::{action, Action, Scheduler, TaskRegistry};
pub use target::Target;
pub use value::Value;
pub use vm::Vm;

/// Locks `m`, recovering the data if a panicking holder poisoned it. Every
/// guarded value here is plain data that stays valid across a panic.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
