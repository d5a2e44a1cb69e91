//! Helpers for permission controller code that talks to the Android
//! framework: a bounded dispatcher for binder bound background work,
//! main-thread assertions, permission flag updates, and resolving
//! applications and components from framework objects.
//!
//! Framework objects are modeled as plain Rust types ([`Context`],
//! [`ResolveInfo`]) and the package manager as the [`PackageManager`]
//! trait, so everything here can be exercised on the host.
//!
//! [`PackageManager`]: permission::PackageManager

pub mod component;
pub mod context;
pub mod error;
pub mod ipc;
pub mod main_thread;
pub mod permission;
mod services;

pub use component::{ComponentInfo, ResolveInfo};
pub use context::{Application, Context};
pub use error::{Result, UtilsError};
pub use ipc::{IpcConfig, IpcDispatcher, TaskHandle, IPC_THREAD_POOL_COUNT};
pub use main_thread::{ensure_main_thread, prepare_main_thread, MainThread};
pub use permission::{fold_flag_pairs, FlagUpdate, PermissionFlags, UserHandle};
pub use services::Services;

#[test]
fn test_services_are_send_sync() {
    fn needs_send_sync<T: Send + Sync>() {}
    needs_send_sync::<Services>();
    needs_send_sync::<Context>();
    needs_send_sync::<permission::MemoryPackageManager>();
}
