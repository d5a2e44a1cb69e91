use std::sync::Arc;

use crate::error::Result;
use crate::ipc::{IpcConfig, IpcDispatcher, TaskHandle};
use crate::main_thread::MainThread;
use crate::permission::{PackageManager, PackageManagerExt, PermissionFlags, UserHandle};

/// The process level resources shared by the permission helpers
///
/// Construct this once, on the main thread, and hand out clones to whatever
/// needs to dispatch IPC work or assert it's on the main thread. All clones
/// share the same [`IpcDispatcher`].
#[derive(Clone, Debug)]
pub struct Services {
    main_thread: MainThread,
    ipc: Arc<IpcDispatcher>,
}

impl Services {
    /// Creates the services with the calling thread as the main thread
    pub fn new(config: IpcConfig) -> Result<Self> {
        Self::with_main_thread(MainThread::current(), config)
    }

    pub fn with_main_thread(main_thread: MainThread, config: IpcConfig) -> Result<Self> {
        Ok(Self {
            main_thread,
            ipc: Arc::new(IpcDispatcher::new(config)?),
        })
    }

    pub fn main_thread(&self) -> MainThread {
        self.main_thread
    }

    pub fn ipc(&self) -> &Arc<IpcDispatcher> {
        &self.ipc
    }

    /// Assert that an operation is running on the main thread
    #[track_caller]
    pub fn ensure_main_thread(&self) {
        self.main_thread.ensure();
    }

    /// Runs a permission flag update on the IPC dispatcher
    pub fn update_permission_flags_async<P>(
        &self,
        package_manager: Arc<P>,
        permission_name: impl Into<String>,
        package_name: impl Into<String>,
        user: UserHandle,
        flags: Vec<(PermissionFlags, bool)>,
    ) -> Result<TaskHandle<Result<()>>>
    where
        P: PackageManager + Send + Sync + ?Sized + 'static,
    {
        let permission_name = permission_name.into();
        let package_name = package_name.into();
        self.ipc.submit(move || {
            package_manager.update_permission_flag_pairs(&permission_name, &package_name, user, &flags)
        })
    }

    /// Queries the flags of a permission for several users in parallel
    ///
    /// This is the typical workload the dispatcher's small pool exists for:
    /// one binder call per profile. Results are in the same order as `users`.
    pub fn permission_flags_for_users<P>(
        &self,
        package_manager: Arc<P>,
        permission_name: &str,
        package_name: &str,
        users: &[UserHandle],
    ) -> Result<Vec<Result<PermissionFlags>>>
    where
        P: PackageManager + Send + Sync + ?Sized + 'static,
    {
        let handles = users
            .iter()
            .map(|&user| {
                let package_manager = package_manager.clone();
                let permission_name = permission_name.to_string();
                let package_name = package_name.to_string();
                self.ipc.submit(move || {
                    package_manager.permission_flags(&permission_name, &package_name, user)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(handles
            .into_iter()
            .map(|handle| handle.join().and_then(|flags| flags))
            .collect())
    }

    /// Shuts down the shared [`IpcDispatcher`], see [`IpcDispatcher::shutdown()`]
    pub fn shutdown(&self) {
        self.ipc.shutdown();
    }
}
