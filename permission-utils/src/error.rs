use thiserror::Error;

#[derive(Error, Debug)]
pub enum UtilsError {
    #[error("Operation only supported from the main thread: {0}")]
    NonMainThread(String),

    #[error("The main thread has already been prepared")]
    MainThreadAlreadyPrepared,

    #[error("Missing ComponentInfo!")]
    MissingComponentInfo,

    #[error("No Application reachable from context: {0}")]
    NoApplication(String),

    #[error("The IPC dispatcher has been shut down")]
    DispatcherShutDown,

    #[error("IPC task panicked: {0}")]
    TaskPanicked(String),

    #[error("IPC task was dropped before it could run")]
    TaskDropped,

    #[error("Failed to spawn IPC worker thread")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Unknown permission {permission} for package {package}")]
    UnknownPermission { permission: String, package: String },
}

pub type Result<T> = std::result::Result<T, UtilsError>;

// XXX: a panic payload is an opaque `Box<dyn Any>`, in practice it's either
// a `&'static str` or a `String` from `panic!` formatting
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
