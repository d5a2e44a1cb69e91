use std::sync::Arc;

use crate::error::{Result, UtilsError};

/// The process's application object
///
/// Cheap to clone; clones compare equal to each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Application {
    inner: Arc<ApplicationInner>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct ApplicationInner {
    package_name: String,
}

impl Application {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ApplicationInner {
                package_name: package_name.into(),
            }),
        }
    }

    pub fn package_name(&self) -> &str {
        &self.inner.package_name
    }
}

/// The kinds of context the framework hands out
///
/// Activities and services always know the application that owns them,
/// wrappers delegate to the context they wrap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Context {
    Application(Application),
    Activity {
        name: String,
        application: Application,
    },
    Service {
        name: String,
        application: Application,
    },
    Wrapper(Box<Context>),
    /// Any other context, which may or may not expose an application context
    Other {
        description: String,
        application_context: Option<Application>,
    },
}

impl Context {
    /// Wraps this context, like a `ContextWrapper` with this as its base
    pub fn wrap(self) -> Self {
        Context::Wrapper(Box::new(self))
    }

    /// Gets the [`Application`] instance from this context
    ///
    /// Wrapper chains are walked down to their base context. Fails with
    /// [`UtilsError::NoApplication`] if the chain ends in a context without an
    /// application context.
    pub fn application(&self) -> Result<&Application> {
        let mut context = self;
        loop {
            match context {
                Context::Application(application) => return Ok(application),
                Context::Activity { application, .. } | Context::Service { application, .. } => {
                    return Ok(application)
                }
                Context::Wrapper(base) => context = base.as_ref(),
                Context::Other {
                    description,
                    application_context,
                } => {
                    return application_context
                        .as_ref()
                        .ok_or_else(|| UtilsError::NoApplication(description.clone()))
                }
            }
        }
    }
}

impl From<Application> for Context {
    fn from(application: Application) -> Self {
        Context::Application(application)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Application {
        Application::new("com.android.permissioncontroller")
    }

    #[test]
    fn test_application_resolves_to_itself() {
        let application = app();
        let context = Context::from(application.clone());
        assert_eq!(context.application().unwrap(), &application);
    }

    #[test]
    fn test_activity_and_service() {
        let application = app();
        let activity = Context::Activity {
            name: "ManagePermissionsActivity".into(),
            application: application.clone(),
        };
        let service = Context::Service {
            name: "PermissionControllerServiceImpl".into(),
            application: application.clone(),
        };
        assert_eq!(activity.application().unwrap(), &application);
        assert_eq!(service.application().unwrap(), &application);
    }

    #[test]
    fn test_nested_wrappers() {
        let application = app();
        let context = Context::from(application.clone()).wrap().wrap().wrap();
        assert_eq!(
            context.application().unwrap().package_name(),
            "com.android.permissioncontroller"
        );
        assert_eq!(context.application().unwrap(), &application);
    }

    #[test]
    fn test_deep_wrapper_chain_does_not_overflow() {
        let mut context = Context::Activity {
            name: "GrantPermissionsActivity".into(),
            application: app(),
        };
        for _ in 0..1_000 {
            context = context.wrap();
        }
        assert!(context.application().is_ok());
    }

    #[test]
    fn test_other_context() {
        let application = app();
        let with_app = Context::Other {
            description: "ContextImpl".into(),
            application_context: Some(application.clone()),
        }
        .wrap();
        assert_eq!(with_app.application().unwrap(), &application);

        let without_app = Context::Other {
            description: "ContextImpl".into(),
            application_context: None,
        }
        .wrap();
        match without_app.application() {
            Err(UtilsError::NoApplication(desc)) => assert_eq!(desc, "ContextImpl"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
