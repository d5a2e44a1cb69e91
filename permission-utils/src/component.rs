use crate::error::{Result, UtilsError};

/// Common description of an activity, service or content provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentInfo {
    pub package_name: String,
    pub name: String,
    pub exported: bool,
    pub enabled: bool,
}

impl ComponentInfo {
    pub fn new(package_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            name: name.into(),
            exported: false,
            enabled: true,
        }
    }

    /// `package/class`, with the package prefix of the class shortened to `.`
    pub fn flatten_to_short_string(&self) -> String {
        match self.name.strip_prefix(self.package_name.as_str()) {
            Some(rest) if rest.starts_with('.') => format!("{}/{}", self.package_name, rest),
            _ => format!("{}/{}", self.package_name, self.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityInfo {
    pub info: ComponentInfo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    pub info: ComponentInfo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInfo {
    pub info: ComponentInfo,
    pub authority: Option<String>,
}

/// The result of resolving an intent against the installed packages
///
/// Exactly one of the three components is expected to be set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveInfo {
    pub activity_info: Option<ActivityInfo>,
    pub service_info: Option<ServiceInfo>,
    pub provider_info: Option<ProviderInfo>,
}

impl ResolveInfo {
    pub fn activity(info: ComponentInfo) -> Self {
        Self {
            activity_info: Some(ActivityInfo { info }),
            ..Default::default()
        }
    }

    pub fn service(info: ComponentInfo) -> Self {
        Self {
            service_info: Some(ServiceInfo { info }),
            ..Default::default()
        }
    }

    pub fn provider(info: ComponentInfo, authority: Option<String>) -> Self {
        Self {
            provider_info: Some(ProviderInfo { info, authority }),
            ..Default::default()
        }
    }

    /// Gets the [`ComponentInfo`] of whichever component was resolved
    ///
    /// Fails with [`UtilsError::MissingComponentInfo`] if none is set.
    pub fn component_info(&self) -> Result<&ComponentInfo> {
        self.activity_info
            .as_ref()
            .map(|activity| &activity.info)
            .or_else(|| self.service_info.as_ref().map(|service| &service.info))
            .or_else(|| self.provider_info.as_ref().map(|provider| &provider.info))
            .ok_or(UtilsError::MissingComponentInfo)
    }
}
