use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use bitflags::bitflags;

use crate::error::{Result, UtilsError};

bitflags! {
    /// Per package, per user permission flags
    ///
    /// See [PackageManager.FLAG_PERMISSION_*](https://developer.android.com/reference/android/content/pm/PackageManager)
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PermissionFlags: u32 {
        const USER_SET = 1 << 0;
        const USER_FIXED = 1 << 1;
        const POLICY_FIXED = 1 << 2;
        const REVOKE_ON_UPGRADE = 1 << 3;
        const SYSTEM_FIXED = 1 << 4;
        const GRANTED_BY_DEFAULT = 1 << 5;
        const REVIEW_REQUIRED = 1 << 6;
        const REVOKE_WHEN_REQUESTED = 1 << 7;
        const USER_SENSITIVE_WHEN_GRANTED = 1 << 8;
        const USER_SENSITIVE_WHEN_DENIED = 1 << 9;
        const RESTRICTION_INSTALLER_EXEMPT = 1 << 11;
        const RESTRICTION_SYSTEM_EXEMPT = 1 << 12;
        const RESTRICTION_UPGRADE_EXEMPT = 1 << 13;
        const APPLY_RESTRICTION = 1 << 14;
        const GRANTED_BY_ROLE = 1 << 15;
        const ONE_TIME = 1 << 16;
        const AUTO_REVOKED = 1 << 17;
        const SELECTED_LOCATION_ACCURACY = 1 << 19;

        /// Same bit as `REVOKE_ON_UPGRADE`, used for runtime permissions of
        /// apps targeting pre-M SDKs
        const REVOKED_COMPAT = Self::REVOKE_ON_UPGRADE.bits();
    }
}

/// A user (profile) on the device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserHandle(u32);

impl UserHandle {
    pub const SYSTEM: UserHandle = UserHandle(0);

    pub fn of(user_id: u32) -> Self {
        Self(user_id)
    }

    pub fn identifier(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserHandle{{{}}}", self.0)
    }
}

/// The `(flagMask, flagValues)` arguments of a permission flag update
///
/// Bits set in `mask` are updated to their state in `value`, all other bits
/// are left untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub mask: PermissionFlags,
    pub value: PermissionFlags,
}

impl FlagUpdate {
    /// Applies this update to `current`
    pub fn apply(&self, current: PermissionFlags) -> PermissionFlags {
        // Raw bits so that flags unknown to this crate survive the update
        PermissionFlags::from_bits_retain(
            (current.bits() & !self.mask.bits()) | (self.value.bits() & self.mask.bits()),
        )
    }
}

/// Folds `(flag, set)` pairs into a [`FlagUpdate`]
///
/// Every flag ends up in the mask; only the flags paired with `true` end up
/// in the value. An empty slice yields an update that changes nothing.
pub fn fold_flag_pairs(flags: &[(PermissionFlags, bool)]) -> FlagUpdate {
    flags
        .iter()
        .fold(FlagUpdate::default(), |mut update, &(flag, set)| {
            update.mask |= flag;
            if set {
                update.value |= flag;
            }
            update
        })
}

/// The parts of the platform package manager that deal with permission flags
pub trait PackageManager {
    fn permission_flags(
        &self,
        permission_name: &str,
        package_name: &str,
        user: UserHandle,
    ) -> Result<PermissionFlags>;

    fn update_permission_flags(
        &self,
        permission_name: &str,
        package_name: &str,
        mask: PermissionFlags,
        value: PermissionFlags,
        user: UserHandle,
    ) -> Result<()>;
}

pub trait PackageManagerExt: PackageManager {
    /// A more readable version of [`PackageManager::update_permission_flags()`]
    ///
    /// ```
    /// # use permission_utils::permission::*;
    /// let pm = MemoryPackageManager::new();
    /// pm.add_permission("android.permission.CAMERA", "com.example", UserHandle::SYSTEM);
    /// pm.update_permission_flag_pairs(
    ///     "android.permission.CAMERA",
    ///     "com.example",
    ///     UserHandle::SYSTEM,
    ///     &[(PermissionFlags::USER_SET, true), (PermissionFlags::ONE_TIME, false)],
    /// )
    /// .unwrap();
    /// ```
    fn update_permission_flag_pairs(
        &self,
        permission_name: &str,
        package_name: &str,
        user: UserHandle,
        flags: &[(PermissionFlags, bool)],
    ) -> Result<()> {
        let update = fold_flag_pairs(flags);
        log::trace!(
            "Updating {permission_name} flags for {package_name} ({user}): mask={:?} value={:?}",
            update.mask,
            update.value
        );
        self.update_permission_flags(
            permission_name,
            package_name,
            update.mask,
            update.value,
            user,
        )
    }
}

impl<T: PackageManager + ?Sized> PackageManagerExt for T {}

type FlagKey = (UserHandle, String, String);

/// A thread safe, in-memory [`PackageManager`]
///
/// Permissions have to be declared with [`MemoryPackageManager::add_permission()`]
/// before their flags can be queried or updated.
#[derive(Debug, Default)]
pub struct MemoryPackageManager {
    flags: RwLock<HashMap<FlagKey, PermissionFlags>>,
}

impl MemoryPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `permission_name` for `package_name`, with no flags set
    pub fn add_permission(&self, permission_name: &str, package_name: &str, user: UserHandle) {
        self.flags
            .write()
            .unwrap()
            .entry(Self::key(permission_name, package_name, user))
            .or_default();
    }

    fn key(permission_name: &str, package_name: &str, user: UserHandle) -> FlagKey {
        (user, package_name.to_string(), permission_name.to_string())
    }

    fn unknown(permission_name: &str, package_name: &str) -> UtilsError {
        UtilsError::UnknownPermission {
            permission: permission_name.to_string(),
            package: package_name.to_string(),
        }
    }
}

impl PackageManager for MemoryPackageManager {
    fn permission_flags(
        &self,
        permission_name: &str,
        package_name: &str,
        user: UserHandle,
    ) -> Result<PermissionFlags> {
        self.flags
            .read()
            .unwrap()
            .get(&Self::key(permission_name, package_name, user))
            .copied()
            .ok_or_else(|| Self::unknown(permission_name, package_name))
    }

    fn update_permission_flags(
        &self,
        permission_name: &str,
        package_name: &str,
        mask: PermissionFlags,
        value: PermissionFlags,
        user: UserHandle,
    ) -> Result<()> {
        let mut guard = self.flags.write().unwrap();
        let Some(flags) = guard.get_mut(&Self::key(permission_name, package_name, user)) else {
            return Err(Self::unknown(permission_name, package_name));
        };
        *flags = FlagUpdate { mask, value }.apply(*flags);
        Ok(())
    }
}
