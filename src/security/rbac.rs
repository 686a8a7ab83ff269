//! Role→permission mapping and resource-access checks. Grounded on the
//! teacher's `RolesGuard` (role-list match → 403 on miss) but expressed as a
//! static lookup table plus an explicit `check_resource_access` function
//! rather than a generic `Guard` trait, since this gateway has exactly one
//! identity type.

use crate::models::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ChatRead,
    ChatWrite,
    ChatDelete,
    ProjectRead,
    ProjectWrite,
    ProjectDelete,
    AdminManage,
    AdminUsers,
    AdminConfig,
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::ChatRead,
    Permission::ChatWrite,
    Permission::ChatDelete,
    Permission::ProjectRead,
    Permission::ProjectWrite,
    Permission::ProjectDelete,
    Permission::AdminManage,
    Permission::AdminUsers,
    Permission::AdminConfig,
];

const USER_PERMISSIONS: &[Permission] = &[
    Permission::ChatRead,
    Permission::ChatWrite,
    Permission::ChatDelete,
    Permission::ProjectRead,
    Permission::ProjectWrite,
];

const READONLY_PERMISSIONS: &[Permission] = &[Permission::ChatRead, Permission::ProjectRead];

fn permissions_for(role: UserRole) -> &'static [Permission] {
    match role {
        UserRole::Admin => ADMIN_PERMISSIONS,
        UserRole::User => USER_PERMISSIONS,
        UserRole::Readonly => READONLY_PERMISSIONS,
    }
}

pub fn has_permission(role: UserRole, permission: Permission) -> bool {
    permissions_for(role).contains(&permission)
}

pub fn has_role(role: UserRole, required: &[UserRole]) -> bool {
    required.contains(&role)
}

/// Admits admins unconditionally; otherwise requires both ownership of the
/// resource (when the resource carries an owner) and the corresponding
/// permission. Resources with no recorded owner (e.g. global tool listings)
/// fall back to a permission-only check, per the resolved Open Question on
/// resource-ownership discipline (see DESIGN.md).
pub fn check_resource_access(
    actor_role: UserRole,
    actor_user_id: &str,
    resource_owner_id: Option<&str>,
    permission: Permission,
) -> bool {
    if actor_role == UserRole::Admin {
        return true;
    }
    let owns_resource = match resource_owner_id {
        Some(owner) => owner == actor_user_id,
        None => true,
    };
    owns_resource && has_permission(actor_role, permission)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_bypasses_ownership() {
        assert!(check_resource_access(UserRole::Admin, "admin-1", Some("someone-else"), Permission::ChatDelete));
    }

    #[test]
    fn user_denied_on_other_owner_resource() {
        assert!(!check_resource_access(UserRole::User, "u1", Some("u2"), Permission::ChatRead));
    }

    #[test]
    fn user_allowed_on_own_resource() {
        assert!(check_resource_access(UserRole::User, "u1", Some("u1"), Permission::ChatWrite));
    }

    #[test]
    fn readonly_denied_write_permission() {
        assert!(!has_permission(UserRole::Readonly, Permission::ChatWrite));
    }

    #[test]
    fn ownerless_resource_falls_back_to_permission_only() {
        assert!(check_resource_access(UserRole::User, "u1", None, Permission::ProjectRead));
    }
}
