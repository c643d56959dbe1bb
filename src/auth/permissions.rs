use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnProfile,
    EditOwnProfile,
    EnrollSelf,
    ViewOwnNotifications,

    ViewOwnGroupMembers,
    RemoveGroupMembers,

    ViewAllGroupMembers,
    ManageGroups,
    ManageSchedule,
    RegisterUsers,
    EditUserRoles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Role {
    Client,
    Coach,
    Admin,
}

static CLIENT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProfile);
    permissions.insert(Permission::EditOwnProfile);
    permissions.insert(Permission::EnrollSelf);
    permissions.insert(Permission::ViewOwnNotifications);

    permissions
});

static COACH_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(CLIENT_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ViewOwnGroupMembers);
    permissions.insert(Permission::RemoveGroupMembers);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(COACH_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ViewAllGroupMembers);
    permissions.insert(Permission::ManageGroups);
    permissions.insert(Permission::ManageSchedule);
    permissions.insert(Permission::RegisterUsers);
    permissions.insert(Permission::EditUserRoles);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Client => &CLIENT_PERMISSIONS,
            Role::Coach => &COACH_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Client => "client",
            Role::Coach => "coach",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "client" => Ok(Role::Client),
            "coach" => Ok(Role::Coach),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Coach => write!(f, "coach"),
            Role::Admin => write!(f, "admin"),
        }
    }
}
