use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a field device
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl DeviceId {
    /// Prefix under which every object of this device is stored
    pub fn object_prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DeviceId {
    fn from(id: i64) -> Self {
        DeviceId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// The caller on whose behalf an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: i64,
    pub role: Role,
}

impl Principal {
    pub fn admin(uid: i64) -> Self {
        Self {
            uid,
            role: Role::Admin,
        }
    }

    pub fn user(uid: i64) -> Self {
        Self {
            uid,
            role: Role::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Kind of access an operation needs on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Display for Access {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

/// Permission level stored on a device-user binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    R,
    W,
    Rw,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::R => "r",
            PermissionLevel::W => "w",
            PermissionLevel::Rw => "rw",
        }
    }

    pub fn allows(&self, access: Access) -> bool {
        matches!(
            (self, access),
            (PermissionLevel::R | PermissionLevel::Rw, Access::Read)
                | (PermissionLevel::W | PermissionLevel::Rw, Access::Write)
        )
    }
}

impl Default for PermissionLevel {
    fn default() -> Self {
        PermissionLevel::Rw
    }
}

impl FromStr for PermissionLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "r" => Ok(PermissionLevel::R),
            "w" => Ok(PermissionLevel::W),
            "rw" => Ok(PermissionLevel::Rw),
            _ => Err(anyhow::anyhow!("Invalid permission level: {}", s)),
        }
    }
}

impl Display for PermissionLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Device-user authorization relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub uid: i64,
    pub dev_id: DeviceId,
    pub permission_level: PermissionLevel,
    pub is_active: bool,
}
