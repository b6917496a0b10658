//! Permission levels, roles and their wire codes

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Discrete access level on a folder or datasource.
///
/// The numeric codes are what the remote API stores. They look like bit
/// flags but are never combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PermissionLevel {
    Read = 1,
    Write = 2,
    Admin = 4,
}

impl PermissionLevel {
    /// Wire code (1, 2 or 4)
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code. Anything other than 1, 2 or 4 is rejected.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            4 => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PermissionLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for PermissionLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u64::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid permission code {code}")))
    }
}

/// Access role an external identity group is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    ReadOnly,
    ReadWrite,
    Admin,
}

impl Role {
    /// Resolution order used by reconciliation
    pub const ALL: [Role; 3] = [Role::ReadOnly, Role::ReadWrite, Role::Admin];

    /// Fixed, total role -> level mapping
    #[inline]
    pub const fn level(self) -> PermissionLevel {
        match self {
            Role::ReadOnly => PermissionLevel::Read,
            Role::ReadWrite => PermissionLevel::Write,
            Role::Admin => PermissionLevel::Admin,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::ReadOnly => "readonly",
            Role::ReadWrite => "readwrite",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
