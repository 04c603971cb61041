use serde::{Deserialize, Serialize};

use crate::UserId;

/// Role of the calling user, as resolved by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A customer placing orders.
    Client,
    /// Staff of a fulfilling store.
    Store,
    /// A delivery courier.
    Courier,
    /// Back-office administrator.
    Admin,
}

impl Role {
    /// Returns the role name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Store => "store",
            Role::Courier => "courier",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "store" => Ok(Role::Store),
            "courier" => Ok(Role::Courier),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// The authenticated caller of a core operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn client(id: UserId) -> Self {
        Self::new(id, Role::Client)
    }

    pub fn courier(id: UserId) -> Self {
        Self::new(id, Role::Courier)
    }
}
