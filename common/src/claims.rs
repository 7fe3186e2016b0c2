use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::Id;

/// Scopes carried by a verified JWT claim, checked by handlers before they
/// touch the store. Mirrors the principle that authorization is a concern
/// of the (out of scope) HTTP API layer, but the scope vocabulary the core
/// understands lives here so every crate agrees on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Scope {
    ProjectRead,
    ProjectWrite,
    ServiceRead,
    ServiceWrite,
    DeploymentRead,
    DeploymentWrite,
    Admin,
}

/// The principal identity the (out of scope) control-plane API hands the
/// core: `{principal, organization}` plus the scopes that were granted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub principal: Id,
    pub organization: Id,
    pub scopes: Vec<Scope>,
}

impl Claim {
    pub fn has(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope) || self.scopes.contains(&Scope::Admin)
    }
}
