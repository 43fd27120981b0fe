use crate::config::UpstreamsConfig;
use crate::errors::FailoverError;
use http::uri::Authority;
use serde::Deserialize;
use std::fmt;

/// One of the two fixed upstream roles a request is duplicated to.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The new backend whose response is preferred
    Primary,
    /// The legacy backend used whenever the primary is unacceptable
    Secondary,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Primary, Role::Secondary];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network address bound to each role.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoints {
    primary: Authority,
    secondary: Authority,
}

impl Endpoints {
    pub fn new(primary: Authority, secondary: Authority) -> Self {
        Self { primary, secondary }
    }

    pub fn get(&self, role: Role) -> &Authority {
        match role {
            Role::Primary => &self.primary,
            Role::Secondary => &self.secondary,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &Authority)> {
        Role::ALL.into_iter().map(|role| (role, self.get(role)))
    }

    /// Number of configured roles; never zero.
    pub fn len(&self) -> usize {
        Role::ALL.len()
    }
}

impl TryFrom<&UpstreamsConfig> for Endpoints {
    type Error = FailoverError;

    fn try_from(config: &UpstreamsConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            primary: parse_authority(Role::Primary, &config.primary)?,
            secondary: parse_authority(Role::Secondary, &config.secondary)?,
        })
    }
}

/// Parses a `host:port` address. Anything carrying a scheme or path is rejected.
pub fn parse_authority(role: Role, address: &str) -> Result<Authority, FailoverError> {
    let authority: Authority = address
        .parse()
        .map_err(|e: http::uri::InvalidUri| FailoverError::InvalidTarget(role, e.to_string()))?;

    if authority.port_u16().is_none() {
        return Err(FailoverError::InvalidTarget(
            role,
            format!("missing port in {address:?}"),
        ));
    }
    if authority.as_str().contains('@') {
        return Err(FailoverError::InvalidTarget(
            role,
            format!("userinfo is not allowed in {address:?}"),
        ));
    }

    Ok(authority)
}
