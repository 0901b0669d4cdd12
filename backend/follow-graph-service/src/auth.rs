//! Caller identity supplied by the authentication layer
//!
//! The follow graph never authenticates anyone itself. Whatever sits in front
//! of it (session cookie check, wallet signature verification) resolves the
//! caller and hands over a [`CallerIdentity`].

use crate::domain::Address;
use crate::error::{FollowGraphError, FollowGraphResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    Anonymous,
    Authenticated {
        address: Address,
        username: Option<String>,
    },
}

impl CallerIdentity {
    pub fn authenticated(address: Address) -> Self {
        CallerIdentity::Authenticated {
            address,
            username: None,
        }
    }

    pub fn with_username(address: Address, username: impl Into<String>) -> Self {
        CallerIdentity::Authenticated {
            address,
            username: Some(username.into()),
        }
    }

    /// Build from an optional address, e.g. a session that may be missing
    pub fn from_session(address: Option<Address>) -> Self {
        match address {
            Some(address) => CallerIdentity::authenticated(address),
            None => CallerIdentity::Anonymous,
        }
    }

    pub fn address(&self) -> Option<&Address> {
        match self {
            CallerIdentity::Anonymous => None,
            CallerIdentity::Authenticated { address, .. } => Some(address),
        }
    }

    /// Address of the caller, or `Unauthenticated` when there is none
    pub fn require_address(&self) -> FollowGraphResult<&Address> {
        self.address().ok_or(FollowGraphError::Unauthenticated)
    }
}
