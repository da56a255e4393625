//! Caller identity for API requests.
//!
//! The server sits behind a gateway that authenticates users and forwards who they are in
//! headers. The gateway proves itself with a shared token; anything without it is rejected.

use std::collections::BTreeSet;

use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use signoff_core::domain::workflow::{ApproverId, ClientId};
use thiserror::Error;

pub const ACTOR_HEADER: &str = "x-signoff-actor";
pub const TENANTS_HEADER: &str = "x-signoff-tenants";
pub const GATEWAY_TOKEN_HEADER: &str = "x-signoff-gateway-token";

/// Tenant entry granting access to every client.
pub const ALL_TENANTS: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub actor_id: ApproverId,
    tenants: BTreeSet<String>,
}

impl Caller {
    pub fn new(actor_id: ApproverId, tenants: impl IntoIterator<Item = String>) -> Self {
        Self { actor_id, tenants: tenants.into_iter().collect() }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.tenants.contains(ALL_TENANTS)
    }

    /// Global records (no client) are visible to every caller.
    pub fn can_access(&self, client_id: Option<&ClientId>) -> bool {
        match client_id {
            None => true,
            Some(client) => self.is_unrestricted() || self.tenants.contains(&client.0),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("missing or invalid gateway token")]
    InvalidGatewayToken,
    #[error("missing `x-signoff-actor` header")]
    MissingActor,
    #[error("header `{0}` is not valid UTF-8")]
    MalformedHeader(&'static str),
}

pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<Caller, IdentityError>;
}

pub struct HeaderIdentityResolver {
    gateway_token: SecretString,
}

impl HeaderIdentityResolver {
    pub fn new(gateway_token: SecretString) -> Self {
        Self { gateway_token }
    }
}

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<Caller, IdentityError> {
        let presented = header(headers, GATEWAY_TOKEN_HEADER)?.unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), self.gateway_token.expose_secret().as_bytes()) {
            return Err(IdentityError::InvalidGatewayToken);
        }

        let actor = header(headers, ACTOR_HEADER)?
            .map(str::trim)
            .filter(|actor| !actor.is_empty())
            .ok_or(IdentityError::MissingActor)?;

        let tenants = header(headers, TENANTS_HEADER)?
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|tenant| !tenant.is_empty())
            .map(str::to_string);

        Ok(Caller::new(ApproverId(actor.to_string()), tenants))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, IdentityError> {
    headers
        .get(name)
        .map(|value| value.to_str().map_err(|_| IdentityError::MalformedHeader(name)))
        .transpose()
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() || right.is_empty() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
