//! Authentication results handed over by the (external) authentication subsystem.
//!
//! The ticket core treats these as opaque, serializable facts: who was authenticated,
//! which handlers succeeded or failed, and when.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::Service;

/// Multi-valued attribute map.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Authentication attribute flagging a long-term ("remember me") session.
pub const REMEMBER_ME_ATTRIBUTE: &str = "rememberMe";

/// An authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_default().push(value.into());
        self
    }
}

/// Why a handler failed to authenticate a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationFailure {
    pub reason: String,
    /// The attempt was blocked outright (e.g. the handler's backend refused to run it).
    #[serde(default)]
    pub prevented: bool,
}

/// Outcome of authenticating one or more credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub principal: Principal,
    #[serde(default)]
    pub attributes: Attributes,
    pub authenticated_at: DateTime<Utc>,
    /// Identifiers of every presented credential.
    #[serde(default)]
    pub credentials: Vec<String>,
    /// Handler name -> credential it validated.
    #[serde(default)]
    pub successes: BTreeMap<String, String>,
    /// Handler name -> failure.
    #[serde(default)]
    pub failures: BTreeMap<String, AuthenticationFailure>,
}

impl Authentication {
    pub fn new(principal: Principal, authenticated_at: DateTime<Utc>) -> Self {
        Self {
            principal,
            attributes: Attributes::new(),
            authenticated_at,
            credentials: Vec::new(),
            successes: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Record a credential that `handler` validated.
    pub fn with_success(mut self, handler: impl Into<String>, credential: impl Into<String>) -> Self {
        let credential = credential.into();
        self.credentials.push(credential.clone());
        self.successes.insert(handler.into(), credential);
        self
    }

    /// Record a credential that `handler` rejected.
    pub fn with_failure(
        mut self,
        handler: impl Into<String>,
        credential: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.credentials.push(credential.into());
        self.failures.insert(
            handler.into(),
            AuthenticationFailure {
                reason: reason.into(),
                prevented: false,
            },
        );
        self
    }

    /// Record a credential whose authentication was prevented from running.
    pub fn with_prevented_failure(
        mut self,
        handler: impl Into<String>,
        credential: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.credentials.push(credential.into());
        self.failures.insert(
            handler.into(),
            AuthenticationFailure {
                reason: reason.into(),
                prevented: true,
            },
        );
        self
    }

    /// Record a credential that was presented but never attempted.
    pub fn with_unattempted_credential(mut self, credential: impl Into<String>) -> Self {
        self.credentials.push(credential.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with_remember_me(self, remember_me: bool) -> Self {
        self.with_attribute(REMEMBER_ME_ATTRIBUTE, remember_me.to_string())
    }

    pub fn principal_id(&self) -> &str {
        &self.principal.id
    }

    /// Whether the subject asked for a long-term session.
    pub fn is_remember_me(&self) -> bool {
        self.attributes
            .get(REMEMBER_ME_ATTRIBUTE)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case("true")))
    }

    /// Every presented credential was either validated or rejected by some handler.
    pub fn all_credentials_attempted(&self) -> bool {
        self.successes.len() + self.failures.len() == self.credentials.len()
    }
}

/// Authentication handed to the ticket core, optionally bound to the requesting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub authentication: Authentication,
    #[serde(default)]
    pub service: Option<Service>,
    /// Credentials were presented for this request (as opposed to SSO reuse).
    #[serde(default)]
    pub credential_provided: bool,
}

impl AuthenticationResult {
    pub fn new(authentication: Authentication) -> Self {
        Self {
            authentication,
            service: None,
            credential_provided: true,
        }
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_credential_provided(mut self, provided: bool) -> Self {
        self.credential_provided = provided;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_me_flag_is_read_from_attributes() {
        let authn = Authentication::new(Principal::new("alice"), Utc::now());
        assert!(!authn.is_remember_me());
        assert!(authn.with_remember_me(true).is_remember_me());
    }

    #[test]
    fn attempted_credentials_are_counted() {
        let authn = Authentication::new(Principal::new("alice"), Utc::now())
            .with_success("ldap", "alice/password")
            .with_failure("otp", "alice/otp", "bad code");
        assert!(authn.all_credentials_attempted());

        let authn = authn.with_unattempted_credential("alice/x509");
        assert!(!authn.all_credentials_attempted());
    }
}
