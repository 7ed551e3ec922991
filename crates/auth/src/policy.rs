//! Contextual authentication policies.
//!
//! A policy decides whether an [`Authentication`] is good enough to open a session or to
//! be used for a particular service.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ticketeer_core::{Authentication, RegisteredService, Service};

/// The service an authentication is being evaluated for.
#[derive(Debug, Clone, Copy)]
pub struct ServiceContext<'a> {
    pub service: &'a Service,
    pub registered_service: Option<&'a RegisteredService>,
}

impl<'a> ServiceContext<'a> {
    pub fn new(service: &'a Service, registered_service: Option<&'a RegisteredService>) -> Self {
        Self {
            service,
            registered_service,
        }
    }
}

pub trait AuthenticationPolicy: Send + Sync + core::fmt::Debug {
    fn name(&self) -> &str;

    fn is_satisfied_by(&self, authentication: &Authentication, context: Option<&ServiceContext<'_>>)
    -> bool;
}

impl<P> AuthenticationPolicy for Arc<P>
where
    P: AuthenticationPolicy + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_satisfied_by(
        &self,
        authentication: &Authentication,
        context: Option<&ServiceContext<'_>>,
    ) -> bool {
        (**self).is_satisfied_by(authentication, context)
    }
}

/// Satisfied by anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyAuthenticationPolicy;

impl AuthenticationPolicy for AcceptAnyAuthenticationPolicy {
    fn name(&self) -> &str {
        "accept_any"
    }

    fn is_satisfied_by(&self, _: &Authentication, _: Option<&ServiceContext<'_>>) -> bool {
        true
    }
}

/// At least one credential was validated.
///
/// With `try_all`, every presented credential must also have been attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyCredentialSucceededPolicy {
    pub try_all: bool,
}

impl AuthenticationPolicy for AnyCredentialSucceededPolicy {
    fn name(&self) -> &str {
        "any_credential_succeeded"
    }

    fn is_satisfied_by(&self, authentication: &Authentication, _: Option<&ServiceContext<'_>>) -> bool {
        if self.try_all && !authentication.all_credentials_attempted() {
            return false;
        }
        !authentication.successes.is_empty()
    }
}

/// Every presented credential was validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllCredentialsSucceededPolicy;

impl AuthenticationPolicy for AllCredentialsSucceededPolicy {
    fn name(&self) -> &str {
        "all_credentials_succeeded"
    }

    fn is_satisfied_by(&self, authentication: &Authentication, _: Option<&ServiceContext<'_>>) -> bool {
        !authentication.credentials.is_empty()
            && authentication.failures.is_empty()
            && authentication.successes.len() == authentication.credentials.len()
    }
}

/// Named handlers must have succeeded.
///
/// Without an explicit `handler`, the handlers required by the registered service in the
/// evaluation context apply; with none configured, any success will do.
#[derive(Debug, Clone, Default)]
pub struct RequiredHandlerAuthenticationPolicy {
    pub handler: Option<String>,
    pub try_all: bool,
}

impl RequiredHandlerAuthenticationPolicy {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: Some(handler.into()),
            try_all: false,
        }
    }

    pub fn from_registered_service() -> Self {
        Self::default()
    }

    pub fn with_try_all(mut self, try_all: bool) -> Self {
        self.try_all = try_all;
        self
    }

    fn required_handlers<'a>(&'a self, context: Option<&ServiceContext<'a>>) -> BTreeSet<&'a str> {
        match &self.handler {
            Some(handler) => BTreeSet::from([handler.as_str()]),
            None => context
                .and_then(|ctx| ctx.registered_service)
                .map(|rs| rs.required_handlers.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }
}

impl AuthenticationPolicy for RequiredHandlerAuthenticationPolicy {
    fn name(&self) -> &str {
        "required_handler"
    }

    fn is_satisfied_by(
        &self,
        authentication: &Authentication,
        context: Option<&ServiceContext<'_>>,
    ) -> bool {
        if self.try_all && !authentication.all_credentials_attempted() {
            return false;
        }
        let required = self.required_handlers(context);
        if required.is_empty() {
            return !authentication.successes.is_empty();
        }
        required
            .iter()
            .all(|handler| authentication.successes.contains_key(*handler))
    }
}

/// No handler was prevented from running, and at least one credential was validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotPreventedAuthenticationPolicy;

impl AuthenticationPolicy for NotPreventedAuthenticationPolicy {
    fn name(&self) -> &str {
        "not_prevented"
    }

    fn is_satisfied_by(&self, authentication: &Authentication, context: Option<&ServiceContext<'_>>) -> bool {
        if authentication.failures.values().any(|f| f.prevented) {
            return false;
        }
        AnyCredentialSucceededPolicy::default().is_satisfied_by(authentication, context)
    }
}

/// Deployment-time selection of the session policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthenticationPolicyConfig {
    AcceptAny,
    Any {
        #[serde(default)]
        try_all: bool,
    },
    All,
    Required {
        #[serde(default)]
        handler: Option<String>,
        #[serde(default)]
        try_all: bool,
    },
    NotPrevented,
}

impl Default for AuthenticationPolicyConfig {
    fn default() -> Self {
        Self::Any { try_all: false }
    }
}

impl AuthenticationPolicyConfig {
    pub fn build(&self) -> Arc<dyn AuthenticationPolicy> {
        match self {
            Self::AcceptAny => Arc::new(AcceptAnyAuthenticationPolicy),
            Self::Any { try_all } => Arc::new(AnyCredentialSucceededPolicy { try_all: *try_all }),
            Self::All => Arc::new(AllCredentialsSucceededPolicy),
            Self::Required { handler, try_all } => Arc::new(RequiredHandlerAuthenticationPolicy {
                handler: handler.clone(),
                try_all: *try_all,
            }),
            Self::NotPrevented => Arc::new(NotPreventedAuthenticationPolicy),
        }
    }
}
