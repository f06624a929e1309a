//! Provider selection.
//!
//! The router is stateless per call: everything it needs is the request,
//! today's count and what it was built with.

use std::sync::LazyLock;

use lettre::{message::Mailbox, Address};
use regex::Regex;
use serde::Deserialize;

use crate::{config::RoutingPolicy, error::ValidationError};

/// `provider` keyword selecting the primary transport.
pub const PRIMARY_KEYWORD: &str = "bravo";
/// `provider` keyword selecting the fallback transport.
pub const FALLBACK_KEYWORD: &str = "email";

const DEFAULT_SENDER_NAME: &str = "Mailer";

static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

// Request model
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SendRequest {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
    pub provider: Option<String>,
    pub sender: Option<SenderOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SenderOverride {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl SendRequest {
    fn override_email(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .and_then(|s| s.email.as_deref())
            .filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportName {
    Primary,
    Fallback,
}

impl TransportName {
    /// Name reported back to the caller as `used`.
    pub fn keyword(self) -> &'static str {
        match self {
            TransportName::Primary => PRIMARY_KEYWORD,
            TransportName::Fallback => FALLBACK_KEYWORD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderDecision {
    UseSenderOverride,
    UsePrimary,
    UseFallback,
    Rejected(ValidationError),
}

impl ProviderDecision {
    /// Transport to dispatch through, or the reason there is none.
    pub fn transport(&self) -> Result<TransportName, ValidationError> {
        match self {
            ProviderDecision::UseSenderOverride | ProviderDecision::UsePrimary => {
                Ok(TransportName::Primary)
            }
            ProviderDecision::UseFallback => Ok(TransportName::Fallback),
            ProviderDecision::Rejected(reason) => Err(reason.clone()),
        }
    }

    /// Only successful sends through the primary transport are counted.
    pub fn increments_counter(&self) -> bool {
        matches!(
            self,
            ProviderDecision::UsePrimary | ProviderDecision::UseSenderOverride
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProviderRouter {
    policy: RoutingPolicy,
    daily_limit: u64,
    default_from: Option<Mailbox>,
}

impl ProviderRouter {
    pub fn new(policy: RoutingPolicy, daily_limit: u64, default_from: Option<Mailbox>) -> Self {
        Self {
            policy,
            daily_limit,
            default_from,
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub fn decide(&self, request: &SendRequest, current_count: u64) -> ProviderDecision {
        if let Err(err) = self.validate(request) {
            return ProviderDecision::Rejected(err);
        }

        match self.policy {
            RoutingPolicy::Limit => {
                if current_count >= self.daily_limit {
                    ProviderDecision::UseFallback
                } else {
                    ProviderDecision::UsePrimary
                }
            }
            RoutingPolicy::Explicit => {
                explicit_choice(request).unwrap_or_else(ProviderDecision::Rejected)
            }
        }
    }

    /// From identity for an accepted request: the caller's override, or the
    /// configured default.
    pub fn sender_for(&self, request: &SendRequest) -> Result<Mailbox, ValidationError> {
        match request.override_email() {
            Some(email) => {
                let name = request
                    .sender
                    .as_ref()
                    .and_then(|s| s.name.as_deref())
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_SENDER_NAME);
                let address: Address = email.parse().map_err(|_| ValidationError::InvalidEmail)?;
                Ok(Mailbox::new(Some(name.to_string()), address))
            }
            None => self
                .default_from
                .clone()
                .ok_or(ValidationError::NoSenderConfigured),
        }
    }

    /// Shape checks that need neither the counter nor a transport.
    pub fn validate(&self, request: &SendRequest) -> Result<(), ValidationError> {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.is_empty());
        if !(present(&request.to) && present(&request.subject) && present(&request.html)) {
            return Err(ValidationError::MissingFields);
        }

        if self.policy == RoutingPolicy::Explicit {
            if !is_plausible_email(request.to.as_deref().unwrap_or_default()) {
                return Err(ValidationError::InvalidEmail);
            }
            if let Some(email) = request.override_email() {
                if !is_plausible_email(email) {
                    return Err(ValidationError::InvalidEmail);
                }
            }
            explicit_choice(request)?;
        }

        if request.override_email().is_none() && self.default_from.is_none() {
            return Err(ValidationError::NoSenderConfigured);
        }

        Ok(())
    }
}

// Sender override first, then the `provider` keyword.
fn explicit_choice(request: &SendRequest) -> Result<ProviderDecision, ValidationError> {
    if request.override_email().is_some() {
        return Ok(ProviderDecision::UseSenderOverride);
    }

    let provider = request
        .provider
        .as_deref()
        .map(|p| p.trim().to_lowercase());
    match provider.as_deref() {
        Some(PRIMARY_KEYWORD) => Ok(ProviderDecision::UsePrimary),
        Some(FALLBACK_KEYWORD) => Ok(ProviderDecision::UseFallback),
        _ => Err(ValidationError::InvalidProvider),
    }
}

pub fn is_plausible_email(value: &str) -> bool {
    EMAIL_SHAPE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_from() -> Option<Mailbox> {
        Some("Relay <noreply@example.com>".parse().unwrap())
    }

    fn limit_router(limit: u64) -> ProviderRouter {
        ProviderRouter::new(RoutingPolicy::Limit, limit, default_from())
    }

    fn explicit_router() -> ProviderRouter {
        ProviderRouter::new(RoutingPolicy::Explicit, 300, default_from())
    }

    fn request(provider: Option<&str>) -> SendRequest {
        SendRequest {
            to: Some("x@y.com".into()),
            subject: Some("Hi".into()),
            html: Some("<p>hi</p>".into()),
            provider: provider.map(Into::into),
            sender: None,
        }
    }

    fn with_sender(mut req: SendRequest, email: &str) -> SendRequest {
        req.sender = Some(SenderOverride {
            name: None,
            email: Some(email.into()),
        });
        req
    }

    #[test]
    fn limit_policy_switches_at_the_limit() {
        let router = limit_router(300);
        let req = request(None);

        assert_eq!(router.decide(&req, 0), ProviderDecision::UsePrimary);
        assert_eq!(router.decide(&req, 299), ProviderDecision::UsePrimary);
        assert_eq!(router.decide(&req, 300), ProviderDecision::UseFallback);
        assert_eq!(router.decide(&req, 1_000), ProviderDecision::UseFallback);
    }

    #[test]
    fn limit_policy_ignores_provider_and_sender() {
        let router = limit_router(300);

        assert_eq!(router.decide(&request(Some("email")), 10), ProviderDecision::UsePrimary);
        assert_eq!(router.decide(&request(Some("xyz")), 10), ProviderDecision::UsePrimary);
        assert_eq!(
            router.decide(&with_sender(request(None), "a@b.com"), 300),
            ProviderDecision::UseFallback
        );
    }

    #[test]
    fn explicit_policy_table() {
        let router = explicit_router();

        for provider in [None, Some("bravo"), Some("email"), Some("xyz")] {
            assert_eq!(
                router.decide(&with_sender(request(provider), "a@b.com"), 0),
                ProviderDecision::UseSenderOverride
            );
        }
        assert_eq!(router.decide(&request(Some("bravo")), 0), ProviderDecision::UsePrimary);
        assert_eq!(router.decide(&request(Some("BRAVO")), 0), ProviderDecision::UsePrimary);
        assert_eq!(router.decide(&request(Some("email")), 0), ProviderDecision::UseFallback);
        assert_eq!(
            router.decide(&request(Some("xyz")), 0),
            ProviderDecision::Rejected(ValidationError::InvalidProvider)
        );
        assert_eq!(
            router.decide(&request(None), 0),
            ProviderDecision::Rejected(ValidationError::InvalidProvider)
        );
    }

    #[test]
    fn explicit_policy_ignores_the_limit() {
        let router = ProviderRouter::new(RoutingPolicy::Explicit, 1, default_from());
        assert_eq!(router.decide(&request(Some("bravo")), 500), ProviderDecision::UsePrimary);
    }

    #[test]
    fn missing_fields_are_rejected_by_both_policies() {
        for router in [limit_router(300), explicit_router()] {
            let mut blank_subject = request(Some("bravo"));
            blank_subject.subject = Some(String::new());
            let mut no_to = request(Some("bravo"));
            no_to.to = None;
            let mut no_html = request(Some("bravo"));
            no_html.html = None;

            for req in [blank_subject, no_to, no_html, SendRequest::default()] {
                assert_eq!(
                    router.decide(&req, 0),
                    ProviderDecision::Rejected(ValidationError::MissingFields)
                );
            }
        }
    }

    #[test]
    fn whitespace_only_content_is_not_missing() {
        for router in [limit_router(300), explicit_router()] {
            let mut req = request(Some("bravo"));
            req.subject = Some(" ".into());
            req.html = Some("\n".into());

            assert_eq!(router.decide(&req, 0), ProviderDecision::UsePrimary);
        }
    }

    #[test]
    fn padded_recipient_is_rejected_by_explicit_policy() {
        let router = explicit_router();

        for to in [" x@y.com", "x@y.com\n", "\tx@y.com "] {
            let mut req = request(Some("bravo"));
            req.to = Some(to.into());
            assert_eq!(
                router.validate(&req),
                Err(ValidationError::InvalidEmail),
                "{to:?}"
            );
            assert_eq!(
                router.decide(&req, 0),
                ProviderDecision::Rejected(ValidationError::InvalidEmail)
            );
        }
    }

    #[test]
    fn malformed_recipients_are_rejected_by_explicit_policy() {
        let router = explicit_router();

        for to in ["plain", "a@b", "a b@c.com", "@b.com", "a@@b.com", "a@b.c d"] {
            let mut req = request(Some("bravo"));
            req.to = Some(to.into());
            assert_eq!(
                router.decide(&req, 0),
                ProviderDecision::Rejected(ValidationError::InvalidEmail),
                "{to}"
            );
        }

        assert_eq!(
            router.decide(&with_sender(request(None), "not-an-email"), 0),
            ProviderDecision::Rejected(ValidationError::InvalidEmail)
        );
    }

    #[test]
    fn no_sender_identity_is_rejected() {
        let router = ProviderRouter::new(RoutingPolicy::Limit, 300, None);
        assert_eq!(
            router.decide(&request(None), 0),
            ProviderDecision::Rejected(ValidationError::NoSenderConfigured)
        );

        let req = with_sender(request(None), "a@b.com");
        assert_eq!(router.decide(&req, 0), ProviderDecision::UsePrimary);
        let from = router.sender_for(&req).unwrap();
        assert_eq!(from.to_string(), "Mailer <a@b.com>");
    }

    #[test]
    fn sender_override_keeps_the_given_name() {
        let router = explicit_router();
        let mut req = with_sender(request(None), "ops@example.org");
        req.sender.as_mut().unwrap().name = Some("Ops Team".into());

        let from = router.sender_for(&req).unwrap();
        assert_eq!(from.name.as_deref(), Some("Ops Team"));
        assert_eq!(from.email.to_string(), "ops@example.org");

        let default = router.sender_for(&request(Some("bravo"))).unwrap();
        assert_eq!(default.email.to_string(), "noreply@example.com");
    }

    #[test]
    fn only_primary_dispatch_counts() {
        assert!(ProviderDecision::UsePrimary.increments_counter());
        assert!(ProviderDecision::UseSenderOverride.increments_counter());
        assert!(!ProviderDecision::UseFallback.increments_counter());
        assert!(!ProviderDecision::Rejected(ValidationError::MissingFields).increments_counter());
    }
}
