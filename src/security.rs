//! # Security Context
//!
//! Token checks are delegated to a [`TokenValidator`] supplied by the deployment; this
//! crate never issues tokens. The [`SecurityContext`] is built once at startup and
//! handed to the [`Vicinity`](crate::transport::Vicinity), which shares it with every
//! actor. It also carries the internal token actors attach to their own traffic.
//!
//! # Architecture Note
//! The context is an explicit value rather than a process-wide static. Renewal of
//! the internal token is driven by the actor heartbeat (`on_24hours`), so the
//! schedule is visible in one place.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::event::Event;

const REQUEST_ID_LENGTH: usize = 20;

/// Validates bearer tokens and resolves the user they belong to.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;

    /// User identity carried by a token.
    fn user_of(&self, _token: &str) -> Option<String> {
        None
    }

    /// Returns a replacement internal token, if the validator can mint one.
    fn renew(&self, _current: Option<&str>) -> Option<String> {
        None
    }
}

/// Accepts a fixed set of tokens.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenValidator {
    tokens: HashSet<String>,
}

impl StaticTokenValidator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

/// Security state shared by all actors of a process.
pub struct SecurityContext {
    validator: Arc<dyn TokenValidator>,
    internal_token: RwLock<Option<String>>,
}

impl Default for SecurityContext {
    /// Only anonymous-ok events pass.
    fn default() -> Self {
        Self::new(Arc::new(StaticTokenValidator::default()))
    }
}

impl SecurityContext {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            validator,
            internal_token: RwLock::new(None),
        }
    }

    pub fn with_internal_token(self, token: impl Into<String>) -> Self {
        *self.internal_token.write() = Some(token.into());
        self
    }

    pub fn internal_token(&self) -> Option<String> {
        self.internal_token.read().clone()
    }

    pub fn validate(&self, token: &str) -> bool {
        self.validator.validate(token)
    }

    /// Whether an inbound or outbound event may be processed.
    pub fn is_ok_to_proceed(&self, event: &Event) -> bool {
        event.is_anonymous_ok() || event.access_token().is_some_and(|t| self.validate(t))
    }

    /// An event that cannot proceed on its own needs a token attached.
    pub fn needs_access_token(&self, event: &Event) -> bool {
        !self.is_ok_to_proceed(event)
    }

    pub fn user_of(&self, event: &Event) -> Option<String> {
        event.access_token().and_then(|t| self.validator.user_of(t))
    }

    /// Replaces the internal token when it no longer validates.
    ///
    /// Returns `true` if a valid token is held afterwards.
    pub fn renew(&self) -> bool {
        let current = self.internal_token();
        if current.as_deref().is_some_and(|t| self.validate(t)) {
            return true;
        }
        match self.validator.renew(current.as_deref()) {
            Some(token) => {
                info!("Internal token renewed");
                *self.internal_token.write() = Some(token);
                true
            }
            None => {
                warn!("Internal token could not be renewed");
                false
            }
        }
    }
}

/// A new correlation id: 20 random alphanumeric characters.
pub fn generate_request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RotatingValidator;

    impl TokenValidator for RotatingValidator {
        fn validate(&self, token: &str) -> bool {
            token == "fresh"
        }

        fn renew(&self, _current: Option<&str>) -> Option<String> {
            Some("fresh".to_string())
        }
    }

    #[test]
    fn test_request_ids_are_twenty_alphanumerics() {
        let id = generate_request_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_request_id());
    }

    #[test]
    fn test_token_rules() {
        let security = SecurityContext::new(Arc::new(StaticTokenValidator::new(["good"])));
        let signed = Event::new("RequestPayment", "a").with_access_token("good");
        let forged = Event::new("RequestPayment", "a").with_access_token("bad");
        let bare = Event::new("RequestPayment", "a");
        let error = Event::new("ActorNotFound", "a");

        assert!(security.is_ok_to_proceed(&signed));
        assert!(!security.is_ok_to_proceed(&forged));
        assert!(security.needs_access_token(&bare));
        assert!(security.is_ok_to_proceed(&error));
    }

    #[test]
    fn test_renew_replaces_stale_token() {
        let security = SecurityContext::new(Arc::new(RotatingValidator)).with_internal_token("stale");
        assert!(security.renew());
        assert_eq!(security.internal_token().as_deref(), Some("fresh"));

        let fixed = SecurityContext::default().with_internal_token("stale");
        assert!(!fixed.renew());
    }
}
