//! Well-known event kinds.
//!
//! Kinds are stored in their *subject* form, i.e. the event type with any trailing
//! `Event` removed. Behaviors are registered and looked up by subject, so
//! `AcknowledgementEvent` and `Acknowledgement` name the same thing.

pub const ACKNOWLEDGEMENT: &str = "Acknowledgement";
pub const ACTOR_DID_NOT_UNDERSTAND: &str = "ActorDidNotUnderstand";
pub const ACTOR_ENTERED: &str = "ActorEntered";
pub const ACTOR_NOT_FOUND: &str = "ActorNotFound";
pub const ACTOR_PROCESSING_ERROR: &str = "ActorProcessingError";
pub const ACTOR_RESUME: &str = "ActorResume";
pub const BEGIN_TERMINATION: &str = "BeginTermination";
pub const CONVERSATION_BROKEN: &str = "ConversationBroken";
pub const INVALID_TOKEN: &str = "InvalidToken";
pub const SECURITY_INCIDENT: &str = "SecurityIncident";
pub const SELF_VICINITY_CHECKUP: &str = "SelfVicinityCheckup";
pub const UNHANDLED_EXCEPTION: &str = "UnhandledException";
pub const VICINITY_CONNECTION_BROKEN: &str = "VicinityConnectionBroken";

/// Kinds that report a failure. They travel without a token and trigger error handlers.
pub const ERROR_KINDS: &[&str] = &[
    ACTOR_NOT_FOUND,
    ACTOR_PROCESSING_ERROR,
    BEGIN_TERMINATION,
    CONVERSATION_BROKEN,
    INVALID_TOKEN,
    SECURITY_INCIDENT,
    UNHANDLED_EXCEPTION,
    VICINITY_CONNECTION_BROKEN,
];

/// Kinds a user issues before holding a token.
pub const ACCESS_REQUEST_KINDS: &[&str] = &["UserAccessRequest", "UserTokenRequest", "UserTokenReply"];

/// Strips a trailing `Event` from a type name.
///
/// Only the suffix is removed: `EventScheduledEvent` becomes `EventScheduled`.
pub fn subject_of(event_type: &str) -> &str {
    match event_type.strip_suffix("Event") {
        Some(subject) if !subject.is_empty() => subject,
        _ => event_type,
    }
}

pub fn is_error_kind(subject: &str) -> bool {
    ERROR_KINDS.contains(&subject)
}

/// Kinds exempt from the acknowledgement protocol and the conversation log.
pub fn is_protocol_exempt(subject: &str) -> bool {
    subject == ACKNOWLEDGEMENT || subject == SELF_VICINITY_CHECKUP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_strips_suffix_only() {
        assert_eq!(subject_of("RequestPaymentEvent"), "RequestPayment");
        assert_eq!(subject_of("RequestPayment"), "RequestPayment");
        assert_eq!(subject_of("EventScheduledEvent"), "EventScheduled");
        assert_eq!(subject_of("Event"), "Event");
    }

    #[test]
    fn test_error_kinds() {
        assert!(is_error_kind(ACTOR_NOT_FOUND));
        assert!(!is_error_kind(ACTOR_DID_NOT_UNDERSTAND));
        assert!(!is_error_kind(ACKNOWLEDGEMENT));
    }
}
