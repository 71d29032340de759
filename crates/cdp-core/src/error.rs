//! Typed errors for the pieces of the core that can fail: event validation at
//! the ingest boundary, config validation at startup, and identity
//! resolution's single total-but-checked case.
//!
//! Grounded on `rostra-client-db`'s `DbError`/`TableDumpError` snafu style
//! (`#[snafu(implicit)] location: Location`, context selectors).

use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EventValidationError {
    #[snafu(display("eventId must not be empty"))]
    EmptyEventId {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("TRACK events require a non-empty name"))]
    MissingTrackName {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("event must carry at least one of userId, email, anonymousId"))]
    MissingIdentifier {
        #[snafu(implicit)]
        location: Location,
    },
}
pub type EventValidationResult<T> = std::result::Result<T, EventValidationError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display(
        "processingWindow ({processing_window:?}) must not exceed gracePeriod ({grace_period:?})"
    ))]
    ProcessingWindowExceedsGracePeriod {
        processing_window: std::time::Duration,
        grace_period: std::time::Duration,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{field} must be a non-zero duration"))]
    ZeroDuration {
        field: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{field} must be non-zero"))]
    ZeroCapacity {
        field: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
}
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IdentityError {
    #[snafu(display("canonicalIdFor requires at least one identifier"))]
    EmptyIdentifierList {
        #[snafu(implicit)]
        location: Location,
    },
}
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;
