//! Inbound event schema (§6 of the spec): `CdpEvent` plus its validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::ensure;

use crate::clock::Timestamp;
use crate::error::{
    EmptyEventIdSnafu, EventValidationResult, MissingIdentifierSnafu, MissingTrackNameSnafu,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Identify,
    Track,
    Alias,
}

/// One inbound customer activity event, as received at the ingest boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpEvent {
    pub event_id: String,
    pub ts: Timestamp,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub traits: Map<String, Value>,
}

impl CdpEvent {
    /// Validates the event against §6's rules. Called at the ingest
    /// boundary; a `CdpEvent` that reaches the pipeline is assumed valid.
    pub fn validate(&self) -> EventValidationResult<()> {
        ensure!(!self.event_id.trim().is_empty(), EmptyEventIdSnafu);

        if self.kind == EventKind::Track {
            ensure!(
                self.name.as_deref().is_some_and(|n| !n.trim().is_empty()),
                MissingTrackNameSnafu
            );
        }

        ensure!(
            self.user_id.is_some() || self.email.is_some() || self.anonymous_id.is_some(),
            MissingIdentifierSnafu
        );

        Ok(())
    }

    /// The identifiers this event carries, each tagged with the namespace
    /// implied by the *field it came from* (`userId` → `user:`, `email` →
    /// `email:`, `anonymousId` → `anon:`), in that stable order.
    ///
    /// Tagging here — rather than leaving `identity::normalize` to infer the
    /// namespace from the value's shape — matters because real anonymous
    /// ids (UUIDs, random tokens) essentially never contain the substring
    /// `anon` that the content-based inference relies on; normalize's
    /// prefix-preserving branch takes over instead, so the field origin is
    /// never lost.
    pub fn tagged_identifiers(&self) -> Vec<String> {
        [
            self.user_id.as_deref().map(|v| format!("user:{v}")),
            self.email.as_deref().map(|v| format!("email:{v}")),
            self.anonymous_id.as_deref().map(|v| format!("anon:{v}")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
