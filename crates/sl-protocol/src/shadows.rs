use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property map used for `reported`, `desired` and delta state.
pub type StateMap = serde_json::Map<String, Value>;

/// Generate a fresh client token for an update request.
pub fn new_client_token() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// State section of a shadow update or response.
///
/// Either side may be absent: a device usually only sends `reported`,
/// and echoes `desired` when it closes a delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<StateMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<StateMap>,
}

impl ShadowState {
    /// State patch that only touches `reported`.
    pub fn reported(state: StateMap) -> Self {
        Self {
            reported: Some(state),
            desired: None,
        }
    }

    /// State patch that writes the same values to `reported` and `desired`.
    pub fn echo(state: StateMap) -> Self {
        Self {
            reported: Some(state.clone()),
            desired: Some(state),
        }
    }
}

/// Update request published to `.../shadow[/name/{shadow}]/update`.
///
/// Wire shape: `{"state": {"reported": {...}, "desired": {...}}, "clientToken": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub state: ShadowState,
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

impl UpdateRequest {
    /// Build a request with a freshly generated client token.
    pub fn new(state: ShadowState) -> Self {
        Self::with_token(state, new_client_token())
    }

    pub fn with_token(state: ShadowState, client_token: impl Into<String>) -> Self {
        Self {
            state,
            client_token: client_token.into(),
        }
    }
}

/// Response on `.../update/accepted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateAccepted {
    #[serde(default)]
    pub state: ShadowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(
        rename = "clientToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_token: Option<String>,
}

impl UpdateAccepted {
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.timestamp)
    }
}

/// Error document on `.../update/rejected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(
        rename = "clientToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_token: Option<String>,
}

impl ErrorResponse {
    /// Whether resending the same update can succeed.
    ///
    /// 409 is a version conflict, 429 is throttling and 5xx are service
    /// side faults. Everything else (malformed document, unauthorized,
    /// payload too large) fails again on retry.
    pub fn is_retryable(&self) -> bool {
        is_retryable_code(self.code)
    }
}

/// Whether an update rejected with `code` may succeed when resent.
pub fn is_retryable_code(code: u16) -> bool {
    matches!(code, 409 | 429) || (500..600).contains(&code)
}

/// Event on `.../update/delta`: desired values not yet matched by reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    #[serde(default)]
    pub state: StateMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(
        rename = "clientToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_token: Option<String>,
}

impl DeltaEvent {
    pub fn new(state: StateMap) -> Self {
        Self {
            state,
            metadata: None,
            version: None,
            timestamp: None,
            client_token: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.timestamp)
    }
}

/// Local model of a shadow document, mirroring how the service merges
/// update requests.
///
/// Used to reason about convergence: after the device echoes a delta,
/// `delta()` is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowDocument {
    pub reported: StateMap,
    pub desired: StateMap,
    pub version: u64,
}

impl ShadowDocument {
    /// Merge a state patch. Nested objects merge recursively and a `null`
    /// value deletes the key. Applying the same patch twice leaves the
    /// document unchanged apart from the version.
    pub fn apply(&mut self, patch: &ShadowState) {
        if let Some(reported) = &patch.reported {
            merge_into(&mut self.reported, reported);
        }
        if let Some(desired) = &patch.desired {
            merge_into(&mut self.desired, desired);
        }
        self.version += 1;
    }

    /// Desired entries that reported does not match.
    pub fn delta(&self) -> StateMap {
        self.desired
            .iter()
            .filter(|(key, value)| self.reported.get(key.as_str()) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

fn merge_into(target: &mut StateMap, patch: &StateMap) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(nested) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(StateMap::new()));
                match entry {
                    Value::Object(existing) => merge_into(existing, nested),
                    other => *other = value.clone(),
                }
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn epoch_to_utc(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}
