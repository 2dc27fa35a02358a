//! Entities exchanged with the backend.
use std::collections::{HashMap, HashSet};

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Monotonically non-decreasing version of a collection. `-1` means "never synchronized".
pub type ChangeNumber = i64;

/// Change number of a collection that has never been synchronized.
pub const NEVER_SYNCED: ChangeNumber = -1;

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed value.
    Parsed(T),
    /// Raw value that could not be parsed.
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Whether a split is live or has been removed on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SplitStatus {
    /// Split is live and must be kept in storage.
    Active,
    /// Split has been removed and must be deleted from storage.
    Archived,
}

/// A feature flag definition.
///
/// Targeting rules are opaque to this crate, apart from the segments they reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    /// Unique name of the split.
    pub name: String,
    /// Traffic type the split applies to.
    #[serde(default)]
    pub traffic_type_name: String,
    /// Whether the split is active.
    pub status: SplitStatus,
    /// Version of this definition.
    pub change_number: ChangeNumber,
    /// A killed split always serves its default treatment.
    #[serde(default)]
    pub killed: bool,
    /// Treatment served when no condition matches.
    #[serde(default = "default_treatment")]
    pub default_treatment: String,
    /// Targeting conditions, evaluated in order.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Fields this crate does not interpret, kept so the evaluator sees the full definition.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_treatment() -> String {
    "control".to_owned()
}

impl Split {
    /// Names of the segments referenced by this split's conditions.
    pub fn segment_names(&self) -> HashSet<String> {
        self.conditions
            .iter()
            .flat_map(|condition| condition.matcher_group.matchers.iter())
            .filter_map(|matcher| matcher.user_defined_segment_matcher_data.as_ref())
            .map(|data| data.segment_name.clone())
            .collect()
    }

    /// Kill the split with `default_treatment`, stamping it with `change_number`.
    pub fn kill(&mut self, default_treatment: &str, change_number: ChangeNumber) {
        self.killed = true;
        self.default_treatment = default_treatment.to_owned();
        self.change_number = change_number;
    }
}

/// A targeting rule of a [`Split`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Matchers that must hold for the condition to apply.
    #[serde(default)]
    pub matcher_group: MatcherGroup,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A group of [`Matcher`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherGroup {
    /// Matchers of the group.
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single targeting matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    /// Kind of matcher, e.g. `IN_SEGMENT`.
    pub matcher_type: String,
    /// Set on segment matchers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_defined_segment_matcher_data: Option<SegmentMatcherData>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Data of a segment matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMatcherData {
    /// Name of the referenced segment.
    pub segment_name: String,
}

/// One page of split changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitChanges {
    /// Changed splits. Entries that failed to parse are kept as errors.
    pub splits: Vec<TryParse<Split>>,
    /// Change number the page starts from.
    pub since: ChangeNumber,
    /// Change number the page brings the collection to.
    pub till: ChangeNumber,
}

/// One page of changes for a single segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentChanges {
    /// Name of the segment.
    pub name: String,
    /// Keys added to the segment.
    #[serde(default)]
    pub added: Vec<String>,
    /// Keys removed from the segment.
    #[serde(default)]
    pub removed: Vec<String>,
    /// Change number the page starts from.
    pub since: ChangeNumber,
    /// Change number the page brings the segment to.
    pub till: ChangeNumber,
}

/// Record of a treatment served to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    /// Key the treatment was served to.
    pub key_name: String,
    /// Key used for bucketing, when it differs from `key_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucketing_key: Option<String>,
    /// Name of the split.
    pub feature: String,
    /// Treatment served.
    pub treatment: String,
    /// Why the treatment was served.
    pub label: String,
    /// Change number of the split definition that was evaluated.
    pub change_number: ChangeNumber,
    /// Milliseconds since Unix epoch.
    pub time: i64,
    /// Time the same impression was previously seen, if known.
    #[serde(rename = "pt", default, skip_serializing_if = "Option::is_none")]
    pub previous_time: Option<i64>,
}

/// Value of a custom event property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A string.
    String(String),
    /// A number.
    Number(f64),
    /// A boolean.
    Boolean(bool),
    /// No value.
    Null,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A custom event tracked by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Key that produced the event.
    pub key: String,
    /// Traffic type of `key`.
    pub traffic_type_name: String,
    /// Kind of event, e.g. `purchase`.
    pub event_type_id: String,
    /// Optional value attached to the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
    /// Custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, PropertyValue>>,
}

/// Number of impressions of a feature within one hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpressionCount {
    /// Name of the split.
    #[serde(rename = "f")]
    pub feature: String,
    /// Start of the hour, milliseconds since Unix epoch.
    #[serde(rename = "m")]
    pub time_frame: i64,
    /// Number of impressions.
    #[serde(rename = "rc")]
    pub count: u64,
}

/// Keys that have been evaluated for a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKeys {
    /// Name of the split.
    #[serde(rename = "f")]
    pub feature: String,
    /// Keys evaluated for the split.
    #[serde(rename = "ks")]
    pub keys: Vec<String>,
}
