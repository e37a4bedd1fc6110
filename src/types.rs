//! Report data model: rows, cells, payloads and the per-table snapshot document
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type TableId = String;
pub type MetricId = u32;
pub type FieldId = u32;

/// Metric ordinal column.
pub const METRIC_ID_FIELD: FieldId = 1000;
/// Metric display name column.
pub const NAME_FIELD: FieldId = 1001;
/// Metric unit column.
pub const UNIT_FIELD: FieldId = 1002;
/// This-period plan total.
pub const PLAN_TOTAL_FIELD: FieldId = 1003;
/// Same-period actual total.
pub const SAME_PERIOD_TOTAL_FIELD: FieldId = 1004;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
            .unwrap_or_default()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self(DateTime::from_timestamp_nanos(0))
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A cell value as entered. Numeric strings count as numbers when summing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    #[default]
    Empty,
}

impl CellValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

/// Free-text note attached by the validator. `rule_key` tags the rule that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub rule_key: String,
    #[serde(default)]
    pub text: String,
}

/// Soft-validation categories surfaced on the group view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueCategory {
    B,
    C,
}

impl IssueCategory {
    /// `B`/`C` as the first character, followed by end of key or a separator.
    pub fn from_rule_key(rule_key: &str) -> Option<Self> {
        let mut chars = rule_key.chars();
        let category = match chars.next()? {
            'B' => IssueCategory::B,
            'C' => IssueCategory::C,
            _ => return None,
        };
        match chars.next() {
            None | Some(':' | '_' | '-' | '.') => Some(category),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub category: IssueCategory,
    pub rule_key: String,
    pub message: String,
    pub table_id: TableId,
    pub table_name: String,
    pub metric_id: MetricId,
    pub field_id: FieldId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub field_id: FieldId,
    #[serde(default)]
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    // only populated on aggregated views
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl Cell {
    pub fn new(field_id: FieldId, value: impl Into<CellValue>) -> Self {
        Self {
            field_id,
            value: value.into(),
            explanation: None,
            issues: vec![],
        }
    }
    pub fn with_explanation(mut self, rule_key: &str, text: &str) -> Self {
        self.explanation = Some(Explanation {
            rule_key: rule_key.to_string(),
            text: text.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub metric_id: MetricId,
    pub values: Vec<Cell>,
    // a calculated-metric row carrying real data that parents must still sum
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

impl Row {
    pub fn new(metric_id: MetricId, values: Vec<Cell>) -> Self {
        Self {
            metric_id,
            values,
            force: false,
        }
    }
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
    pub fn cell(&self, field_id: FieldId) -> Option<&Cell> {
        self.values.iter().find(|c| c.field_id == field_id)
    }
    pub fn cell_mut(&mut self, field_id: FieldId) -> Option<&mut Cell> {
        self.values.iter_mut().find(|c| c.field_id == field_id)
    }
    pub fn number(&self, field_id: FieldId) -> Option<f64> {
        self.cell(field_id).and_then(|c| c.value.as_number())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub id: TableId,
    pub name: String,
}

/// Who wrote a version. `hidden_from_audit` is copied from the actor at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub username: String,
    #[serde(default)]
    pub hidden_from_audit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub table: TableRef,
    #[serde(default)]
    pub table_data: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<TimeStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<Signature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<TimeStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Signature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_digest: Option<String>,
}

impl Payload {
    pub fn new(table: TableRef, table_data: Vec<Row>) -> Self {
        Self {
            table,
            table_data,
            submitted_at: None,
            submitted_by: None,
            approved_at: None,
            approved_by: None,
            approval_digest: None,
        }
    }
    pub fn row(&self, metric_id: MetricId) -> Option<&Row> {
        self.table_data.iter().find(|r| r.metric_id == metric_id)
    }
    /// The same payload with every approval stamp removed.
    pub fn without_approval(mut self) -> Self {
        self.approved_at = None;
        self.approved_by = None;
        self.approval_digest = None;
        self
    }
    /// sha256 over the canonical JSON of the rows.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let contents = serde_json::to_vec(&self.table_data)?;
        Ok(sha256::digest(contents.as_slice()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalMarker {
    pub withdrawn_at: TimeStamp,
    pub withdrawn_by: Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Version {
    Draft,
    Submitted,
    Approved,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Version::Draft => "draft",
            Version::Submitted => "submitted",
            Version::Approved => "approved",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Version::Draft),
            "submitted" | "submit" => Ok(Version::Submitted),
            "approved" => Ok(Version::Approved),
            other => Err(format!("unknown version `{other}`")),
        }
    }
}

/// Every stored version of one table, persisted as a single document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<Payload>,
    #[serde(default, rename = "submit", skip_serializing_if = "Option::is_none")]
    pub submitted: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawal: Option<WithdrawalMarker>,
}

impl SnapshotDocument {
    pub fn version(&self, version: Version) -> Option<&Payload> {
        match version {
            Version::Draft => self.draft.as_ref(),
            Version::Submitted => self.submitted.as_ref(),
            Version::Approved => self.approved.as_ref(),
        }
    }
    pub fn version_mut(&mut self, version: Version) -> &mut Option<Payload> {
        match version {
            Version::Draft => &mut self.draft,
            Version::Submitted => &mut self.submitted,
            Version::Approved => &mut self.approved,
        }
    }
    pub fn is_approved(&self) -> bool {
        self.approved.is_some()
    }
    pub fn is_empty(&self) -> bool {
        self.draft.is_none()
            && self.submitted.is_none()
            && self.approved.is_none()
            && self.withdrawal.is_none()
    }
}

/// Result of a view computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedView {
    pub submit: Payload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explanation_summary: Vec<Issue>,
}

impl AggregatedView {
    pub fn new(submit: Payload) -> Self {
        Self {
            submit,
            explanation_summary: vec![],
        }
    }
}

pub type MetricSet = BTreeSet<MetricId>;
pub type FieldSet = BTreeSet<FieldId>;
