//! Core domain model for the oppsync pipeline: listing entries, extracted records,
//! relational rows, vector payloads and stage outcomes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

pub const CRATE_NAME: &str = "oppsync-core";

/// Source label written to the `source` column and the manifest.
pub const DEFAULT_SOURCE: &str = "opportunitiescorners";

/// One opportunity card found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub title: String,
    pub link: String,
    pub date_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scrape,
    Extract,
    Embed,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Scrape, Stage::Extract, Stage::Embed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::Extract => "extract",
            Stage::Embed => "embed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage `{}` (choose from scrape, extract, embed)", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrape" => Ok(Stage::Scrape),
            "extract" => Ok(Stage::Extract),
            "embed" => Ok(Stage::Embed),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

/// Whether a stage handed anything to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "count")]
pub enum StageOutcome {
    NewData(usize),
    NoNewData,
}

impl StageOutcome {
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            StageOutcome::NoNewData
        } else {
            StageOutcome::NewData(count)
        }
    }

    pub fn has_new_data(&self) -> bool {
        matches!(self, StageOutcome::NewData(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    /// Items looked at (listing cards, artifacts, snapshot records).
    pub considered: usize,
    /// Items intentionally not processed (already seen, older than the cursor, no content).
    pub skipped: usize,
    /// Per-item failures that were logged and skipped.
    pub failed: usize,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            outcome: StageOutcome::NoNewData,
            considered: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub fn finish(mut self, produced: usize) -> Self {
        self.outcome = StageOutcome::from_count(produced);
        self
    }
}

/// Deterministic record identifier for the `ordinal`-th opportunity found in the
/// document scraped from `source_url`.
pub fn record_id(source_url: &str, ordinal: usize) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{source_url}#{ordinal}").as_bytes(),
    )
}

/// LLM-extracted opportunity. The field set is open, so the record keeps the JSON
/// object and exposes typed accessors for the fields the pipeline relies on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedOpportunity(pub Map<String, JsonValue>);

impl ExtractedOpportunity {
    pub fn from_value(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, value: JsonValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn id(&self) -> Option<Uuid> {
        self.str_field("id").and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn title(&self) -> Option<&str> {
        self.str_field("title")
    }

    pub fn application_link(&self) -> Option<&str> {
        self.str_field("application_link")
    }

    pub fn category(&self) -> Option<&str> {
        self.0
            .get("type")
            .and_then(|t| t.get("category"))
            .and_then(JsonValue::as_str)
    }

    pub fn subtype(&self) -> Vec<String> {
        string_list(self.0.get("type").and_then(|t| t.get("subtype")))
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        string_list(self.0.get(key))
    }

    /// Like [`Self::list`], but `None` when the field is absent or null.
    pub fn optional_list(&self, key: &str) -> Option<Vec<String>> {
        optional_string_list(self.0.get(key))
    }

    pub fn deadline(&self) -> Option<NaiveDate> {
        parse_iso_date(self.0.get("deadline"))
    }

    pub fn is_remote(&self) -> bool {
        self.0
            .get("is_remote")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    /// Text submitted to the embedding model.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}\n{}\nEligibility: {}\n",
            self.str_field("title").unwrap_or_default(),
            self.str_field("description").unwrap_or_default(),
            self.str_field("eligibility").unwrap_or_default(),
        )
    }
}

/// Strings become one-element lists, arrays keep their string members, anything else is empty.
pub fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn optional_string_list(value: Option<&JsonValue>) -> Option<Vec<String>> {
    match value {
        None | Some(JsonValue::Null) => None,
        other => Some(string_list(other)),
    }
}

fn parse_iso_date(value: Option<&JsonValue>) -> Option<NaiveDate> {
    let s = value?.as_str()?.trim();
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn lenient_f64(value: Option<&JsonValue>) -> Option<f64> {
    match value? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn truthy(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(JsonValue::String(s)) => !s.is_empty(),
        Some(JsonValue::Array(a)) => !a.is_empty(),
        Some(JsonValue::Object(o)) => !o.is_empty(),
    }
}

/// Row of the `opportunities` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityRow {
    pub id: Uuid,
    pub source: String,
    pub source_url: String,
    pub source_md: String,
    pub data_en: JsonValue,
    pub data_ar: Option<JsonValue>,
    pub category: Option<String>,
    pub subtype: Option<Vec<String>>,
    pub country: Option<Vec<String>>,
    pub fund_type: Option<Vec<String>>,
    pub target_segment: Option<Vec<String>>,
    pub deadline: Option<NaiveDate>,
    pub is_remote: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OpportunityRow {
    pub fn new(
        id: Uuid,
        source: &str,
        source_url: &str,
        source_md: &str,
        data_en: &ExtractedOpportunity,
        data_ar: Option<&ExtractedOpportunity>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source: source.to_string(),
            source_url: source_url.to_string(),
            source_md: source_md.to_string(),
            data_en: JsonValue::Object(data_en.0.clone()),
            data_ar: data_ar.map(|d| JsonValue::Object(d.0.clone())),
            category: data_en.category().map(ToString::to_string),
            subtype: optional_string_list(data_en.get("type").and_then(|t| t.get("subtype"))),
            country: data_en.optional_list("country"),
            fund_type: data_en.optional_list("fund_type"),
            target_segment: data_en.optional_list("target_segment"),
            deadline: data_en.deadline(),
            is_remote: data_en.is_remote(),
            created_at,
            updated_at: created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamScore {
    pub name: String,
    pub score: f64,
}

/// Filterable payload stored next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub program_id: Uuid,
    pub title: Option<String>,
    pub country: Vec<String>,
    pub fund_type: Vec<String>,
    pub category: Option<String>,
    pub subtype: Vec<String>,
    pub documents_required: Vec<String>,
    pub exam_scores: Vec<ExamScore>,
    pub is_remote: bool,
    pub eligible_nationalities: Vec<String>,
    pub target_segment: Vec<String>,
    pub deadline: Option<String>,
    pub min_age: Option<i64>,
    pub max_age: Option<i64>,
    pub gpa: Option<f64>,
    pub has_language_requirements: bool,
    pub has_fee: bool,
    pub has_document_requirements: bool,
}

impl VectorPayload {
    pub fn from_record(id: Uuid, record: &ExtractedOpportunity) -> Self {
        let exam_scores = exam_scores(record.get("language_requirements"));
        let documents_required = record.list("documents_required");
        let eligible_nationalities = match record.get("eligible_nationalities") {
            None | Some(JsonValue::Null) => vec!["all".to_string()],
            other => string_list(other),
        };
        Self {
            program_id: id,
            title: record.title().map(ToString::to_string),
            country: record.list("country"),
            fund_type: record.list("fund_type"),
            category: record.category().map(ToString::to_string),
            subtype: record.subtype(),
            has_document_requirements: !documents_required.is_empty(),
            documents_required,
            has_language_requirements: !exam_scores.is_empty(),
            exam_scores,
            is_remote: record.is_remote(),
            eligible_nationalities,
            target_segment: record.list("target_segment"),
            deadline: record.str_field("deadline").map(ToString::to_string),
            min_age: lenient_f64(record.get("min_age")).map(|v| v.trunc() as i64),
            max_age: lenient_f64(record.get("max_age")).map(|v| v.trunc() as i64),
            gpa: lenient_f64(record.get("gpa")),
            has_fee: truthy(record.get("application_fee")),
        }
    }
}

/// `{"IELTS": "6.5", "TOEFL": ""}` becomes `[{name: "ielts", score: 6.5}]`; entries
/// without a numeric score are dropped.
pub fn exam_scores(value: Option<&JsonValue>) -> Vec<ExamScore> {
    let Some(JsonValue::Object(map)) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(name, score)| {
            lenient_f64(Some(score)).map(|score| ExamScore {
                name: name.trim().to_ascii_lowercase(),
                score,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> ExtractedOpportunity {
        ExtractedOpportunity::from_value(value).expect("object")
    }

    #[test]
    fn stage_names_parse_case_insensitively() {
        assert_eq!("Extract".parse::<Stage>().unwrap(), Stage::Extract);
        assert_eq!(" embed ".parse::<Stage>().unwrap(), Stage::Embed);
        assert!("index".parse::<Stage>().is_err());
    }

    #[test]
    fn record_ids_are_stable_per_url_and_ordinal() {
        let a = record_id("https://example.org/a", 0);
        assert_eq!(a, record_id("https://example.org/a", 0));
        assert_ne!(a, record_id("https://example.org/a", 1));
        assert_ne!(a, record_id("https://example.org/b", 0));
    }

    #[test]
    fn row_projection_reads_nested_type_and_lists() {
        let en = record(json!({
            "title": "DAAD Scholarship",
            "type": {"category": "academic", "subtype": "masters"},
            "country": "Germany",
            "fund_type": ["fully_funded"],
            "deadline": "2026-11-30",
            "is_remote": false
        }));
        let now = Utc::now();
        let row = OpportunityRow::new(
            record_id("u", 0),
            DEFAULT_SOURCE,
            "u",
            "# md",
            &en,
            None,
            now,
        );
        assert_eq!(row.category.as_deref(), Some("academic"));
        assert_eq!(row.subtype, Some(vec!["masters".to_string()]));
        assert_eq!(row.country, Some(vec!["Germany".to_string()]));
        assert_eq!(row.fund_type, Some(vec!["fully_funded".to_string()]));
        assert_eq!(row.deadline, NaiveDate::from_ymd_opt(2026, 11, 30));
        assert!(row.data_ar.is_none());
        assert_eq!(row.created_at, row.updated_at);
    }

    #[test]
    fn absent_list_fields_stay_null_in_rows() {
        let en = record(json!({
            "title": "Open Call",
            "type": {"category": "non_academic"},
            "country": null,
            "target_segment": []
        }));
        let row = OpportunityRow::new(record_id("u", 0), DEFAULT_SOURCE, "u", "# md", &en, None, Utc::now());
        assert_eq!(row.subtype, None);
        assert_eq!(row.country, None);
        assert_eq!(row.fund_type, None);
        assert_eq!(row.target_segment, Some(Vec::new()));
    }

    #[test]
    fn loose_dates_are_not_stored_as_deadlines() {
        let en = record(json!({"deadline": "30 November 2026"}));
        assert_eq!(en.deadline(), None);
        let en = record(json!({"deadline": "2026-1-5"}));
        assert_eq!(en.deadline(), None);
    }

    #[test]
    fn payload_derives_flags_from_optional_fields() {
        let id = record_id("u", 0);
        let en = record(json!({
            "title": "Fellowship",
            "language_requirements": {"IELTS ": "6.5", "TOEFL": ""},
            "documents_required": ["cv", "transcript"],
            "application_fee": "50 USD",
            "min_age": "18",
            "max_age": 35,
            "gpa": "3.0"
        }));
        let payload = VectorPayload::from_record(id, &en);
        assert_eq!(payload.program_id, id);
        assert_eq!(
            payload.exam_scores,
            vec![ExamScore { name: "ielts".into(), score: 6.5 }]
        );
        assert!(payload.has_language_requirements);
        assert!(payload.has_document_requirements);
        assert!(payload.has_fee);
        assert_eq!(payload.min_age, Some(18));
        assert_eq!(payload.max_age, Some(35));
        assert_eq!(payload.gpa, Some(3.0));
        assert_eq!(payload.eligible_nationalities, vec!["all".to_string()]);
    }

    #[test]
    fn payload_without_optional_fields_has_false_flags() {
        let payload = VectorPayload::from_record(record_id("u", 1), &record(json!({"title": "x"})));
        assert!(!payload.has_fee);
        assert!(!payload.has_language_requirements);
        assert!(!payload.has_document_requirements);
        assert!(payload.exam_scores.is_empty());
    }

    #[test]
    fn embedding_text_tolerates_missing_fields() {
        let en = record(json!({"title": "Camp", "eligibility": "Ages 15-18"}));
        assert_eq!(en.embedding_text(), "Camp\n\nEligibility: Ages 15-18\n");
    }
}
