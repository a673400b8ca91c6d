//! Patient and consultation collections.
//!
//! Both collections share one loader: build the query from the non-blank
//! filters, fetch, normalize whichever response shape came back into a
//! `ResourcePage`, and replace the held page wholesale.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::gateway::{path_with_query, ApiGateway};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Unexpected list response: expected an array or a paginated object")]
    UnexpectedShape,

    #[error("Could not read list items: {0}")]
    Items(#[from] serde_json::Error),
}

/// One named text input, used for filters and creation forms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: &'static str,
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<Field>,
}

impl FieldSet {
    pub fn new(spec: &[(&'static str, &'static str)]) -> Self {
        Self {
            fields: spec
                .iter()
                .map(|&(key, label)| Field { key, label, value: String::new() })
                .collect(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.key == key).map(|f| f.value.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(field) => {
                field.value = value.into();
                true
            }
            None => false,
        }
    }

    pub fn value_mut(&mut self, index: usize) -> Option<&mut String> {
        self.fields.get_mut(index).map(|f| &mut f.value)
    }

    pub fn clear(&mut self) {
        for field in &mut self.fields {
            field.value.clear();
        }
    }

    /// Trimmed key/value pairs, blank values left out entirely
    pub fn non_blank(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .map(|f| (f.key, f.value.trim()))
            .filter(|(_, v)| !v.is_empty())
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.key.to_string(), Value::String(f.value.trim().to_string())))
            .collect();
        Value::Object(map)
    }
}

pub trait Resource: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection path, e.g. `/patients/`
    const COLLECTION: &'static str;
    const LABEL: &'static str;

    fn id(&self) -> i64;
    fn filter_fields() -> FieldSet;
    fn draft_fields() -> FieldSet;

    fn draft_body(draft: &FieldSet) -> Value {
        draft.to_json()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Resource for Patient {
    const COLLECTION: &'static str = "/patients/";
    const LABEL: &'static str = "Patient";

    fn id(&self) -> i64 {
        self.id
    }

    fn filter_fields() -> FieldSet {
        FieldSet::new(&[
            ("full_name", "Name contains"),
            ("email", "Email"),
            ("date_of_birth_from", "Born from (YYYY-MM-DD)"),
            ("date_of_birth_to", "Born to (YYYY-MM-DD)"),
        ])
    }

    fn draft_fields() -> FieldSet {
        FieldSet::new(&[
            ("full_name", "Full name"),
            ("date_of_birth", "Date of birth (YYYY-MM-DD)"),
            ("email", "Email"),
        ])
    }
}

/// The patient a consultation belongs to, as the server chose to render it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatientRef {
    Id(i64),
    Record {
        id: i64,
        #[serde(default)]
        full_name: String,
    },
    Name(String),
}

impl std::fmt::Display for PatientRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatientRef::Id(id) => write!(f, "#{}", id),
            PatientRef::Record { id, full_name } if full_name.is_empty() => write!(f, "#{}", id),
            PatientRef::Record { id, full_name } => write!(f, "{} (#{})", full_name, id),
            PatientRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consultation {
    pub id: i64,
    #[serde(default)]
    pub patient: Option<PatientRef>,
    #[serde(default)]
    pub symptoms: String,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub summary_status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Resource for Consultation {
    const COLLECTION: &'static str = "/consultations/";
    const LABEL: &'static str = "Consultation";

    fn id(&self) -> i64 {
        self.id
    }

    fn filter_fields() -> FieldSet {
        FieldSet::new(&[
            ("patient_id", "Patient ID"),
            ("created_at_from", "Created from (YYYY-MM-DD)"),
            ("created_at_to", "Created to (YYYY-MM-DD)"),
        ])
    }

    fn draft_fields() -> FieldSet {
        FieldSet::new(&[
            ("patient", "Patient ID"),
            ("symptoms", "Symptoms"),
            ("diagnosis", "Diagnosis"),
        ])
    }

    fn draft_body(draft: &FieldSet) -> Value {
        let mut body = draft.to_json();
        // Send the patient id as a number when it is one
        if let Some(id) = draft.get("patient").and_then(|p| p.trim().parse::<i64>().ok()) {
            body["patient"] = Value::from(id);
        }
        body
    }
}

/// One fetched page of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePage<R> {
    pub items: Vec<R>,
    pub total_count: u64,
    pub has_next: bool,
    pub has_previous: bool,
    pub page_number: u32,
}

impl<R> Default for ResourcePage<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            has_next: false,
            has_previous: false,
            page_number: 1,
        }
    }
}

#[derive(Deserialize)]
struct Envelope<R> {
    results: Vec<R>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    previous: Option<String>,
}

impl<R: DeserializeOwned> ResourcePage<R> {
    /// Normalize either a bare array or a `{results, count, next, previous}`
    /// envelope into a page.
    pub fn from_response(value: Value, page_number: u32) -> Result<Self, PageError> {
        match value {
            Value::Array(_) => {
                let items: Vec<R> = serde_json::from_value(value)?;
                Ok(Self {
                    total_count: items.len() as u64,
                    items,
                    has_next: false,
                    has_previous: false,
                    page_number,
                })
            }
            Value::Object(ref map) if map.contains_key("results") => {
                let envelope: Envelope<R> = serde_json::from_value(value)?;
                Ok(Self {
                    total_count: envelope.count.unwrap_or(envelope.results.len() as u64),
                    items: envelope.results,
                    has_next: envelope.next.is_some(),
                    has_previous: envelope.previous.is_some(),
                    page_number,
                })
            }
            _ => Err(PageError::UnexpectedShape),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceList<R: Resource> {
    pub page: ResourcePage<R>,
    pub filters: FieldSet,
    pub draft: FieldSet,
}

impl<R: Resource> Default for ResourceList<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> ResourceList<R> {
    pub fn new() -> Self {
        Self {
            page: ResourcePage::default(),
            filters: R::filter_fields(),
            draft: R::draft_fields(),
        }
    }

    pub fn items(&self) -> &[R] {
        &self.page.items
    }

    /// Collection path with the page number and non-blank filters
    pub fn list_path(&self, page_number: u32) -> String {
        let page = page_number.to_string();
        let mut pairs = vec![("page", page.as_str())];
        pairs.extend(self.filters.non_blank());
        path_with_query(R::COLLECTION, &pairs)
    }

    /// Fetch one page. `None` when the request failed or the body could not
    /// be normalized; the message has been published either way.
    pub async fn fetch(gateway: &ApiGateway, path: &str, page_number: u32) -> Option<ResourcePage<R>> {
        let response = gateway.get(path).await;
        if !response.ok {
            return None;
        }

        let result = match response.into_json() {
            Some(value) => ResourcePage::from_response(value, page_number),
            None => Err(PageError::UnexpectedShape),
        };

        match result {
            Ok(page) => {
                debug!(path, items = page.items.len(), total = page.total_count, "page loaded");
                Some(page)
            }
            Err(e) => {
                warn!(path, error = %e, "could not normalize list response");
                gateway.context().publish_error(e.to_string());
                None
            }
        }
    }

    pub fn apply_page(&mut self, page: ResourcePage<R>) {
        self.page = page;
    }

    /// Load a page with the current filters; a failure leaves the held page as is
    pub async fn load(&mut self, gateway: &ApiGateway, page_number: u32) -> bool {
        let path = self.list_path(page_number);
        match Self::fetch(gateway, &path, page_number).await {
            Some(page) => {
                self.apply_page(page);
                true
            }
            None => false,
        }
    }

    pub fn create_body(&self) -> Value {
        R::draft_body(&self.draft)
    }

    pub async fn submit(gateway: &ApiGateway, body: &Value) -> Option<R> {
        let response = gateway.post(R::COLLECTION, Some(body)).await;
        if !response.ok {
            return None;
        }

        let created = response
            .into_json()
            .map(serde_json::from_value::<R>)
            .transpose()
            .ok()
            .flatten();

        if created.is_none() {
            warn!(collection = R::COLLECTION, "created record could not be read back");
            gateway
                .context()
                .publish_error(format!("{} saved, but the response could not be read", R::LABEL));
        }
        created
    }

    /// Put a freshly created record at the top and reset the form
    pub fn apply_created(&mut self, item: R) {
        self.page.items.insert(0, item);
        self.page.total_count += 1;
        self.draft.clear();
    }

    /// Submit the draft; on failure the draft stays for correction
    pub async fn create(&mut self, gateway: &ApiGateway) -> bool {
        let body = self.create_body();
        match Self::submit(gateway, &body).await {
            Some(item) => {
                self.apply_created(item);
                true
            }
            None => false,
        }
    }

    pub fn next_page(&self) -> Option<u32> {
        self.page.has_next.then(|| self.page.page_number + 1)
    }

    pub fn previous_page(&self) -> Option<u32> {
        (self.page.has_previous && self.page.page_number > 1).then(|| self.page.page_number - 1)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
