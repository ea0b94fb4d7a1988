use serde::Serialize;
use serde_json::{Map, Value};

pub const ALLOWED_METADATA_KEYS: [&str; 7] = [
    "filename",
    "filetype",
    "page_number",
    "category",
    "languages",
    "parent_id",
    "is_continuation",
];

/// Element metadata restricted to the keys the index mapping declares.
/// Values are copied verbatim from the parser once they pass [`is_meaningful`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SanitizedMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filetype: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_continuation: Option<Value>,
}

impl SanitizedMetadata {
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(Value::String(filename.to_string()));
        self
    }

    /// Keys that carry a value, in mapping order.
    pub fn keys(&self) -> Vec<&'static str> {
        ALLOWED_METADATA_KEYS
            .iter()
            .copied()
            .filter(|key| self.get(key).is_some())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match key {
            "filename" => self.filename.as_ref(),
            "filetype" => self.filetype.as_ref(),
            "page_number" => self.page_number.as_ref(),
            "category" => self.category.as_ref(),
            "languages" => self.languages.as_ref(),
            "parent_id" => self.parent_id.as_ref(),
            "is_continuation" => self.is_continuation.as_ref(),
            _ => None,
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<Value>> {
        match key {
            "filename" => Some(&mut self.filename),
            "filetype" => Some(&mut self.filetype),
            "page_number" => Some(&mut self.page_number),
            "category" => Some(&mut self.category),
            "languages" => Some(&mut self.languages),
            "parent_id" => Some(&mut self.parent_id),
            "is_continuation" => Some(&mut self.is_continuation),
            _ => None,
        }
    }
}

/// Total: never fails, silently drops unknown keys and empty values.
pub fn sanitize(raw: &Map<String, Value>) -> SanitizedMetadata {
    let mut clean = SanitizedMetadata::default();

    for key in ALLOWED_METADATA_KEYS {
        let Some(value) = raw.get(key) else {
            continue;
        };
        if !is_meaningful(value) {
            continue;
        }
        if let Some(slot) = clean.slot_mut(key) {
            *slot = Some(value.clone());
        }
    }

    clean
}

fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Number(number) => !number.as_f64().is_some_and(f64::is_nan),
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    }
}
