//! Property-list metadata read from a package's `Metadata/` files:
//! `Properties.plist`, `DocumentIdentifier`, `BuildVersionHistory.plist`.

use std::collections::HashMap;
use std::path::Path;

use plist::Value;

use crate::content_store::ContentStore;

/// A single property-list scalar or container value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Date(String),
    Array(Vec<PropertyValue>),
    Dictionary(HashMap<String, PropertyValue>),
}

impl From<&Value> for PropertyValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::Integer(i) => PropertyValue::Integer(i.as_signed().unwrap_or(0)),
            Value::Real(r) => PropertyValue::Real(*r),
            Value::Boolean(b) => PropertyValue::Boolean(*b),
            Value::Date(d) => PropertyValue::Date(format!("{:?}", d)),
            Value::Array(arr) => PropertyValue::Array(arr.iter().map(PropertyValue::from).collect()),
            Value::Dictionary(dict) => {
                let mut map = HashMap::new();
                for (k, v) in dict {
                    map.insert(k.clone(), PropertyValue::from(v));
                }
                PropertyValue::Dictionary(map)
            },
            Value::Data(_) => PropertyValue::String("<binary data>".to_string()),
            _ => PropertyValue::String("<unknown>".to_string()),
        }
    }
}

/// Metadata read from a package's `Metadata/` directory. Missing optional
/// files are tolerated silently — a document loads with empty metadata
/// rather than failing.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub has_properties: bool,
    pub has_build_version_history: bool,
    pub has_document_identifier: bool,
    pub properties: HashMap<String, PropertyValue>,
    pub build_versions: Vec<String>,
    pub document_id: Option<String>,
}

impl Metadata {
    /// Reads metadata from a bundle directory's `Metadata/` subdirectory.
    pub fn from_directory(metadata_dir: &Path) -> Self {
        let mut metadata = Metadata::default();
        if !metadata_dir.exists() {
            return metadata;
        }

        if let Ok(value) = Value::from_file(metadata_dir.join("Properties.plist")) {
            metadata.has_properties = true;
            metadata.properties = parse_plist_dictionary(&value);
        }

        if let Ok(value) = Value::from_file(metadata_dir.join("BuildVersionHistory.plist")) {
            metadata.has_build_version_history = true;
            metadata.build_versions = parse_build_versions(&value);
        }

        if let Ok(id) = std::fs::read_to_string(metadata_dir.join("DocumentIdentifier")) {
            metadata.has_document_identifier = true;
            metadata.document_id = Some(id.trim().to_string());
        }

        metadata
    }

    /// Reads metadata from a zipped package's `Metadata/` entry prefix.
    pub fn from_zip_prefix(store: &dyn ContentStore, prefix: &str) -> Self {
        let mut metadata = Metadata::default();

        if let Ok(bytes) = store.read(&format!("{prefix}Properties.plist")) {
            if let Ok(value) = Value::from_reader(std::io::Cursor::new(bytes)) {
                metadata.has_properties = true;
                metadata.properties = parse_plist_dictionary(&value);
            }
        }

        if let Ok(bytes) = store.read(&format!("{prefix}BuildVersionHistory.plist")) {
            if let Ok(value) = Value::from_reader(std::io::Cursor::new(bytes)) {
                metadata.has_build_version_history = true;
                metadata.build_versions = parse_build_versions(&value);
            }
        }

        if let Ok(bytes) = store.read(&format!("{prefix}DocumentIdentifier")) {
            if let Ok(id) = String::from_utf8(bytes) {
                metadata.has_document_identifier = true;
                metadata.document_id = Some(id.trim().to_string());
            }
        }

        metadata
    }

    pub fn property_string(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            PropertyValue::String(s) => Some(s.clone()),
            PropertyValue::Integer(i) => Some(i.to_string()),
            PropertyValue::Real(r) => Some(r.to_string()),
            PropertyValue::Boolean(b) => Some(b.to_string()),
            PropertyValue::Date(d) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn document_identifier(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn latest_build_version(&self) -> Option<&str> {
        self.build_versions.last().map(String::as_str)
    }
}

fn parse_plist_dictionary(value: &Value) -> HashMap<String, PropertyValue> {
    let mut result = HashMap::new();
    if let Value::Dictionary(dict) = value {
        for (key, val) in dict {
            result.insert(key.clone(), PropertyValue::from(val));
        }
    }
    result
}

fn parse_build_versions(value: &Value) -> Vec<String> {
    let mut versions = Vec::new();
    if let Value::Array(arr) = value {
        for item in arr {
            match item {
                Value::String(version) => versions.push(version.clone()),
                Value::Dictionary(dict) => {
                    if let Some(Value::String(version)) = dict.get("Version") {
                        versions.push(version.clone());
                    } else if let Some(Value::String(build)) = dict.get("Build") {
                        versions.push(build.clone());
                    }
                },
                _ => {},
            }
        }
    }
    versions
}
