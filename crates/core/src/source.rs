//! Fetch collaborator for form definitions.
//!
//! Resolution only needs two calls from the EMR backend: look a form up by uuid or name, and
//! fetch the JSON body attached to that form. [`FormSource`] captures them so the resolver can
//! run against an HTTP client, a directory of files, or fixtures in tests.

use crate::constants::FORM_FILE_EXTENSION;
use crate::{FormError, FormResult};
use async_trait::async_trait;
use openmrs::FormIdentifier;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Form metadata as returned by a form lookup.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormMetadata {
    #[serde(default)]
    pub uuid: String,

    #[serde(default)]
    pub name: String,

    /// Pointer to the stored schema body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[async_trait]
pub trait FormSource: Send + Sync {
    /// Resolve a uuid or name to form metadata.
    async fn fetch_form(&self, identifier: &FormIdentifier) -> FormResult<FormMetadata>;

    /// Fetch the schema body of a form.
    ///
    /// `Ok(None)` means the form has no stored body; the caller must have raw JSON instead.
    async fn fetch_clob_data(&self, metadata: &FormMetadata) -> FormResult<Option<Value>>;
}

/// In-memory form source indexed by uuid and by name.
#[derive(Clone, Debug, Default)]
pub struct StaticFormSource {
    forms: Vec<(FormMetadata, Option<Value>)>,
    by_uuid: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl StaticFormSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema document, taking its metadata from the document's own `uuid`/`name`.
    ///
    /// A later form with the same uuid or name replaces the earlier one in lookups.
    pub fn insert(&mut self, schema: Value) -> FormResult<()> {
        let uuid = schema.get("uuid").and_then(Value::as_str).unwrap_or_default();
        let name = schema.get("name").and_then(Value::as_str).unwrap_or_default();
        if uuid.is_empty() && name.is_empty() {
            return Err(FormError::InvalidInput(
                "form document needs a uuid or a name".into(),
            ));
        }

        let metadata = FormMetadata {
            uuid: uuid.to_string(),
            name: name.to_string(),
            resource_uri: None,
            extra: Map::new(),
        };
        self.insert_with_metadata(metadata, Some(schema));
        Ok(())
    }

    /// Register a form with explicit metadata and an optional body.
    pub fn insert_with_metadata(&mut self, metadata: FormMetadata, body: Option<Value>) {
        let index = self.forms.len();
        if !metadata.uuid.is_empty() {
            self.by_uuid.insert(metadata.uuid.to_ascii_lowercase(), index);
        }
        if !metadata.name.is_empty() {
            self.by_name.insert(metadata.name.clone(), index);
        }
        self.forms.push((metadata, body));
    }

    /// Load every `*.json` file in `dir` as a form document.
    pub fn load_dir(dir: &Path) -> FormResult<Self> {
        let mut source = Self::new();
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(FormError::FileRead)? {
            let path = entry.map_err(FormError::FileRead)?.path();
            if path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(FORM_FILE_EXTENSION)
            {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let contents = fs::read_to_string(&path).map_err(FormError::FileRead)?;
            let schema: Value = serde_json::from_str(&contents).map_err(|source| {
                FormError::FileParse {
                    path: path.clone(),
                    source,
                }
            })?;
            source.insert(schema)?;
        }

        tracing::debug!("loaded {} form(s) from {}", source.len(), dir.display());
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Metadata of every registered form, in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &FormMetadata> {
        self.forms.iter().map(|(metadata, _)| metadata)
    }

    fn position(&self, identifier: &FormIdentifier) -> Option<usize> {
        match identifier {
            FormIdentifier::Uuid(uuid) => self.by_uuid.get(&uuid.hyphenated().to_string()).copied(),
            FormIdentifier::Name(name) => self
                .by_name
                .get(name)
                .or_else(|| self.by_uuid.get(&name.to_ascii_lowercase()))
                .copied(),
        }
    }
}

#[async_trait]
impl FormSource for StaticFormSource {
    async fn fetch_form(&self, identifier: &FormIdentifier) -> FormResult<FormMetadata> {
        let index = self
            .position(identifier)
            .ok_or_else(|| FormError::FormNotFound(identifier.to_string()))?;
        Ok(self.forms[index].0.clone())
    }

    async fn fetch_clob_data(&self, metadata: &FormMetadata) -> FormResult<Option<Value>> {
        let index = self
            .by_uuid
            .get(&metadata.uuid.to_ascii_lowercase())
            .or_else(|| self.by_name.get(&metadata.name))
            .copied();
        Ok(index.and_then(|index| self.forms[index].1.clone()))
    }
}
