//! Form schema wire model.
//!
//! This module defines the JSON representation of a clinical form: the root [`FormSchema`],
//! its [`Page`]s, [`Section`]s and questions ([`FormField`]), and the intent-keyed
//! [`BehaviourEntry`] overrides that the intent engine flattens onto them.
//!
//! Responsibilities:
//! - Define the persisted schema shape (field names follow the camelCase JSON keys).
//! - Keep every key the model does not name in an `extra` map, so a resolved schema can be handed
//!   back to a renderer without losing renderer-specific options.
//! - Accept the loose booleans found in real schemas (`"isExpanded": "true"`).
//!
//! Notes:
//! - `FormField::meta` is runtime state and never serialised.
//! - The legacy `encounter` key is kept as read; `forms-core` moves it into `encounterType`.

use crate::encounter::{OpenmrsObs, OpenmrsOrder};
use crate::payload::SubmissionState;
use crate::{from_str_with_path, from_value_with_path, OpenmrsResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Intent name matched by behaviour entries that apply to every intent.
pub const WILDCARD_INTENT: &str = "*";

// ============================================================================
// Root document
// ============================================================================

/// Root form schema document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_type: Option<String>,

    /// Legacy spelling of `encounterType`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_forms: Vec<ReferencedForm>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_intents: Vec<IntentDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_page: Option<String>,

    #[serde(default)]
    pub pages: Vec<Page>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translations: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_submission_actions: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FormSchema {
    /// Parse a form schema from JSON text.
    ///
    /// Uses `serde_path_to_error` so a mismatch reports the failing location, for example
    /// `pages[0].sections[1].questions`.
    pub fn parse(json_text: &str) -> OpenmrsResult<Self> {
        from_str_with_path(json_text, "Form")
    }

    /// Deserialize a form schema from an already-parsed JSON value.
    pub fn from_value(value: Value) -> OpenmrsResult<Self> {
        from_value_with_path(value, "Form")
    }

    /// The encounter type, falling back to the legacy `encounter` key.
    pub fn effective_encounter_type(&self) -> Option<&str> {
        self.encounter_type
            .as_deref()
            .or(self.encounter.as_deref())
    }

    /// Move a legacy `encounter` value into `encounterType`.
    ///
    /// The legacy key is removed whenever it was copied; an explicit `encounterType` wins and the
    /// legacy key is then left untouched.
    pub fn normalize_encounter_type(&mut self) {
        if self.encounter_type.is_none() {
            if let Some(legacy) = self.encounter.take() {
                self.encounter_type = Some(legacy);
            }
        }
    }

    /// Iterate over every top-level question on every page and section.
    pub fn fields(&self) -> impl Iterator<Item = &FormField> {
        self.pages
            .iter()
            .flat_map(|page| page.sections.iter())
            .flat_map(|section| section.questions.iter())
    }

    /// Mutable counterpart of [`FormSchema::fields`].
    pub fn fields_mut(&mut self) -> impl Iterator<Item = &mut FormField> {
        self.pages
            .iter_mut()
            .flat_map(|page| page.sections.iter_mut())
            .flat_map(|section| section.questions.iter_mut())
    }

    /// Look up the descriptor for a named intent.
    pub fn intent(&self, name: &str) -> Option<&IntentDescriptor> {
        self.available_intents
            .iter()
            .find(|candidate| candidate.intent == name)
    }
}

/// Reusable form component declared at the schema root.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferencedForm {
    pub form_name: String,
    pub alias: String,
}

/// Entry of `availableIntents`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentDescriptor {
    pub intent: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_page: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The intent a session was opened with.
///
/// Callers hand either a bare intent name or a full descriptor; both match behaviour entries by
/// the intent name.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FormIntent {
    Name(String),
    Descriptor(IntentDescriptor),
}

impl FormIntent {
    pub fn name(&self) -> &str {
        match self {
            FormIntent::Name(name) => name,
            FormIntent::Descriptor(descriptor) => &descriptor.intent,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.name() == WILDCARD_INTENT
    }
}

impl Default for FormIntent {
    fn default() -> Self {
        FormIntent::Name(WILDCARD_INTENT.to_string())
    }
}

impl From<&str> for FormIntent {
    fn from(name: &str) -> Self {
        FormIntent::Name(name.to_string())
    }
}

impl From<String> for FormIntent {
    fn from(name: String) -> Self {
        FormIntent::Name(name)
    }
}

impl From<IntentDescriptor> for FormIntent {
    fn from(descriptor: IntentDescriptor) -> Self {
        FormIntent::Descriptor(descriptor)
    }
}

impl fmt::Display for FormIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Pages and sections
// ============================================================================

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub sections: Vec<Section>,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub is_subform: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subform: Option<SubformRef>,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub is_hidden: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<HideSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviours: Option<Vec<BehaviourEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Page {
    /// The embedded form when this page is a resolved sub-form.
    pub fn subform_schema(&self) -> Option<&FormSchema> {
        if !self.is_subform {
            return None;
        }
        self.subform.as_ref()?.form.as_deref()
    }

    /// Name of a sub-form that has not been resolved yet.
    pub fn unresolved_subform_name(&self) -> Option<&str> {
        if !self.is_subform {
            return None;
        }
        let subform = self.subform.as_ref()?;
        if subform.form.is_some() {
            return None;
        }
        subform.name.as_deref()
    }
}

/// Reference from a page to an embedded sub-form.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubformRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<Box<FormSchema>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviours: Option<Vec<SubformBehaviour>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-intent instructions for an embedded sub-form.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubformBehaviour {
    pub intent: String,

    /// Intent to resolve the embedded form with.
    #[serde(default, rename = "subform_intent", skip_serializing_if = "Option::is_none")]
    pub subform_intent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub questions: Vec<FormField>,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub is_expanded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<SectionReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<HideSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviours: Option<Vec<BehaviourEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pointer from a section to a section of a form component.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionReference {
    /// Component name or alias.
    pub form: String,
    pub page: String,
    pub section: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_questions: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HideSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_when_expression: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Intent-keyed override block found on questions, sections and pages.
///
/// Everything except `intent` is kept as-is; the keys the engine knows about are `required`,
/// `unspecified`, `hide`, `validators`, `defaultValue` and `readonly`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BehaviourEntry {
    pub intent: String,

    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl BehaviourEntry {
    pub fn is_wildcard(&self) -> bool {
        self.intent == WILDCARD_INTENT
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

// ============================================================================
// Questions
// ============================================================================

/// A question rendered as a form control.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub question_options: QuestionOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unspecified: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<HideSpec>,

    /// Evaluated visibility, set by the renderer.
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub is_hidden: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validators: Option<Vec<ValidatorConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviours: Option<Vec<BehaviourEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<FormField>>,

    #[serde(skip)]
    pub meta: FieldMeta,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FormField {
    pub fn kind(&self) -> FieldType {
        FieldType::parse(&self.field_type)
    }

    pub fn rendering(&self) -> Rendering {
        Rendering::parse(&self.question_options.rendering)
    }

    /// Concept reference for the question: `questionOptions.concept`, else the first concept
    /// mapping rendered as `SOURCE:code`.
    pub fn concept(&self) -> Option<String> {
        if let Some(concept) = self.question_options.concept.as_deref() {
            return Some(concept.to_string());
        }
        self.question_options
            .concept_mappings
            .iter()
            .find_map(|mapping| {
                let source = mapping.get("type").or_else(|| mapping.get("source"))?.as_str()?;
                let code = mapping.get("value").or_else(|| mapping.get("code"))?;
                let code = match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some(format!("{source}:{code}"))
            })
    }

    /// `namespace-id`, the key used to correlate the field with persisted obs.
    pub fn form_field_path(&self, namespace: &str) -> String {
        format!("{namespace}-{}", self.id)
    }

    /// Whether the question must be answered.
    ///
    /// Only literal `true`/`"true"` count; conditional requirement objects are evaluated by the
    /// renderer, which records the outcome in `isRequired`.
    pub fn is_required(&self) -> bool {
        self.is_required
            .unwrap_or_else(|| self.required.as_ref().is_some_and(is_truthy))
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.as_ref().is_some_and(is_truthy)
    }

    /// Transient questions are rendered but never persisted.
    pub fn is_transient(&self) -> bool {
        self.question_options
            .extra
            .get("isTransient")
            .is_some_and(is_truthy)
    }

    pub fn children(&self) -> &[FormField] {
        self.questions.as_deref().unwrap_or_default()
    }

    pub fn children_mut(&mut self) -> &mut [FormField] {
        self.questions.as_deref_mut().unwrap_or_default()
    }

    /// Set a top-level question property by its JSON key.
    ///
    /// Keys the model names are written to their typed field; anything else lands in `extra`.
    /// A value of the wrong shape for a typed field is kept in `extra` under the same key so it is
    /// not lost.
    pub fn set_property(&mut self, key: &str, value: Value) {
        match key {
            "required" => self.required = Some(value),
            "unspecified" => self.unspecified = Some(value),
            "readonly" => self.readonly = Some(value),
            "label" => match value {
                Value::String(label) => self.label = Some(label),
                other => {
                    self.extra.insert(key.to_string(), other);
                }
            },
            "isRequired" => match value.as_bool() {
                Some(flag) => self.is_required = Some(flag),
                None => {
                    self.extra.insert(key.to_string(), value);
                }
            },
            "hide" => match serde_json::from_value::<HideSpec>(value.clone()) {
                Ok(hide) => self.hide = Some(hide),
                Err(_) => {
                    self.extra.insert(key.to_string(), value);
                }
            },
            "validators" => match serde_json::from_value::<Vec<ValidatorConfig>>(value.clone()) {
                Ok(validators) => self.validators = Some(validators),
                Err(_) => {
                    self.extra.insert(key.to_string(), value);
                }
            },
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }
}

/// Rendering and data options of a question.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOptions {
    #[serde(default)]
    pub rendering: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept_mappings: Vec<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<AnswerOption>,

    /// Orderable tests for `testOrder` questions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectable_orders: Vec<AnswerOption>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QuestionOptions {
    /// Label of the answer (or orderable) with the given concept.
    pub fn answer_label(&self, concept: &str) -> Option<&str> {
        self.answers
            .iter()
            .chain(self.selectable_orders.iter())
            .find(|answer| answer.concept == concept)
            .and_then(|answer| answer.label.as_deref())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub concept: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validator declaration, e.g. `{"type": "date", "allowFutureDates": "true"}`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ValidatorConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ValidatorConfig {
    pub fn flag(&self, key: &str) -> bool {
        self.options.get(key).is_some_and(is_truthy)
    }
}

// ============================================================================
// Runtime field state
// ============================================================================

/// Runtime state attached to a question while a form is being filled in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMeta {
    /// Concept details fetched for display.
    pub concept: Option<Value>,

    /// Pending mutation for this field, consumed at save time.
    pub submission: Option<SubmissionState>,

    /// What was persisted before this session, for edit-mode diffing.
    pub previous_value: Option<PreviousValue>,
}

/// Persisted value a field was hydrated from.
#[derive(Clone, Debug, PartialEq)]
pub enum PreviousValue {
    Obs(OpenmrsObs),
    ObsList(Vec<OpenmrsObs>),
    Order(OpenmrsOrder),
}

// ============================================================================
// Typed tags
// ============================================================================

/// Question `type` tags the engine dispatches on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Obs,
    ObsGroup,
    TestOrder,
    EncounterLocation,
    EncounterProvider,
    EncounterRole,
    EncounterDatetime,
    Markdown,
    Other(String),
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "obs" => FieldType::Obs,
            "obsGroup" => FieldType::ObsGroup,
            "testOrder" => FieldType::TestOrder,
            "encounterLocation" => FieldType::EncounterLocation,
            "encounterProvider" => FieldType::EncounterProvider,
            "encounterRole" => FieldType::EncounterRole,
            "encounterDatetime" => FieldType::EncounterDatetime,
            "markdown" => FieldType::Markdown,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Obs => "obs",
            FieldType::ObsGroup => "obsGroup",
            FieldType::TestOrder => "testOrder",
            FieldType::EncounterLocation => "encounterLocation",
            FieldType::EncounterProvider => "encounterProvider",
            FieldType::EncounterRole => "encounterRole",
            FieldType::EncounterDatetime => "encounterDatetime",
            FieldType::Markdown => "markdown",
            FieldType::Other(other) => other,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `questionOptions.rendering` values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rendering {
    Text,
    Textarea,
    Number,
    Date,
    Datetime,
    Radio,
    Select,
    Checkbox,
    ContentSwitcher,
    Toggle,
    UiSelectExtended,
    Group,
    Repeating,
    Markdown,
    Other(String),
}

impl Rendering {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "text" => Rendering::Text,
            "textarea" => Rendering::Textarea,
            "number" => Rendering::Number,
            "date" => Rendering::Date,
            "datetime" => Rendering::Datetime,
            "radio" => Rendering::Radio,
            "select" => Rendering::Select,
            "checkbox" | "multiCheckbox" => Rendering::Checkbox,
            "content-switcher" => Rendering::ContentSwitcher,
            "toggle" => Rendering::Toggle,
            "ui-select-extended" => Rendering::UiSelectExtended,
            "group" => Rendering::Group,
            "repeating" => Rendering::Repeating,
            "markdown" => Rendering::Markdown,
            other => Rendering::Other(other.to_string()),
        }
    }

    /// Answers are concept uuids.
    pub fn is_coded(&self) -> bool {
        matches!(
            self,
            Rendering::Radio
                | Rendering::Select
                | Rendering::Checkbox
                | Rendering::ContentSwitcher
                | Rendering::Toggle
        )
    }

    /// One obs per selected answer.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, Rendering::Checkbox)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Rendering::Date | Rendering::Datetime)
    }
}

// ============================================================================
// Helpers (internal)
// ============================================================================

/// `true`, `"true"` (any case) and non-zero numbers.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Accept `true`, `"true"`, `false`, `"false"` and `null`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(flag),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got \"{other}\""
            ))),
        },
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {other}"
        ))),
    }
}
