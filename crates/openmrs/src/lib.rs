//! OpenMRS wire/boundary support for the form engine.
//!
//! This crate provides **wire models** for the documents the form engine reads and writes:
//! - the declarative form schema (pages, sections, questions, behaviours, sub-forms)
//! - the encounter/obs/order resources returned by the EMR backend
//! - the payload fragments sent back when an encounter is saved
//!
//! This crate focuses on:
//! - serialisation/deserialisation with path-annotated error messages
//! - preserving unknown schema keys so resolved schemas round-trip to the UI unchanged
//! - small typed helpers (renderings, field types, identifiers, OpenMRS date formats)
//!
//! Resolution, intent handling and submission logic live in `forms-core`.

pub mod datetime;
pub mod encounter;
pub mod identifier;
pub mod payload;
pub mod schema;

pub use encounter::{EncounterProvider, OpenmrsEncounter, OpenmrsObs, OpenmrsOrder, OpenmrsResource};
pub use identifier::FormIdentifier;
pub use payload::{
    EncounterPayload, EncounterProviderPayload, ObsPayload, OrderPayload, ResultType,
    SubmissionState, SubmissionValue, ValidationResult,
};
pub use schema::{
    AnswerOption, BehaviourEntry, FieldMeta, FieldType, FormField, FormIntent, FormSchema,
    HideSpec, IntentDescriptor, Page, PreviousValue, QuestionOptions, ReferencedForm, Rendering,
    Section, SectionReference, SubformBehaviour, SubformRef, ValidatorConfig, WILDCARD_INTENT,
};

/// Errors returned by the `openmrs` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum OpenmrsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),
}

/// Type alias for Results that can fail with an [`OpenmrsError`].
pub type OpenmrsResult<T> = Result<T, OpenmrsError>;

/// Deserialize `T` from a JSON value, reporting the failing path on mismatch.
///
/// `what` names the document in the error message, e.g. `"Form schema"`.
pub(crate) fn from_value_with_path<T>(value: serde_json::Value, what: &str) -> OpenmrsResult<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        OpenmrsError::Translation(format!("{what} schema mismatch at {path}: {source}"))
    })
}

/// Deserialize `T` from JSON text, reporting the failing path on mismatch.
pub(crate) fn from_str_with_path<T>(text: &str, what: &str) -> OpenmrsResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let parsed = serde_path_to_error::deserialize::<_, T>(&mut deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        OpenmrsError::Translation(format!("{what} schema mismatch at {path}: {source}"))
    })?;
    deserializer.end()?;
    Ok(parsed)
}
