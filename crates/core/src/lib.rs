//! # Forms Core
//!
//! Core logic of the clinical form engine.
//!
//! This crate contains everything between a stored form definition and an encounter payload:
//! - Registry lookup of packaged forms with semver version selection
//! - Schema resolution: sub-forms, form components and inlining of same-encounter sub-forms
//! - Intent behaviours flattened onto a resolved schema
//! - Field hydration from an existing encounter and obs/order diffing at submission time
//!
//! **No transport concerns**: HTTP servers and the command line live in `api-rest` and `cli`.
//! Wire shapes (schemas, encounters, payloads) live in the `openmrs` crate.

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod handlers;
pub mod intent;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod source;
pub mod submission;
pub mod validation;

pub use config::CoreConfig;
pub use context::{AmbientDefaults, EncounterContext, SessionMode};
pub use error::{FormError, FormResult};
pub use handlers::{HandlerRegistry, Hydrated, SubmissionHandler};
pub use intent::{apply_form_intent, BehaviourOverride, OverrideScope};
pub use registry::{FormJsonFile, FormRegistry};
pub use resolver::{FormJsonState, FormLoader};
pub use session::FormSession;
pub use source::{FormMetadata, FormSource, StaticFormSource};
pub use submission::prepare_encounter;
pub use validation::{FieldValidator, ValidatorRegistry};

pub use openmrs::{FormIdentifier, FormIntent, FormSchema};
