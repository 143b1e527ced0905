//! Submission handlers.
//!
//! Every question `type` that maps to persisted data has a [`SubmissionHandler`]. Handlers seed a
//! field from a previously saved encounter, diff the user's value against what was saved, and
//! park the resulting payload fragments on `field.meta.submission`.
//!
//! Responsibilities:
//! - [`HandlerRegistry`] dispatches by [`FieldType`]. Types without a handler are no-ops.
//! - [`HandlerRegistry::hydrate_schema`] seeds every question of a form; obs-group children are
//!   hydrated against the members of their group obs.
//!
//! Notes:
//! - Handlers are stateless. Everything a session accumulates (claimed obs and orders,
//!   encounter-level values) lives in the [`EncounterContext`] passed to each call.

mod encounter;
mod obs;
mod obs_group;
mod order;

pub use encounter::{
    EncounterDatetimeHandler, EncounterLocationSubmissionHandler, EncounterProviderHandler,
    EncounterRoleHandler,
};
pub use obs::{find_obs_by_form_field, has_previous_obs_value_changed, ObsSubmissionHandler};
pub use obs_group::ObsGroupHandler;
pub use order::TestOrderSubmissionHandler;

use crate::context::EncounterContext;
use openmrs::{FieldType, FormField, FormSchema, OpenmrsEncounter, PreviousValue};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Initial value of a field and the persisted record it came from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hydrated {
    pub value: Value,
    pub previous_value: Option<PreviousValue>,
}

impl Hydrated {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            previous_value: None,
        }
    }
}

/// Per-type strategy for moving a field between UI values and persisted records.
pub trait SubmissionHandler: Send + Sync {
    /// Record the pending mutation for `value` on `field.meta.submission`.
    ///
    /// Returns the value the UI should keep for the field.
    fn handle_field_submission(
        &self,
        field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value;

    /// Value to seed the control with. `encounter` is `None` for a new encounter.
    ///
    /// Records matched here are claimed in `ctx` so no other field binds them.
    fn get_initial_value(
        &self,
        encounter: Option<&OpenmrsEncounter>,
        field: &FormField,
        all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated;

    /// Human readable rendering of `value`. `null` is returned unchanged.
    fn get_display_value(&self, field: &FormField, value: &Value) -> Value;

    /// Persisted value of the field in `encounter`, in the shape the UI uses.
    fn get_previous_value(
        &self,
        field: &FormField,
        encounter: &OpenmrsEncounter,
        all_fields: &[FormField],
        ctx: &EncounterContext,
    ) -> Option<Value>;
}

/// Handlers keyed by question type.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<FieldType, Arc<dyn SubmissionHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(FieldType::Obs, Arc::new(ObsSubmissionHandler));
        registry.register(FieldType::ObsGroup, Arc::new(ObsGroupHandler));
        registry.register(FieldType::TestOrder, Arc::new(TestOrderSubmissionHandler));
        registry.register(
            FieldType::EncounterLocation,
            Arc::new(EncounterLocationSubmissionHandler),
        );
        registry.register(FieldType::EncounterProvider, Arc::new(EncounterProviderHandler));
        registry.register(FieldType::EncounterRole, Arc::new(EncounterRoleHandler));
        registry.register(FieldType::EncounterDatetime, Arc::new(EncounterDatetimeHandler));
        registry
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(FieldType::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry").field("handlers", &kinds).finish()
    }
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register or replace the handler for `kind`.
    pub fn register(&mut self, kind: FieldType, handler: Arc<dyn SubmissionHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: &FieldType) -> Option<&dyn SubmissionHandler> {
        self.handlers.get(kind).map(Arc::as_ref)
    }

    /// Seed every field, recursively, from `encounter`.
    ///
    /// Previous values are stored on `field.meta.previous_value`; the returned map holds the
    /// initial UI value of each field that has a handler, keyed by field id. `fields` is the
    /// whole question set used for obs matching; use [`HandlerRegistry::hydrate_schema`] when
    /// the questions span several sections.
    pub fn hydrate_fields(
        &self,
        fields: &mut [FormField],
        encounter: Option<&OpenmrsEncounter>,
        ctx: &mut EncounterContext,
    ) -> BTreeMap<String, Value> {
        let all_fields = fields.to_vec();
        let mut values = BTreeMap::new();
        for field in fields.iter_mut() {
            self.hydrate_field(field, &all_fields, encounter, ctx, &mut values);
        }
        values
    }

    /// Seed every question of `schema` from `encounter`.
    ///
    /// Obs matching sees every question on every page, so a saved obs whose `formFieldPath`
    /// names a question in another section is never bound by concept to this one.
    pub fn hydrate_schema(
        &self,
        schema: &mut FormSchema,
        encounter: Option<&OpenmrsEncounter>,
        ctx: &mut EncounterContext,
    ) -> BTreeMap<String, Value> {
        let all_fields: Vec<FormField> = schema.fields().cloned().collect();
        let mut values = BTreeMap::new();
        for field in schema.fields_mut() {
            self.hydrate_field(field, &all_fields, encounter, ctx, &mut values);
        }
        values
    }

    fn hydrate_field(
        &self,
        field: &mut FormField,
        all_fields: &[FormField],
        encounter: Option<&OpenmrsEncounter>,
        ctx: &mut EncounterContext,
        values: &mut BTreeMap<String, Value>,
    ) {
        if let Some(handler) = self.get(&field.kind()) {
            let hydrated = handler.get_initial_value(encounter, field, all_fields, ctx);
            field.meta.previous_value = hydrated.previous_value;
            values.insert(field.id.clone(), hydrated.value);
        }

        if field.kind() == FieldType::ObsGroup && !field.children().is_empty() {
            // Children of a saved group only match that group's members.
            let scoped = encounter.map(|_| match &field.meta.previous_value {
                Some(PreviousValue::Obs(group)) => OpenmrsEncounter {
                    obs: group.group_members.clone(),
                    ..Default::default()
                },
                _ => OpenmrsEncounter::default(),
            });
            for child in field.children_mut() {
                self.hydrate_field(child, all_fields, scoped.as_ref(), ctx, values);
            }
        }
    }

    /// Dispatch a value change to the field's handler.
    ///
    /// Unknown field types keep the value and record nothing.
    pub fn submit_field_value(
        &self,
        field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value {
        match self.get(&field.kind()) {
            Some(handler) => handler.handle_field_submission(field, value, ctx),
            None => {
                tracing::debug!(
                    "no submission handler for field '{}' of type '{}'",
                    field.id,
                    field.field_type
                );
                value.clone()
            }
        }
    }

    pub fn display_value(&self, field: &FormField, value: &Value) -> Value {
        match self.get(&field.kind()) {
            Some(handler) => handler.get_display_value(field, value),
            None => value.clone(),
        }
    }
}

/// Drop any pending mutation on `field`, keeping validation results.
pub fn clear_submission(field: &mut FormField) {
    if let Some(submission) = field.meta.submission.as_mut() {
        submission.new_value = None;
        submission.voided_value = None;
    }
}

/// `null`, blank strings, empty arrays and empty objects.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(object) => object.is_empty(),
        _ => false,
    }
}

/// String form of a scalar; coded `{uuid}` answers yield their uuid.
pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Object(object) => object.get("uuid").and_then(value_as_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionMode;
    use openmrs::{OpenmrsObs, OpenmrsResource};
    use serde_json::json;

    fn field(value: Value) -> FormField {
        serde_json::from_value(value).expect("field")
    }

    #[test]
    fn default_registry_covers_every_persisted_type() {
        let registry = HandlerRegistry::default();
        for kind in [
            "obs",
            "obsGroup",
            "testOrder",
            "encounterLocation",
            "encounterProvider",
            "encounterRole",
            "encounterDatetime",
        ] {
            assert!(registry.get(&FieldType::parse(kind)).is_some(), "{kind}");
        }
        assert!(registry.get(&FieldType::Markdown).is_none());
    }

    #[test]
    fn unknown_type_is_a_no_op() {
        let registry = HandlerRegistry::default();
        let mut ctx = EncounterContext::new("f", SessionMode::Enter);
        let mut unknown = field(json!({"id": "x", "type": "fancyWidget"}));

        let kept = registry.submit_field_value(&mut unknown, &json!("value"), &mut ctx);
        assert_eq!(kept, json!("value"));
        assert!(unknown.meta.submission.is_none());
        assert_eq!(registry.display_value(&unknown, &json!(3)), json!(3));
    }

    #[test]
    fn hydrates_group_children_from_group_members() {
        let registry = HandlerRegistry::default();
        let mut ctx = EncounterContext::new("hts", SessionMode::Edit);
        let mut fields = vec![
            field(json!({
                "id": "result",
                "type": "obs",
                "questionOptions": {"rendering": "number", "concept": "weight"}
            })),
            field(json!({
                "id": "vitals",
                "type": "obsGroup",
                "questionOptions": {"rendering": "group", "concept": "vitals-set"},
                "questions": [{
                    "id": "groupWeight",
                    "type": "obs",
                    "questionOptions": {"rendering": "number", "concept": "weight"}
                }]
            })),
        ];
        let encounter = OpenmrsEncounter {
            obs: vec![
                OpenmrsObs {
                    uuid: Some("top".into()),
                    concept: OpenmrsResource::new("weight"),
                    value: Some(json!(70)),
                    form_field_path: Some("hts-result".into()),
                    ..Default::default()
                },
                OpenmrsObs {
                    uuid: Some("group".into()),
                    concept: OpenmrsResource::new("vitals-set"),
                    form_field_path: Some("hts-vitals".into()),
                    group_members: vec![OpenmrsObs {
                        uuid: Some("member".into()),
                        concept: OpenmrsResource::new("weight"),
                        value: Some(json!(71)),
                        form_field_path: Some("hts-groupWeight".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let values = registry.hydrate_fields(&mut fields, Some(&encounter), &mut ctx);

        assert_eq!(values.get("result"), Some(&json!(70)));
        assert_eq!(values.get("groupWeight"), Some(&json!(71)));
        assert!(matches!(
            &fields[1].children()[0].meta.previous_value,
            Some(PreviousValue::Obs(obs)) if obs.uuid.as_deref() == Some("member")
        ));
    }

    #[test]
    fn concept_fallback_leaves_obs_owned_by_a_later_question() {
        let registry = HandlerRegistry::default();
        let mut ctx = EncounterContext::new("hts", SessionMode::Edit);
        let mut fields = vec![
            field(json!({"id": "legacy", "type": "obs", "questionOptions": {"rendering": "text", "concept": "shared"}})),
            field(json!({"id": "current", "type": "obs", "questionOptions": {"rendering": "text", "concept": "shared"}})),
        ];
        let encounter = OpenmrsEncounter {
            obs: vec![OpenmrsObs {
                uuid: Some("X".into()),
                concept: OpenmrsResource::new("shared"),
                value: Some(json!("belongs to current")),
                form_field_path: Some("hts-current".into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let values = registry.hydrate_fields(&mut fields, Some(&encounter), &mut ctx);

        assert_eq!(values.get("legacy"), Some(&Value::Null));
        assert_eq!(values.get("current"), Some(&json!("belongs to current")));
        assert!(fields[0].meta.previous_value.is_none());

        registry.submit_field_value(&mut fields[0], &json!(""), &mut ctx);
        assert!(fields[0].meta.submission.is_none());
    }

    #[test]
    fn clear_submission_keeps_errors() {
        let mut target = field(json!({"id": "x", "type": "obs"}));
        target.meta.submission = Some(openmrs::SubmissionState {
            new_value: Some(openmrs::SubmissionValue::Obs(Default::default())),
            errors: vec![openmrs::ValidationResult::error("Field is mandatory")],
            ..Default::default()
        });

        clear_submission(&mut target);
        let submission = target.meta.submission.expect("state kept");
        assert!(submission.new_value.is_none());
        assert_eq!(submission.errors.len(), 1);
    }

    #[test]
    fn empty_values() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!(0)));
        assert_eq!(value_as_string(&json!({"uuid": "a"})).as_deref(), Some("a"));
    }
}
