//! Form session.
//!
//! Responsibilities:
//! - Own one resolved schema together with its [`EncounterContext`] and current field values
//! - Hydrate fields from a saved encounter
//! - Route value changes to the field's submission handler, then re-validate the field
//! - Refuse to build a payload while any visible field has an error
//!
//! Notes:
//! - Read-only sessions (`view`, `embedded-view`) hydrate but reject edits.

use crate::context::EncounterContext;
use crate::error::{FormError, FormResult};
use crate::handlers::{HandlerRegistry, TestOrderSubmissionHandler};
use crate::submission::prepare_encounter;
use crate::validation::{error_count, ValidatorRegistry};
use openmrs::{EncounterPayload, FormField, FormSchema, OpenmrsEncounter};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct FormSession {
    schema: FormSchema,
    ctx: EncounterContext,
    handlers: HandlerRegistry,
    validators: ValidatorRegistry,
    values: BTreeMap<String, Value>,
    existing: Option<OpenmrsEncounter>,
}

impl FormSession {
    /// Start a session over an intent-applied schema with the default handlers and validators.
    pub fn new(schema: FormSchema, ctx: EncounterContext) -> Self {
        Self {
            schema,
            ctx,
            handlers: HandlerRegistry::default(),
            validators: ValidatorRegistry::default(),
            values: BTreeMap::new(),
            existing: None,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn context(&self) -> &EncounterContext {
        &self.ctx
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn value(&self, field_id: &str) -> Option<&Value> {
        self.values.get(field_id)
    }

    /// Seed every field from `encounter` (or from ambient defaults for a new encounter).
    ///
    /// Earlier claims are released first, so hydrating twice binds the same records.
    pub fn hydrate(&mut self, encounter: Option<OpenmrsEncounter>) -> &BTreeMap<String, Value> {
        TestOrderSubmissionHandler::teardown(&mut self.ctx);

        self.values =
            self.handlers
                .hydrate_schema(&mut self.schema, encounter.as_ref(), &mut self.ctx);

        tracing::debug!(
            "hydrated {} field(s) of form '{}'",
            self.values.len(),
            self.schema.name
        );
        self.existing = encounter;
        &self.values
    }

    /// Record a new value for `field_id` and return whether the field is now valid.
    ///
    /// # Errors
    ///
    /// - [`FormError::InvalidArguments`] when the session is read-only.
    /// - [`FormError::UnknownField`] when no question has this id.
    pub fn set_value(&mut self, field_id: &str, value: Value) -> FormResult<bool> {
        if self.ctx.session_mode().is_read_only() {
            return Err(FormError::InvalidArguments(format!(
                "cannot edit field '{field_id}' in a read-only session"
            )));
        }

        let field = find_field_mut(&mut self.schema, field_id)
            .ok_or_else(|| FormError::UnknownField(field_id.to_string()))?;
        let value = self.handlers.submit_field_value(field, &value, &mut self.ctx);
        let valid = self.validators.validate_field(field, &value);
        self.values.insert(field_id.to_string(), value);
        Ok(valid)
    }

    /// Display text for the current value of `field_id`.
    pub fn display_value(&self, field_id: &str) -> FormResult<Value> {
        let field = self
            .schema
            .pages
            .iter()
            .flat_map(|page| page.sections.iter())
            .find_map(|section| find_field(&section.questions, field_id))
            .ok_or_else(|| FormError::UnknownField(field_id.to_string()))?;
        let value = self.values.get(field_id).unwrap_or(&Value::Null);
        Ok(self.handlers.display_value(field, value))
    }

    /// Validate every field against its current value. Returns `true` when nothing failed.
    pub fn validate(&mut self) -> bool {
        let Self {
            schema,
            validators,
            values,
            ..
        } = self;
        for page in &mut schema.pages {
            for section in &mut page.sections {
                validate_all(&mut section.questions, validators, values);
            }
        }
        self.error_count() == 0
    }

    pub fn error_count(&self) -> usize {
        self.schema
            .pages
            .iter()
            .flat_map(|page| page.sections.iter())
            .map(|section| error_count(&section.questions))
            .sum()
    }

    /// Validate, then build the save payload.
    ///
    /// # Errors
    ///
    /// [`FormError::NotSubmittable`] with the number of failing fields.
    pub fn prepare(&mut self) -> FormResult<EncounterPayload> {
        if !self.validate() {
            let failing = self.error_count();
            tracing::warn!(
                "form '{}' has {} field(s) with validation errors",
                self.schema.name,
                failing
            );
            return Err(FormError::NotSubmittable(failing));
        }
        Ok(prepare_encounter(
            &self.schema,
            &self.ctx,
            self.existing.as_ref(),
        ))
    }
}

fn validate_all(
    fields: &mut [FormField],
    validators: &ValidatorRegistry,
    values: &BTreeMap<String, Value>,
) {
    for field in fields {
        let value = values.get(&field.id).unwrap_or(&Value::Null);
        validators.validate_field(field, value);
        validate_all(field.children_mut(), validators, values);
    }
}

fn find_field<'a>(fields: &'a [FormField], field_id: &str) -> Option<&'a FormField> {
    fields.iter().find_map(|field| {
        if field.id == field_id {
            Some(field)
        } else {
            find_field(field.children(), field_id)
        }
    })
}

fn find_field_mut<'a>(schema: &'a mut FormSchema, field_id: &str) -> Option<&'a mut FormField> {
    fn find<'f>(fields: &'f mut [FormField], field_id: &str) -> Option<&'f mut FormField> {
        for field in fields {
            if field.id == field_id {
                return Some(field);
            }
            if let Some(found) = find(field.children_mut(), field_id) {
                return Some(found);
            }
        }
        None
    }

    schema
        .pages
        .iter_mut()
        .flat_map(|page| page.sections.iter_mut())
        .find_map(|section| find(&mut section.questions, field_id))
}
