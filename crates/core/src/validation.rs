//! Field validation.
//!
//! Validators run against a field's current value and record their results on
//! `field.meta.submission`. Validation never fails the call; an encounter is only blocked at
//! save time, when [`is_submittable`] sees an error on any visible field.
//!
//! Notes:
//! - The required check (`form_field`) runs for every field; other validators run when declared
//!   in the field's `validators`. Number fields with `min`/`max` also get the range check.
//! - Expression validators (`js_expression`) need a script engine and are skipped.

use crate::constants::REQUIRED_VALIDATOR;
use crate::handlers::is_empty_value;
use chrono::Utc;
use openmrs::datetime::parse_instant;
use openmrs::{FormField, Rendering, ResultType, SubmissionState, ValidationResult, ValidatorConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const DATE_VALIDATOR: &str = "date";
pub const RANGE_VALIDATOR: &str = "range";

pub trait FieldValidator: Send + Sync {
    fn validate(
        &self,
        field: &FormField,
        value: &Value,
        config: &ValidatorConfig,
    ) -> Vec<ValidationResult>;
}

/// Required fields must hold a non-empty value.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequiredValidator;

impl FieldValidator for RequiredValidator {
    fn validate(
        &self,
        field: &FormField,
        value: &Value,
        _config: &ValidatorConfig,
    ) -> Vec<ValidationResult> {
        if field.is_required() && is_empty_value(value) {
            vec![ValidationResult::error("Field is mandatory")]
        } else {
            Vec::new()
        }
    }
}

/// Dates must parse and, unless `allowFutureDates` is set, must not lie in the future.
#[derive(Clone, Copy, Debug, Default)]
pub struct DateValidator;

impl FieldValidator for DateValidator {
    fn validate(
        &self,
        _field: &FormField,
        value: &Value,
        config: &ValidatorConfig,
    ) -> Vec<ValidationResult> {
        let Value::String(text) = value else {
            return Vec::new();
        };
        if text.trim().is_empty() {
            return Vec::new();
        }

        match parse_instant(text) {
            Err(_) => vec![ValidationResult::error("Invalid date")],
            Ok(instant) if instant > Utc::now() && !config.flag("allowFutureDates") => {
                vec![ValidationResult::error("Cannot be a future date")]
            }
            Ok(_) => Vec::new(),
        }
    }
}

/// Numeric bounds from `questionOptions.min`/`max`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RangeValidator;

impl RangeValidator {
    fn bound(value: Option<&Value>) -> Option<f64> {
        match value? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FieldValidator for RangeValidator {
    fn validate(
        &self,
        field: &FormField,
        value: &Value,
        _config: &ValidatorConfig,
    ) -> Vec<ValidationResult> {
        if is_empty_value(value) {
            return Vec::new();
        }
        let Some(number) = Self::bound(Some(value)) else {
            return vec![ValidationResult::error("Value must be a number")];
        };

        let options = &field.question_options;
        let mut results = Vec::new();
        if let Some(min) = Self::bound(options.min.as_ref()) {
            if number < min {
                results.push(ValidationResult::error(format!(
                    "Value must be greater than or equal to {min}"
                )));
            }
        }
        if let Some(max) = Self::bound(options.max.as_ref()) {
            if number > max {
                results.push(ValidationResult::error(format!(
                    "Value must be less than or equal to {max}"
                )));
            }
        }
        results
    }
}

/// Validators keyed by their `type`.
#[derive(Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn FieldValidator>>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            validators: HashMap::new(),
        };
        registry.register(REQUIRED_VALIDATOR, Arc::new(RequiredValidator));
        registry.register(DATE_VALIDATOR, Arc::new(DateValidator));
        registry.register(RANGE_VALIDATOR, Arc::new(RangeValidator));
        registry
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ValidatorRegistry").field("validators", &kinds).finish()
    }
}

impl ValidatorRegistry {
    pub fn register(&mut self, kind: impl Into<String>, validator: Arc<dyn FieldValidator>) {
        self.validators.insert(kind.into(), validator);
    }

    /// Run every applicable validator and store the results on `field.meta.submission`.
    ///
    /// Hidden fields are not validated and lose earlier results. Returns `true` when no error
    /// was found.
    pub fn validate_field(&self, field: &mut FormField, value: &Value) -> bool {
        if field.is_hidden {
            if let Some(submission) = field.meta.submission.as_mut() {
                submission.errors.clear();
                submission.warnings.clear();
            }
            return true;
        }

        let mut configs = vec![ValidatorConfig {
            kind: REQUIRED_VALIDATOR.to_string(),
            ..Default::default()
        }];
        configs.extend(field.validators.iter().flatten().cloned());
        let has_bounds =
            field.question_options.min.is_some() || field.question_options.max.is_some();
        if field.rendering() == Rendering::Number
            && has_bounds
            && !configs.iter().any(|config| config.kind == RANGE_VALIDATOR)
        {
            configs.push(ValidatorConfig {
                kind: RANGE_VALIDATOR.to_string(),
                ..Default::default()
            });
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for config in &configs {
            let Some(validator) = self.validators.get(&config.kind) else {
                tracing::debug!(
                    "skipping unsupported validator '{}' on field '{}'",
                    config.kind,
                    field.id
                );
                continue;
            };
            for result in validator.validate(field, value, config) {
                match result.result_type {
                    ResultType::Error => errors.push(result),
                    ResultType::Warning => warnings.push(result),
                }
            }
        }

        let valid = errors.is_empty();
        if !valid || !warnings.is_empty() || field.meta.submission.is_some() {
            let submission = field
                .meta
                .submission
                .get_or_insert_with(SubmissionState::default);
            submission.errors = errors;
            submission.warnings = warnings;
        }
        valid
    }
}

/// Whether no visible field, at any depth, carries a validation error.
pub fn is_submittable(fields: &[FormField]) -> bool {
    error_count(fields) == 0
}

/// Number of visible fields, at any depth, with at least one validation error.
pub fn error_count(fields: &[FormField]) -> usize {
    fields
        .iter()
        .filter(|field| !field.is_hidden)
        .map(|field| {
            let own = field
                .meta
                .submission
                .as_ref()
                .is_some_and(SubmissionState::has_errors);
            usize::from(own) + error_count(field.children())
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: Value) -> FormField {
        serde_json::from_value(value).expect("field")
    }

    fn errors(field: &FormField) -> Vec<String> {
        field
            .meta
            .submission
            .as_ref()
            .map(|s| s.errors.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn required_field_needs_a_value() {
        let registry = ValidatorRegistry::default();
        let mut required = field(json!({"id": "q", "type": "obs", "required": "true", "questionOptions": {"rendering": "text"}}));

        assert!(!registry.validate_field(&mut required, &json!("")));
        assert_eq!(errors(&required), vec!["Field is mandatory".to_string()]);

        assert!(registry.validate_field(&mut required, &json!("answered")));
        assert!(errors(&required).is_empty());
    }

    #[test]
    fn future_dates_need_permission() {
        let registry = ValidatorRegistry::default();
        let mut strict = field(json!({
            "id": "d", "type": "obs",
            "questionOptions": {"rendering": "date"},
            "validators": [{"type": "date"}]
        }));
        let mut lenient = field(json!({
            "id": "d", "type": "obs",
            "questionOptions": {"rendering": "date"},
            "validators": [{"type": "date", "allowFutureDates": "true"}]
        }));

        assert!(!registry.validate_field(&mut strict, &json!("2999-01-01")));
        assert_eq!(errors(&strict), vec!["Cannot be a future date".to_string()]);
        assert!(registry.validate_field(&mut lenient, &json!("2999-01-01")));
        assert!(!registry.validate_field(&mut lenient, &json!("not a date")));
    }

    #[test]
    fn number_bounds_apply_without_declaration() {
        let registry = ValidatorRegistry::default();
        let mut weight = field(json!({
            "id": "w", "type": "obs",
            "questionOptions": {"rendering": "number", "min": "0", "max": 250}
        }));

        assert!(registry.validate_field(&mut weight, &json!(70)));
        assert!(!registry.validate_field(&mut weight, &json!(300)));
        assert_eq!(errors(&weight), vec!["Value must be less than or equal to 250".to_string()]);
        assert!(!registry.validate_field(&mut weight, &json!("heavy")));
    }

    #[test]
    fn unsupported_validators_are_skipped() {
        let registry = ValidatorRegistry::default();
        let mut scripted = field(json!({
            "id": "s", "type": "obs",
            "questionOptions": {"rendering": "text"},
            "validators": [{"type": "js_expression", "failsWhenExpression": "true"}]
        }));
        assert!(registry.validate_field(&mut scripted, &json!("x")));
        assert!(scripted.meta.submission.is_none());
    }

    #[test]
    fn hidden_fields_do_not_block_submission() {
        let registry = ValidatorRegistry::default();
        let mut hidden = field(json!({"id": "h", "type": "obs", "required": true, "questionOptions": {"rendering": "text"}}));
        assert!(!registry.validate_field(&mut hidden, &Value::Null));
        assert!(!is_submittable(std::slice::from_ref(&hidden)));

        hidden.is_hidden = true;
        assert!(is_submittable(std::slice::from_ref(&hidden)));
        assert!(registry.validate_field(&mut hidden, &Value::Null));
        assert!(errors(&hidden).is_empty());
    }

    #[test]
    fn nested_errors_count() {
        let registry = ValidatorRegistry::default();
        let mut group = field(json!({
            "id": "g", "type": "obsGroup",
            "questionOptions": {"rendering": "group"},
            "questions": [{"id": "c", "type": "obs", "required": true, "questionOptions": {"rendering": "text"}}]
        }));
        registry.validate_field(&mut group.children_mut()[0], &Value::Null);
        assert_eq!(error_count(std::slice::from_ref(&group)), 1);
    }
}
