//! Encounter metadata handlers.
//!
//! Location, provider, role and date questions do not produce obs. They read the saved
//! encounter (or the session's ambient defaults for a new one) and write the chosen value back
//! into the [`EncounterContext`], from which the encounter payload is built.

use super::{is_empty_value, value_as_string, Hydrated, SubmissionHandler};
use crate::context::EncounterContext;
use chrono::Utc;
use openmrs::datetime::{format_openmrs, parse_instant};
use openmrs::{FormField, OpenmrsEncounter};
use serde_json::Value;

fn text_value(value: &Value) -> Option<String> {
    (!is_empty_value(value)).then(|| value_as_string(value)).flatten()
}

fn hydrated(value: Option<String>) -> Hydrated {
    Hydrated::value(value.map(Value::String).unwrap_or(Value::Null))
}

// ============================================================================
// Location
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct EncounterLocationSubmissionHandler;

impl SubmissionHandler for EncounterLocationSubmissionHandler {
    fn handle_field_submission(
        &self,
        _field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value {
        ctx.set_location(text_value(value));
        value.clone()
    }

    fn get_initial_value(
        &self,
        encounter: Option<&OpenmrsEncounter>,
        _field: &FormField,
        _all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated {
        let location = encounter
            .and_then(|encounter| encounter.location.as_ref())
            .map(|location| location.uuid.clone())
            .or_else(|| ctx.defaults().location.clone());
        ctx.set_location(location.clone());
        hydrated(location)
    }

    fn get_display_value(&self, _field: &FormField, value: &Value) -> Value {
        value.clone()
    }

    fn get_previous_value(
        &self,
        _field: &FormField,
        encounter: &OpenmrsEncounter,
        _all_fields: &[FormField],
        _ctx: &EncounterContext,
    ) -> Option<Value> {
        encounter
            .location
            .as_ref()
            .map(|location| Value::String(location.uuid.clone()))
    }
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct EncounterProviderHandler;

impl SubmissionHandler for EncounterProviderHandler {
    fn handle_field_submission(
        &self,
        _field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value {
        ctx.set_provider(text_value(value));
        value.clone()
    }

    fn get_initial_value(
        &self,
        encounter: Option<&OpenmrsEncounter>,
        _field: &FormField,
        _all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated {
        let provider = encounter
            .and_then(|encounter| encounter.encounter_providers.first())
            .map(|entry| entry.provider.uuid.clone())
            .or_else(|| ctx.defaults().provider.clone());
        ctx.set_provider(provider.clone());
        hydrated(provider)
    }

    fn get_display_value(&self, _field: &FormField, value: &Value) -> Value {
        value.clone()
    }

    fn get_previous_value(
        &self,
        _field: &FormField,
        encounter: &OpenmrsEncounter,
        _all_fields: &[FormField],
        _ctx: &EncounterContext,
    ) -> Option<Value> {
        encounter
            .encounter_providers
            .first()
            .map(|entry| Value::String(entry.provider.uuid.clone()))
    }
}

// ============================================================================
// Role
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct EncounterRoleHandler;

impl SubmissionHandler for EncounterRoleHandler {
    fn handle_field_submission(
        &self,
        _field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value {
        ctx.set_encounter_role(text_value(value));
        value.clone()
    }

    fn get_initial_value(
        &self,
        encounter: Option<&OpenmrsEncounter>,
        _field: &FormField,
        _all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated {
        let role = encounter
            .and_then(|encounter| encounter.encounter_providers.first())
            .and_then(|entry| entry.encounter_role.as_ref())
            .map(|role| role.uuid.clone())
            .or_else(|| ctx.defaults().encounter_role.clone());
        ctx.set_encounter_role(role.clone());
        hydrated(role)
    }

    fn get_display_value(&self, _field: &FormField, value: &Value) -> Value {
        value.clone()
    }

    fn get_previous_value(
        &self,
        _field: &FormField,
        encounter: &OpenmrsEncounter,
        _all_fields: &[FormField],
        _ctx: &EncounterContext,
    ) -> Option<Value> {
        encounter
            .encounter_providers
            .first()
            .and_then(|entry| entry.encounter_role.as_ref())
            .map(|role| Value::String(role.uuid.clone()))
    }
}

// ============================================================================
// Date
// ============================================================================

/// Encounter date. Values are normalised to the backend format; unparseable input is kept as
/// given and left to validation.
#[derive(Clone, Copy, Debug, Default)]
pub struct EncounterDatetimeHandler;

impl EncounterDatetimeHandler {
    fn normalise(raw: String) -> String {
        match parse_instant(&raw) {
            Ok(instant) => format_openmrs(&instant),
            Err(_) => raw,
        }
    }
}

impl SubmissionHandler for EncounterDatetimeHandler {
    fn handle_field_submission(
        &self,
        _field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value {
        ctx.set_encounter_date(text_value(value).map(Self::normalise));
        value.clone()
    }

    fn get_initial_value(
        &self,
        encounter: Option<&OpenmrsEncounter>,
        _field: &FormField,
        _all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated {
        let date = encounter
            .and_then(|encounter| encounter.encounter_datetime.clone())
            .or_else(|| ctx.defaults().encounter_date.clone())
            .map(Self::normalise)
            .unwrap_or_else(|| format_openmrs(&Utc::now()));
        ctx.set_encounter_date(Some(date.clone()));
        hydrated(Some(date))
    }

    fn get_display_value(&self, _field: &FormField, value: &Value) -> Value {
        match value {
            Value::String(text) => match parse_instant(text) {
                Ok(instant) => Value::String(instant.format("%d-%b-%Y %H:%M").to_string()),
                Err(_) => value.clone(),
            },
            other => other.clone(),
        }
    }

    fn get_previous_value(
        &self,
        _field: &FormField,
        encounter: &OpenmrsEncounter,
        _all_fields: &[FormField],
        _ctx: &EncounterContext,
    ) -> Option<Value> {
        encounter.encounter_datetime.clone().map(Value::String)
    }
}
