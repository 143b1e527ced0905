//! Encounter payload assembly.
//!
//! Gathers the pending submissions of every field into the body of the encounter save call.
//! Obs-group children are nested under a group obs; voids of group members stay at the top
//! level, where the backend expects them.

use crate::context::EncounterContext;
use chrono::Utc;
use openmrs::datetime::format_openmrs;
use openmrs::{
    EncounterPayload, EncounterProviderPayload, FieldType, FormField, FormSchema, ObsPayload,
    OpenmrsEncounter, OrderPayload, PreviousValue,
};

#[derive(Debug, Default)]
struct Collected {
    obs: Vec<ObsPayload>,
    voided_obs: Vec<ObsPayload>,
    orders: Vec<OrderPayload>,
}

/// Build the save payload for `schema`'s fields.
///
/// `existing` is the encounter being edited; its uuid is carried so the backend updates it in
/// place. Encounter-level values come from the context, falling back to its ambient defaults.
pub fn prepare_encounter(
    schema: &FormSchema,
    ctx: &EncounterContext,
    existing: Option<&OpenmrsEncounter>,
) -> EncounterPayload {
    let mut collected = Collected::default();
    for field in schema.fields() {
        collect_field(field, ctx.namespace(), &mut collected);
    }

    let defaults = ctx.defaults();
    let provider = ctx.provider().or(defaults.provider.as_deref());
    let role = ctx.encounter_role().or(defaults.encounter_role.as_deref());
    let encounter_providers = match (provider, role) {
        (Some(provider), Some(role)) => vec![EncounterProviderPayload {
            provider: provider.to_string(),
            encounter_role: role.to_string(),
        }],
        _ => Vec::new(),
    };

    let encounter_datetime = ctx
        .encounter_date()
        .map(str::to_string)
        .or_else(|| existing.and_then(|encounter| encounter.encounter_datetime.clone()))
        .or_else(|| defaults.encounter_date.clone())
        .unwrap_or_else(|| format_openmrs(&Utc::now()));

    let mut obs = collected.obs;
    obs.extend(collected.voided_obs);

    tracing::debug!(
        "prepared encounter for form '{}' with {} obs and {} order(s)",
        schema.name,
        obs.len(),
        collected.orders.len()
    );

    EncounterPayload {
        uuid: existing.and_then(|encounter| encounter.uuid.clone()),
        patient: ctx.patient_uuid().map(str::to_string),
        encounter_datetime: Some(encounter_datetime),
        encounter_type: schema.effective_encounter_type().map(str::to_string),
        location: ctx
            .location()
            .or(defaults.location.as_deref())
            .map(str::to_string),
        encounter_providers,
        form: schema.uuid.clone(),
        obs,
        orders: collected.orders,
    }
}

fn collect_field(field: &FormField, namespace: &str, collected: &mut Collected) {
    if field.kind() == FieldType::ObsGroup {
        collect_group(field, namespace, collected);
        return;
    }

    let Some(submission) = field.meta.submission.as_ref() else {
        return;
    };
    if let Some(new_value) = submission.new_value.as_ref() {
        collected.obs.extend(new_value.obs().into_iter().cloned());
        collected.orders.extend(new_value.orders().into_iter().cloned());
    }
    if let Some(voided_value) = submission.voided_value.as_ref() {
        collected
            .voided_obs
            .extend(voided_value.obs().into_iter().cloned());
        collected
            .orders
            .extend(voided_value.orders().into_iter().cloned());
    }
}

/// Nest the children's new obs under one group obs.
///
/// A group that was saved before keeps its uuid; a new group carries its concept and path.
fn collect_group(field: &FormField, namespace: &str, collected: &mut Collected) {
    let mut members = Collected::default();
    for child in field.children() {
        collect_field(child, namespace, &mut members);
    }

    collected.voided_obs.extend(members.voided_obs);
    collected.orders.extend(members.orders);
    if members.obs.is_empty() {
        return;
    }

    let saved_uuid = match &field.meta.previous_value {
        Some(PreviousValue::Obs(group)) => group.uuid.clone(),
        _ => None,
    };
    let group = ObsPayload {
        concept: saved_uuid.is_none().then(|| field.concept()).flatten(),
        uuid: saved_uuid,
        form_field_namespace: Some(namespace.to_string()),
        form_field_path: Some(field.form_field_path(namespace)),
        group_members: Some(members.obs),
        ..Default::default()
    };
    collected.obs.push(group);
}
