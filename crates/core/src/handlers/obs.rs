//! Observation handler.
//!
//! Maps a question to the obs it persists as, keyed by `formFieldPath` (`namespace-id`), and
//! decides per change whether to create, edit in place, or void.

use super::{clear_submission, is_empty_value, value_as_string, Hydrated, SubmissionHandler};
use crate::context::EncounterContext;
use chrono::SecondsFormat;
use openmrs::datetime::{format_openmrs, parse_instant, same_instant};
use openmrs::{
    FieldType, FormField, ObsPayload, OpenmrsEncounter, OpenmrsObs, PreviousValue, Rendering,
    SubmissionState, SubmissionValue,
};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, Default)]
pub struct ObsSubmissionHandler;

impl SubmissionHandler for ObsSubmissionHandler {
    fn handle_field_submission(
        &self,
        field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value {
        if field.is_transient() {
            return value.clone();
        }

        let (new_value, voided_value) = if field.rendering().is_multi_valued() {
            diff_multi_valued(field, value, ctx.namespace())
        } else {
            diff_single_valued(field, value, ctx.namespace())
        };

        if new_value.is_none() && voided_value.is_none() {
            clear_submission(field);
        } else {
            let submission = field
                .meta
                .submission
                .get_or_insert_with(SubmissionState::default);
            submission.new_value = new_value;
            submission.voided_value = voided_value;
        }
        value.clone()
    }

    fn get_initial_value(
        &self,
        encounter: Option<&OpenmrsEncounter>,
        field: &FormField,
        all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated {
        let multi_valued = field.rendering().is_multi_valued();
        let Some(encounter) = encounter else {
            let default = field.question_options.default_value.clone();
            return Hydrated::value(match default {
                Some(default) => default,
                None if multi_valued => Value::Array(Vec::new()),
                None => Value::Null,
            });
        };

        let matched = find_obs_by_form_field(&encounter.obs, field, all_fields, ctx);
        for obs in &matched {
            if let Some(uuid) = obs.uuid.as_deref() {
                ctx.claim_obs(uuid);
            }
        }

        if multi_valued {
            let values = matched.iter().filter_map(|obs| obs_ui_value(field, obs)).collect();
            let previous = (!matched.is_empty())
                .then(|| PreviousValue::ObsList(matched.into_iter().cloned().collect()));
            return Hydrated {
                value: Value::Array(values),
                previous_value: previous,
            };
        }

        match matched.first() {
            Some(obs) => Hydrated {
                value: obs_ui_value(field, obs).unwrap_or(Value::Null),
                previous_value: Some(PreviousValue::Obs((*obs).clone())),
            },
            None => Hydrated::value(Value::Null),
        }
    }

    fn get_display_value(&self, field: &FormField, value: &Value) -> Value {
        let rendering = field.rendering();
        match value {
            Value::Null => Value::Null,
            Value::Array(items) if rendering.is_coded() => Value::String(
                items
                    .iter()
                    .map(|item| answer_display(field, item))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            other if rendering.is_coded() => Value::String(answer_display(field, other)),
            Value::String(text) if rendering == Rendering::Date => match parse_instant(text) {
                Ok(instant) => Value::String(instant.format("%d-%b-%Y").to_string()),
                Err(_) => value.clone(),
            },
            Value::String(text) if rendering == Rendering::Datetime => match parse_instant(text) {
                Ok(instant) => Value::String(instant.format("%d-%b-%Y %H:%M").to_string()),
                Err(_) => value.clone(),
            },
            other => other.clone(),
        }
    }

    fn get_previous_value(
        &self,
        field: &FormField,
        encounter: &OpenmrsEncounter,
        all_fields: &[FormField],
        ctx: &EncounterContext,
    ) -> Option<Value> {
        let matched = find_obs_by_form_field(&encounter.obs, field, all_fields, ctx);
        if field.rendering().is_multi_valued() {
            if matched.is_empty() {
                return None;
            }
            let values = matched.iter().filter_map(|obs| obs_ui_value(field, obs)).collect();
            return Some(Value::Array(values));
        }
        matched.first().and_then(|obs| obs_ui_value(field, obs))
    }
}

// ============================================================================
// Matching
// ============================================================================

/// Persisted obs belonging to `field`.
///
/// Obs whose `formFieldPath` equals the field's path win. Without any, unclaimed obs with the
/// field's concept are used instead, except those whose path names another question in
/// `all_fields`. This legacy fallback is logged when another question shares the concept, since
/// the match is then a guess. Single-valued fields get at most one obs.
pub fn find_obs_by_form_field<'a>(
    obs: &'a [OpenmrsObs],
    field: &FormField,
    all_fields: &[FormField],
    ctx: &EncounterContext,
) -> Vec<&'a OpenmrsObs> {
    let path = field.form_field_path(ctx.namespace());
    let wants_group = field.kind() == FieldType::ObsGroup;
    let limit = if field.rendering().is_multi_valued() {
        usize::MAX
    } else {
        1
    };

    let by_path: Vec<&OpenmrsObs> = obs
        .iter()
        .filter(|candidate| {
            !candidate.voided && candidate.form_field_path.as_deref() == Some(path.as_str())
        })
        .take(limit)
        .collect();
    if !by_path.is_empty() {
        return by_path;
    }

    let Some(concept) = field.concept() else {
        return Vec::new();
    };
    let others: Vec<&FormField> = flatten(all_fields)
        .into_iter()
        .filter(|other| other.id != field.id)
        .collect();
    let owned_paths: HashSet<String> = others
        .iter()
        .map(|other| other.form_field_path(ctx.namespace()))
        .collect();

    let by_concept: Vec<&OpenmrsObs> = obs
        .iter()
        .filter(|candidate| {
            !candidate.voided
                && candidate.is_group() == wants_group
                && candidate.concept.uuid == concept
                && !candidate
                    .form_field_path
                    .as_ref()
                    .is_some_and(|path| owned_paths.contains(path))
                && !candidate
                    .uuid
                    .as_deref()
                    .is_some_and(|uuid| ctx.is_obs_claimed(uuid))
        })
        .take(limit)
        .collect();

    let shares_concept = others
        .iter()
        .any(|other| other.concept().as_deref() == Some(concept.as_str()));
    if !by_concept.is_empty() && shares_concept {
        tracing::warn!(
            "field '{}' matched obs by concept '{concept}' only; other questions share this concept",
            field.id
        );
    }
    by_concept
}

fn flatten(fields: &[FormField]) -> Vec<&FormField> {
    fn walk<'f>(fields: &'f [FormField], out: &mut Vec<&'f FormField>) {
        for field in fields {
            out.push(field);
            walk(field.children(), out);
        }
    }
    let mut flattened = Vec::new();
    walk(fields, &mut flattened);
    flattened
}

// ============================================================================
// Diffing
// ============================================================================

/// Whether `new_value` differs from what `previous` holds, under the field's notion of equality.
///
/// Coded answers compare by uuid, dates by instant, everything else by value (numbers
/// numerically, otherwise by string form).
pub fn has_previous_obs_value_changed(
    field: &FormField,
    previous: &OpenmrsObs,
    new_value: &Value,
) -> bool {
    let rendering = field.rendering();
    let previous_value = previous.comparable_value().and_then(value_as_string);
    let new_value_text = value_as_string(new_value);

    match (previous_value, new_value_text) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(previous), Some(new)) if rendering.is_temporal() => !same_instant(&previous, &new),
        (Some(previous), Some(new)) if rendering.is_coded() => previous != new,
        (Some(previous), Some(new)) => match (previous.parse::<f64>(), new.parse::<f64>()) {
            (Ok(left), Ok(right)) => left != right,
            _ => previous != new,
        },
    }
}

fn diff_single_valued(
    field: &FormField,
    value: &Value,
    namespace: &str,
) -> (Option<SubmissionValue>, Option<SubmissionValue>) {
    let previous = match &field.meta.previous_value {
        Some(PreviousValue::Obs(obs)) => Some(obs),
        _ => None,
    };

    match previous {
        None if is_empty_value(value) => (None, None),
        None => (
            Some(SubmissionValue::Obs(construct_obs(field, value, namespace))),
            None,
        ),
        Some(previous) if is_empty_value(value) => match previous.uuid.as_deref() {
            Some(uuid) => (None, Some(SubmissionValue::Obs(ObsPayload::voided(uuid)))),
            None => (None, None),
        },
        Some(previous) if has_previous_obs_value_changed(field, previous, value) => {
            let edited = ObsPayload {
                uuid: previous.uuid.clone(),
                form_field_namespace: Some(namespace.to_string()),
                form_field_path: Some(field.form_field_path(namespace)),
                value: Some(format_obs_value(field, value)),
                ..Default::default()
            };
            (Some(SubmissionValue::Obs(edited)), None)
        }
        Some(_) => (None, None),
    }
}

/// Per-answer diff of a multi-select: added answers are created, removed ones voided.
fn diff_multi_valued(
    field: &FormField,
    value: &Value,
    namespace: &str,
) -> (Option<SubmissionValue>, Option<SubmissionValue>) {
    let previous: Vec<&OpenmrsObs> = match &field.meta.previous_value {
        Some(PreviousValue::ObsList(list)) => list.iter().collect(),
        Some(PreviousValue::Obs(obs)) => vec![obs],
        _ => Vec::new(),
    };
    let selected: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(value_as_string).collect(),
        other if !is_empty_value(other) => value_as_string(other).into_iter().collect(),
        _ => Vec::new(),
    };
    let previous_answers: Vec<Option<String>> = previous
        .iter()
        .map(|obs| obs.comparable_value().and_then(value_as_string))
        .collect();

    let created: Vec<ObsPayload> = selected
        .iter()
        .filter(|answer| !previous_answers.iter().any(|p| p.as_deref() == Some(answer.as_str())))
        .map(|answer| construct_obs(field, &Value::String(answer.clone()), namespace))
        .collect();
    let voided: Vec<ObsPayload> = previous
        .iter()
        .zip(&previous_answers)
        .filter(|(_, answer)| !answer.as_ref().is_some_and(|a| selected.contains(a)))
        .filter_map(|(obs, _)| obs.uuid.as_deref().map(ObsPayload::voided))
        .collect();

    (
        (!created.is_empty()).then_some(SubmissionValue::ObsList(created)),
        (!voided.is_empty()).then_some(SubmissionValue::ObsList(voided)),
    )
}

// ============================================================================
// Payloads
// ============================================================================

/// A new obs for `field` carrying `value`.
pub fn construct_obs(field: &FormField, value: &Value, namespace: &str) -> ObsPayload {
    ObsPayload {
        concept: field.concept(),
        form_field_namespace: Some(namespace.to_string()),
        form_field_path: Some(field.form_field_path(namespace)),
        value: Some(format_obs_value(field, value)),
        ..Default::default()
    }
}

/// Wire form of a UI value: dates as `YYYY-MM-DD`, date-times in the backend format, coded
/// answers as their uuid.
pub fn format_obs_value(field: &FormField, value: &Value) -> Value {
    let rendering = field.rendering();
    match (value, &rendering) {
        (Value::String(text), Rendering::Date) => match parse_instant(text) {
            Ok(instant) => Value::String(instant.format("%Y-%m-%d").to_string()),
            Err(_) => value.clone(),
        },
        (Value::String(text), Rendering::Datetime) => match parse_instant(text) {
            Ok(instant) => Value::String(format_openmrs(&instant)),
            Err(_) => value.clone(),
        },
        (Value::Object(object), _) if rendering.is_coded() => {
            object.get("uuid").cloned().unwrap_or_else(|| value.clone())
        }
        _ => value.clone(),
    }
}

/// UI value of a persisted obs.
fn obs_ui_value(field: &FormField, obs: &OpenmrsObs) -> Option<Value> {
    let rendering = field.rendering();
    if rendering.is_coded() {
        return obs.comparable_value().cloned();
    }
    let value = obs.value.as_ref()?;
    match (value, &rendering) {
        (Value::String(text), Rendering::Date) => Some(match parse_instant(text) {
            Ok(instant) => Value::String(instant.format("%Y-%m-%d").to_string()),
            Err(_) => value.clone(),
        }),
        (Value::String(text), Rendering::Datetime) => Some(match parse_instant(text) {
            Ok(instant) => Value::String(instant.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Err(_) => value.clone(),
        }),
        _ => Some(value.clone()),
    }
}

fn answer_display(field: &FormField, value: &Value) -> String {
    let concept = value_as_string(value).unwrap_or_default();
    field
        .question_options
        .answer_label(&concept)
        .map(str::to_string)
        .unwrap_or(concept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionMode;
    use openmrs::OpenmrsResource;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn field(value: Value) -> FormField {
        serde_json::from_value(value).expect("field")
    }

    fn text_field() -> FormField {
        field(json!({"id": "notes", "type": "obs", "questionOptions": {"rendering": "text", "concept": "notes-concept"}}))
    }

    fn ctx() -> EncounterContext {
        EncounterContext::new("hts", SessionMode::Edit)
    }

    fn saved(uuid: &str, concept: &str, value: Value, path: Option<&str>) -> OpenmrsObs {
        OpenmrsObs {
            uuid: Some(uuid.into()),
            concept: OpenmrsResource::new(concept),
            value: Some(value),
            form_field_path: path.map(str::to_string),
            ..Default::default()
        }
    }

    fn submission(field: &FormField) -> (Option<&SubmissionValue>, Option<&SubmissionValue>) {
        field
            .meta
            .submission
            .as_ref()
            .map(|s| (s.new_value.as_ref(), s.voided_value.as_ref()))
            .unwrap_or((None, None))
    }

    #[test]
    fn new_value_without_previous_creates_obs() {
        let mut notes = text_field();
        ObsSubmissionHandler.handle_field_submission(&mut notes, &json!("hello"), &mut ctx());

        let (new_value, voided) = submission(&notes);
        assert_eq!(
            new_value,
            Some(&SubmissionValue::Obs(ObsPayload {
                concept: Some("notes-concept".into()),
                form_field_namespace: Some("hts".into()),
                form_field_path: Some("hts-notes".into()),
                value: Some(json!("hello")),
                ..Default::default()
            }))
        );
        assert_eq!(voided, None);
    }

    #[test]
    fn clearing_a_saved_value_voids_it() {
        let mut notes = text_field();
        notes.meta.previous_value = Some(PreviousValue::Obs(saved("U1", "notes-concept", json!("old"), Some("hts-notes"))));

        ObsSubmissionHandler.handle_field_submission(&mut notes, &json!(""), &mut ctx());

        let (new_value, voided) = submission(&notes);
        assert_eq!(new_value, None);
        assert_eq!(voided, Some(&SubmissionValue::Obs(ObsPayload::voided("U1"))));
    }

    #[test]
    fn changed_value_edits_in_place() {
        let mut notes = text_field();
        notes.meta.previous_value = Some(PreviousValue::Obs(saved("U1", "notes-concept", json!("old"), None)));

        ObsSubmissionHandler.handle_field_submission(&mut notes, &json!("new"), &mut ctx());

        let (new_value, _) = submission(&notes);
        let Some(SubmissionValue::Obs(edited)) = new_value else {
            panic!("expected an edited obs, got {new_value:?}");
        };
        assert_eq!(edited.uuid.as_deref(), Some("U1"));
        assert_eq!(edited.value, Some(json!("new")));
        assert_eq!(edited.concept, None);
    }

    #[test]
    fn unchanged_value_clears_pending_submission() {
        let mut notes = text_field();
        notes.meta.previous_value = Some(PreviousValue::Obs(saved("U1", "notes-concept", json!("same"), None)));

        ObsSubmissionHandler.handle_field_submission(&mut notes, &json!("changed"), &mut ctx());
        ObsSubmissionHandler.handle_field_submission(&mut notes, &json!("same"), &mut ctx());

        assert_eq!(submission(&notes), (None, None));
    }

    #[test]
    fn equality_is_type_specific() {
        let coded = field(json!({"id": "c", "type": "obs", "questionOptions": {"rendering": "radio"}}));
        let dated = field(json!({"id": "d", "type": "obs", "questionOptions": {"rendering": "datetime"}}));
        let numeric = field(json!({"id": "n", "type": "obs", "questionOptions": {"rendering": "number"}}));

        let coded_obs = saved("o", "c", json!({"uuid": "yes", "display": "Yes"}), None);
        assert!(!has_previous_obs_value_changed(&coded, &coded_obs, &json!("yes")));
        assert!(has_previous_obs_value_changed(&coded, &coded_obs, &json!("no")));

        let dated_obs = saved("o", "d", json!("2024-03-01T10:00:00.000+0000"), None);
        assert!(!has_previous_obs_value_changed(&dated, &dated_obs, &json!("2024-03-01T10:00:00Z")));

        let numeric_obs = saved("o", "n", json!(12), None);
        assert!(!has_previous_obs_value_changed(&numeric, &numeric_obs, &json!("12.0")));
        assert!(has_previous_obs_value_changed(&numeric, &numeric_obs, &json!(13)));
    }

    #[test]
    fn multi_select_only_creates_added_answers() {
        let mut symptoms = field(json!({
            "id": "symptoms",
            "type": "obs",
            "questionOptions": {"rendering": "checkbox", "concept": "symptom"}
        }));
        symptoms.meta.previous_value = Some(PreviousValue::ObsList(vec![saved(
            "obs-a",
            "symptom",
            json!({"uuid": "A"}),
            Some("hts-symptoms"),
        )]));

        ObsSubmissionHandler.handle_field_submission(&mut symptoms, &json!(["A", "B"]), &mut ctx());

        let (new_value, voided) = submission(&symptoms);
        let Some(SubmissionValue::ObsList(created)) = new_value else {
            panic!("expected created obs, got {new_value:?}");
        };
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].value, Some(json!("B")));
        assert_eq!(voided, None);
    }

    #[test]
    fn multi_select_voids_removed_answers() {
        let mut symptoms = field(json!({
            "id": "symptoms",
            "type": "obs",
            "questionOptions": {"rendering": "checkbox", "concept": "symptom"}
        }));
        symptoms.meta.previous_value = Some(PreviousValue::ObsList(vec![
            saved("obs-a", "symptom", json!({"uuid": "A"}), None),
            saved("obs-b", "symptom", json!({"uuid": "B"}), None),
        ]));

        ObsSubmissionHandler.handle_field_submission(&mut symptoms, &json!(["B"]), &mut ctx());

        let (new_value, voided) = submission(&symptoms);
        assert_eq!(new_value, None);
        assert_eq!(
            voided,
            Some(&SubmissionValue::ObsList(vec![ObsPayload::voided("obs-a")]))
        );
    }

    #[test]
    fn transient_fields_record_nothing() {
        let mut transient = field(json!({
            "id": "t",
            "type": "obs",
            "questionOptions": {"rendering": "text", "concept": "x", "isTransient": true}
        }));
        ObsSubmissionHandler.handle_field_submission(&mut transient, &json!("value"), &mut ctx());
        assert!(transient.meta.submission.is_none());
    }

    #[test]
    fn exact_path_match_wins_over_concept() {
        let notes = text_field();
        let obs = vec![
            saved("by-concept", "notes-concept", json!("legacy"), None),
            saved("by-path", "notes-concept", json!("current"), Some("hts-notes")),
        ];
        let found = find_obs_by_form_field(&obs, &notes, &[], &ctx());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uuid.as_deref(), Some("by-path"));
    }

    #[test]
    fn concept_fallback_skips_claimed_obs() {
        let first = field(json!({"id": "first", "type": "obs", "questionOptions": {"rendering": "text", "concept": "shared"}}));
        let second = field(json!({"id": "second", "type": "obs", "questionOptions": {"rendering": "text", "concept": "shared"}}));
        let all = vec![first.clone(), second.clone()];
        let encounter = OpenmrsEncounter {
            obs: vec![
                saved("legacy-1", "shared", json!("one"), None),
                saved("legacy-2", "shared", json!("two"), None),
            ],
            ..Default::default()
        };
        let mut ctx = ctx();

        let first_value = ObsSubmissionHandler.get_initial_value(Some(&encounter), &first, &all, &mut ctx);
        let second_value = ObsSubmissionHandler.get_initial_value(Some(&encounter), &second, &all, &mut ctx);

        assert_eq!(first_value.value, json!("one"));
        assert_eq!(second_value.value, json!("two"));
    }

    #[test]
    fn new_encounter_uses_default_value() {
        let mut dated = field(json!({"id": "d", "type": "obs", "questionOptions": {"rendering": "date"}}));
        dated.question_options.default_value = Some(json!("2024-01-01"));
        let hydrated = ObsSubmissionHandler.get_initial_value(None, &dated, &[], &mut ctx());
        assert_eq!(hydrated, Hydrated::value(json!("2024-01-01")));
    }

    #[test]
    fn previous_value_reads_without_claiming() {
        let notes = text_field();
        let encounter = OpenmrsEncounter {
            obs: vec![saved("U1", "notes-concept", json!("old"), Some("hts-notes"))],
            ..Default::default()
        };
        let ctx = ctx();
        let previous = ObsSubmissionHandler.get_previous_value(&notes, &encounter, &[], &ctx);
        assert_eq!(previous, Some(json!("old")));
        assert!(!ctx.is_obs_claimed("U1"));
    }

    #[test]
    fn display_values_tolerate_null_and_label_answers() {
        let coded = field(json!({
            "id": "c",
            "type": "obs",
            "questionOptions": {"rendering": "select", "answers": [{"concept": "yes", "label": "Yes"}]}
        }));
        assert_eq!(ObsSubmissionHandler.get_display_value(&coded, &Value::Null), Value::Null);
        assert_eq!(ObsSubmissionHandler.get_display_value(&coded, &json!("yes")), json!("Yes"));
        assert_eq!(ObsSubmissionHandler.get_display_value(&coded, &json!("other")), json!("other"));
    }

    #[test]
    fn dates_are_sent_as_plain_dates() {
        let dated = field(json!({"id": "d", "type": "obs", "questionOptions": {"rendering": "date"}}));
        assert_eq!(format_obs_value(&dated, &json!("2024-03-01T00:00:00Z")), json!("2024-03-01"));
    }
}
