//! Obs-group handler.
//!
//! A group question has no value of its own. Hydration binds the saved group obs so its members
//! can seed the child questions; the group payload is assembled from the children at save time.

use super::{find_obs_by_form_field, Hydrated, SubmissionHandler};
use crate::context::EncounterContext;
use openmrs::{FormField, OpenmrsEncounter, PreviousValue};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Default)]
pub struct ObsGroupHandler;

impl SubmissionHandler for ObsGroupHandler {
    fn handle_field_submission(
        &self,
        _field: &mut FormField,
        value: &Value,
        _ctx: &mut EncounterContext,
    ) -> Value {
        value.clone()
    }

    fn get_initial_value(
        &self,
        encounter: Option<&OpenmrsEncounter>,
        field: &FormField,
        all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated {
        let Some(encounter) = encounter else {
            return Hydrated::value(Value::Null);
        };
        let Some(group) = find_obs_by_form_field(&encounter.obs, field, all_fields, ctx)
            .into_iter()
            .next()
        else {
            return Hydrated::value(Value::Null);
        };

        if let Some(uuid) = group.uuid.as_deref() {
            ctx.claim_obs(uuid);
        }
        Hydrated {
            value: Value::Null,
            previous_value: Some(PreviousValue::Obs(group.clone())),
        }
    }

    fn get_display_value(&self, _field: &FormField, value: &Value) -> Value {
        value.clone()
    }

    fn get_previous_value(
        &self,
        field: &FormField,
        encounter: &OpenmrsEncounter,
        all_fields: &[FormField],
        ctx: &EncounterContext,
    ) -> Option<Value> {
        find_obs_by_form_field(&encounter.obs, field, all_fields, ctx)
            .into_iter()
            .next()
            .and_then(|group| group.uuid.clone())
            .map(Value::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionMode;
    use openmrs::{OpenmrsObs, OpenmrsResource};
    use serde_json::json;

    fn group_field() -> FormField {
        serde_json::from_value(json!({
            "id": "vitals",
            "type": "obsGroup",
            "questionOptions": {"rendering": "group", "concept": "vitals-set"},
            "questions": [{"id": "weight", "type": "obs", "questionOptions": {"rendering": "number", "concept": "weight"}}]
        }))
        .expect("group field")
    }

    #[test]
    fn binds_and_claims_group_obs_by_concept() {
        let encounter = OpenmrsEncounter {
            obs: vec![
                OpenmrsObs {
                    uuid: Some("plain".into()),
                    concept: OpenmrsResource::new("vitals-set"),
                    value: Some(json!(1)),
                    ..Default::default()
                },
                OpenmrsObs {
                    uuid: Some("group".into()),
                    concept: OpenmrsResource::new("vitals-set"),
                    group_members: vec![OpenmrsObs {
                        concept: OpenmrsResource::new("weight"),
                        value: Some(json!(70)),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut ctx = EncounterContext::new("hts", SessionMode::Edit);
        let field = group_field();

        let hydrated = ObsGroupHandler.get_initial_value(Some(&encounter), &field, &[], &mut ctx);

        assert!(matches!(
            hydrated.previous_value,
            Some(PreviousValue::Obs(group)) if group.uuid.as_deref() == Some("group")
        ));
        assert!(ctx.is_obs_claimed("group"));
    }

    #[test]
    fn submission_records_nothing() {
        let mut field = group_field();
        let mut ctx = EncounterContext::new("hts", SessionMode::Enter);
        ObsGroupHandler.handle_field_submission(&mut field, &json!(null), &mut ctx);
        assert!(field.meta.submission.is_none());
    }
}
