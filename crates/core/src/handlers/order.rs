//! Test order handler.
//!
//! A `testOrder` question selects one orderable concept. Saved orders are bound to at most one
//! question per session through the order claims of [`EncounterContext`].

use super::{clear_submission, is_empty_value, value_as_string, Hydrated, SubmissionHandler};
use crate::constants::{ORDER_ACTION_NEW, ORDER_SETTING_KEY, TEST_ORDER_TYPE};
use crate::context::EncounterContext;
use openmrs::{
    FormField, OpenmrsEncounter, OpenmrsOrder, OrderPayload, PreviousValue, SubmissionState,
    SubmissionValue,
};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Default)]
pub struct TestOrderSubmissionHandler;

impl TestOrderSubmissionHandler {
    /// Release every order claimed in `ctx`, before hydrating a new session with it.
    pub fn teardown(ctx: &mut EncounterContext) {
        ctx.reset_assignments();
    }
}

impl SubmissionHandler for TestOrderSubmissionHandler {
    fn handle_field_submission(
        &self,
        field: &mut FormField,
        value: &Value,
        ctx: &mut EncounterContext,
    ) -> Value {
        let previous = match &field.meta.previous_value {
            Some(PreviousValue::Order(order)) => Some(order.clone()),
            _ => None,
        };
        let selected = (!is_empty_value(value))
            .then(|| value_as_string(value))
            .flatten();

        let voided_previous = previous
            .as_ref()
            .and_then(|order| order.uuid.as_deref())
            .map(|uuid| SubmissionValue::Order(OrderPayload::voided(uuid)));

        let (new_value, voided_value) = match (&previous, selected) {
            (_, None) => (None, voided_previous),
            (Some(previous), Some(concept)) if previous.concept.uuid == concept => (None, None),
            (_, Some(concept)) => (
                Some(SubmissionValue::Order(new_order(field, concept, ctx))),
                voided_previous,
            ),
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
        _all_fields: &[FormField],
        ctx: &mut EncounterContext,
    ) -> Hydrated {
        let Some(order) = encounter.and_then(|encounter| find_order(field, encounter, ctx)) else {
            return Hydrated::value(Value::Null);
        };

        if let Some(uuid) = order.uuid.as_deref() {
            ctx.claim_order(uuid);
        }
        Hydrated {
            value: Value::String(order.concept.uuid.clone()),
            previous_value: Some(PreviousValue::Order(order.clone())),
        }
    }

    fn get_display_value(&self, field: &FormField, value: &Value) -> Value {
        match value_as_string(value) {
            Some(concept) => field
                .question_options
                .answer_label(&concept)
                .map(|label| Value::String(label.to_string()))
                .unwrap_or_else(|| value.clone()),
            None => value.clone(),
        }
    }

    fn get_previous_value(
        &self,
        field: &FormField,
        encounter: &OpenmrsEncounter,
        _all_fields: &[FormField],
        ctx: &EncounterContext,
    ) -> Option<Value> {
        find_order(field, encounter, ctx).map(|order| Value::String(order.concept.uuid.clone()))
    }
}

/// First unvoided, unclaimed order whose concept the question offers.
fn find_order<'a>(
    field: &FormField,
    encounter: &'a OpenmrsEncounter,
    ctx: &EncounterContext,
) -> Option<&'a OpenmrsOrder> {
    let options = &field.question_options;
    let allowed: Vec<&str> = options
        .selectable_orders
        .iter()
        .chain(options.answers.iter())
        .map(|option| option.concept.as_str())
        .collect();

    encounter.orders.iter().find(|order| {
        !order.voided
            && allowed.contains(&order.concept.uuid.as_str())
            && !order
                .uuid
                .as_deref()
                .is_some_and(|uuid| ctx.is_order_claimed(uuid))
    })
}

fn new_order(field: &FormField, concept: String, ctx: &EncounterContext) -> OrderPayload {
    OrderPayload {
        concept: Some(concept),
        action: Some(ORDER_ACTION_NEW.to_string()),
        order_type: Some(TEST_ORDER_TYPE.to_string()),
        orderer: ctx.provider().map(str::to_string),
        care_setting: field
            .question_options
            .extra
            .get(ORDER_SETTING_KEY)
            .and_then(Value::as_str)
            .map(str::to_string),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionMode;
    use openmrs::OpenmrsResource;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn order_field(id: &str) -> FormField {
        serde_json::from_value(json!({
            "id": id,
            "type": "testOrder",
            "questionOptions": {
                "rendering": "select",
                "orderSettingUuid": "outpatient",
                "selectableOrders": [
                    {"concept": "viral-load", "label": "Viral load"},
                    {"concept": "cd4", "label": "CD4 count"}
                ]
            }
        }))
        .expect("order field")
    }

    fn saved_order(uuid: &str, concept: &str) -> OpenmrsOrder {
        OpenmrsOrder {
            uuid: Some(uuid.into()),
            concept: OpenmrsResource::new(concept),
            action: Some("NEW".into()),
            ..Default::default()
        }
    }

    fn edit_ctx() -> EncounterContext {
        let mut ctx = EncounterContext::new("hts", SessionMode::Edit);
        ctx.set_provider(Some("provider-1".into()));
        ctx
    }

    #[test]
    fn each_saved_order_binds_to_one_question() {
        let encounter = OpenmrsEncounter {
            orders: vec![saved_order("o1", "viral-load"), saved_order("o2", "cd4")],
            ..Default::default()
        };
        let mut ctx = edit_ctx();

        let first = TestOrderSubmissionHandler.get_initial_value(Some(&encounter), &order_field("a"), &[], &mut ctx);
        let second = TestOrderSubmissionHandler.get_initial_value(Some(&encounter), &order_field("b"), &[], &mut ctx);
        let third = TestOrderSubmissionHandler.get_initial_value(Some(&encounter), &order_field("c"), &[], &mut ctx);

        assert_eq!(first.value, json!("viral-load"));
        assert_eq!(second.value, json!("cd4"));
        assert_eq!(third, Hydrated::value(Value::Null));

        TestOrderSubmissionHandler::teardown(&mut ctx);
        let again = TestOrderSubmissionHandler.get_initial_value(Some(&encounter), &order_field("d"), &[], &mut ctx);
        assert_eq!(again.value, json!("viral-load"));
    }

    #[test]
    fn voided_and_unlisted_orders_are_ignored() {
        let mut voided = saved_order("o1", "viral-load");
        voided.voided = true;
        let encounter = OpenmrsEncounter {
            orders: vec![voided, saved_order("o2", "malaria-smear")],
            ..Default::default()
        };
        let hydrated = TestOrderSubmissionHandler.get_initial_value(Some(&encounter), &order_field("a"), &[], &mut edit_ctx());
        assert_eq!(hydrated.value, Value::Null);
    }

    #[test]
    fn changing_the_test_voids_and_reorders() {
        let mut field = order_field("a");
        field.meta.previous_value = Some(PreviousValue::Order(saved_order("o1", "viral-load")));

        TestOrderSubmissionHandler.handle_field_submission(&mut field, &json!("cd4"), &mut edit_ctx());

        let submission = field.meta.submission.expect("submission");
        assert_eq!(
            submission.new_value,
            Some(SubmissionValue::Order(OrderPayload {
                concept: Some("cd4".into()),
                action: Some("NEW".into()),
                order_type: Some("testorder".into()),
                orderer: Some("provider-1".into()),
                care_setting: Some("outpatient".into()),
                ..Default::default()
            }))
        );
        assert_eq!(
            submission.voided_value,
            Some(SubmissionValue::Order(OrderPayload::voided("o1")))
        );
    }

    #[test]
    fn same_test_is_a_no_op() {
        let mut field = order_field("a");
        field.meta.previous_value = Some(PreviousValue::Order(saved_order("o1", "viral-load")));

        TestOrderSubmissionHandler.handle_field_submission(&mut field, &json!("viral-load"), &mut edit_ctx());
        assert!(field.meta.submission.is_none());
    }

    #[test]
    fn clearing_voids_only() {
        let mut field = order_field("a");
        field.meta.previous_value = Some(PreviousValue::Order(saved_order("o1", "viral-load")));

        TestOrderSubmissionHandler.handle_field_submission(&mut field, &Value::Null, &mut edit_ctx());

        let submission = field.meta.submission.expect("submission");
        assert_eq!(submission.new_value, None);
        assert_eq!(
            submission.voided_value,
            Some(SubmissionValue::Order(OrderPayload::voided("o1")))
        );
    }

    #[test]
    fn display_uses_order_label() {
        let field = order_field("a");
        assert_eq!(
            TestOrderSubmissionHandler.get_display_value(&field, &json!("cd4")),
            json!("CD4 count")
        );
        assert_eq!(TestOrderSubmissionHandler.get_display_value(&field, &Value::Null), Value::Null);
    }
}
