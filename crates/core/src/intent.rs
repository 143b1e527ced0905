//! Intent behaviour engine.
//!
//! A form schema can serve several workflows. Questions, sections and pages carry `behaviours`
//! entries keyed by intent name, plus a `*` wildcard entry. Applying an intent flattens the
//! matching entries onto the schema and deletes the `behaviours` arrays.
//!
//! Responsibilities:
//! - Questions: the wildcard entry is the base, the intent's own entry wins on conflicting keys.
//!   `defaultValue` moves into `questionOptions`.
//! - Pages and sections: `hide` comes from the intent's entry, else from the wildcard entry.
//! - Markdown blocks: the intent's entry, else the wildcard entry, applied whole.
//! - Sub-forms: resolved with the intent named by the parent page's `subform_intent`, and a
//!   parent `readonly` is forced onto every field of the embedded form.
//!
//! Notes:
//! - The transform is one-way. A schema whose behaviours were consumed cannot be re-specialised
//!   for another intent; resolve from the original document instead.

use openmrs::{BehaviourEntry, FormField, FormIntent, FormSchema, HideSpec, WILDCARD_INTENT};
use serde_json::{Map, Value};

/// Which fields a parent override targets.
#[derive(Clone, Debug, PartialEq)]
pub enum OverrideScope {
    All,
    /// A single question, by id.
    Field(String),
}

/// Property forced onto fields of an embedded form by its parent.
#[derive(Clone, Debug, PartialEq)]
pub struct BehaviourOverride {
    pub scope: OverrideScope,
    pub property: String,
    pub value: Value,
}

impl BehaviourOverride {
    pub fn all(property: impl Into<String>, value: Value) -> Self {
        Self {
            scope: OverrideScope::All,
            property: property.into(),
            value,
        }
    }

    pub fn field(id: impl Into<String>, property: impl Into<String>, value: Value) -> Self {
        Self {
            scope: OverrideScope::Field(id.into()),
            property: property.into(),
            value,
        }
    }

    fn applies_to(&self, field: &FormField) -> bool {
        match &self.scope {
            OverrideScope::All => true,
            OverrideScope::Field(id) => *id == field.id,
        }
    }
}

/// Specialise a copy of `schema` for `intent`. The input is left untouched.
pub fn apply_form_intent(
    intent: &FormIntent,
    schema: &FormSchema,
    overrides: &[BehaviourOverride],
) -> FormSchema {
    apply_form_intent_owned(intent, schema.clone(), overrides)
}

/// Specialise `schema` for `intent`, consuming it.
pub fn apply_form_intent_owned(
    intent: &FormIntent,
    mut schema: FormSchema,
    overrides: &[BehaviourOverride],
) -> FormSchema {
    let intent_name = intent.name();
    tracing::debug!("applying intent '{intent_name}' to form '{}'", schema.name);

    if let Some(default_page) = schema
        .intent(intent_name)
        .and_then(|descriptor| descriptor.default_page.clone())
    {
        schema.default_page = Some(default_page);
    }
    apply_markdown_behaviours(schema.markdown.as_mut(), intent_name);

    for page in &mut schema.pages {
        if let Some(subform) = page.subform.as_mut() {
            if let Some(form) = subform.form.take() {
                let target = subform.behaviours.as_deref().and_then(|behaviours| {
                    behaviours
                        .iter()
                        .find(|behaviour| behaviour.intent == intent_name)
                        .or_else(|| {
                            behaviours
                                .iter()
                                .find(|behaviour| behaviour.intent == WILDCARD_INTENT)
                        })
                });

                let child_intent = FormIntent::from(
                    target
                        .and_then(|behaviour| behaviour.subform_intent.clone())
                        .unwrap_or_else(|| WILDCARD_INTENT.to_string()),
                );
                let mut child_overrides = overrides.to_vec();
                if let Some(readonly) = target.and_then(|behaviour| behaviour.readonly.clone()) {
                    child_overrides.push(BehaviourOverride::all("readonly", readonly));
                }

                subform.form = Some(Box::new(apply_form_intent_owned(
                    &child_intent,
                    *form,
                    &child_overrides,
                )));
            }
        }

        if let Some(behaviours) = page.behaviours.take() {
            if let Some(hide) = select_hide(&behaviours, intent_name) {
                page.hide = Some(hide);
            }
        }
        apply_markdown_behaviours(page.markdown.as_mut(), intent_name);

        for section in &mut page.sections {
            if let Some(behaviours) = section.behaviours.take() {
                if let Some(hide) = select_hide(&behaviours, intent_name) {
                    section.hide = Some(hide);
                }
            }
            apply_markdown_behaviours(section.markdown.as_mut(), intent_name);

            for question in &mut section.questions {
                apply_field_behaviours(question, intent_name, overrides);
            }
        }
    }

    schema
}

/// Flatten a question's behaviours, then its children's, then apply parent overrides.
fn apply_field_behaviours(
    field: &mut FormField,
    intent_name: &str,
    overrides: &[BehaviourOverride],
) {
    if let Some(behaviours) = field.behaviours.take() {
        let mut merged = Map::new();
        if let Some(wildcard) = behaviours.iter().find(|behaviour| behaviour.is_wildcard()) {
            merged.extend(wildcard.properties.clone());
        }
        if intent_name != WILDCARD_INTENT {
            if let Some(specific) = behaviours
                .iter()
                .find(|behaviour| behaviour.intent == intent_name)
            {
                merged.extend(specific.properties.clone());
            }
        }

        if let Some(default_value) = merged.remove("defaultValue") {
            field.question_options.default_value = Some(default_value);
        }
        for (key, value) in merged {
            field.set_property(&key, value);
        }
    }

    for child in field.children_mut() {
        apply_field_behaviours(child, intent_name, overrides);
    }

    for behaviour_override in overrides {
        if behaviour_override.applies_to(field) {
            field.set_property(&behaviour_override.property, behaviour_override.value.clone());
        }
    }
}

/// `hide` of the intent's entry, else of the wildcard entry.
///
/// The first entry found decides: an intent entry without `hide` does not fall through to the
/// wildcard.
fn select_hide(behaviours: &[BehaviourEntry], intent_name: &str) -> Option<HideSpec> {
    let entry = behaviours
        .iter()
        .find(|behaviour| behaviour.intent == intent_name)
        .or_else(|| behaviours.iter().find(|behaviour| behaviour.is_wildcard()))?;
    let hide = entry.get("hide")?;

    match serde_json::from_value(hide.clone()) {
        Ok(hide) => Some(hide),
        Err(err) => {
            tracing::warn!("ignoring malformed hide behaviour for intent '{intent_name}': {err}");
            None
        }
    }
}

/// Apply the intent's (else the wildcard's) entry of a markdown block and drop its behaviours.
///
/// Arrays of markdown blocks are handled element-wise.
fn apply_markdown_behaviours(markdown: Option<&mut Value>, intent_name: &str) {
    match markdown {
        Some(Value::Object(block)) => apply_markdown_block(block, intent_name),
        Some(Value::Array(blocks)) => {
            for block in blocks.iter_mut().filter_map(Value::as_object_mut) {
                apply_markdown_block(block, intent_name);
            }
        }
        _ => {}
    }
}

fn apply_markdown_block(block: &mut Map<String, Value>, intent_name: &str) {
    let Some(Value::Array(behaviours)) = block.remove("behaviours") else {
        return;
    };

    let selected = behaviours
        .iter()
        .find(|behaviour| behaviour_intent(behaviour) == Some(intent_name))
        .or_else(|| {
            behaviours
                .iter()
                .find(|behaviour| behaviour_intent(behaviour) == Some(WILDCARD_INTENT))
        });

    if let Some(Value::Object(properties)) = selected {
        for (key, value) in properties {
            if key != "intent" {
                block.insert(key.clone(), value.clone());
            }
        }
    }
}

fn behaviour_intent(behaviour: &Value) -> Option<&str> {
    behaviour.get("intent").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openmrs::{FormSchema, Page, SubformBehaviour, SubformRef};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TEST_SCHEMA_V2: &str = include_str!("../test-fixtures/test_schema_v2.json");

    fn schema_v2() -> FormSchema {
        FormSchema::parse(TEST_SCHEMA_V2).expect("fixture parses")
    }

    fn question<'a>(schema: &'a FormSchema, id: &str) -> &'a FormField {
        schema
            .fields()
            .find(|field| field.id == id)
            .expect("question present")
    }

    #[test]
    fn retrospective_intent_flattens_date_test_performed() {
        let resolved = apply_form_intent(&"HTS_RETROSPECTIVE".into(), &schema_v2(), &[]);
        let field = question(&resolved, "dateTestPerformed");

        assert!(field.behaviours.is_none());
        assert_eq!(field.required, Some(json!("true")));
        assert_eq!(field.unspecified, Some(json!("true")));
        assert_eq!(
            field.hide.as_ref().and_then(|h| h.hide_when_expression.as_deref()),
            Some("false")
        );
        let validators = field.validators.as_ref().expect("validators");
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0].kind, "date");
        assert!(!validators[0].flag("allowFutureDates"));
        // Only the wildcard declares a default; it fills the gap.
        assert_eq!(field.question_options.default_value, Some(json!("2024-01-01")));
        assert!(!field.extra.contains_key("defaultValue"));
    }

    #[test]
    fn unmatched_intent_uses_wildcard_only() {
        let resolved = apply_form_intent(&"SOMETHING_ELSE".into(), &schema_v2(), &[]);
        let field = question(&resolved, "dateTestPerformed");

        assert_eq!(field.required, Some(json!("false")));
        assert!(field.validators.as_ref().expect("validators")[0].flag("allowFutureDates"));
        assert!(question(&resolved, "previousHivTest").is_required());
    }

    #[test]
    fn specific_entry_wins_and_wildcard_fills_gaps() {
        let schema: FormSchema = serde_json::from_value(json!({
            "name": "f",
            "pages": [{"label": "p", "sections": [{"label": "s", "questions": [{
                "id": "q",
                "type": "obs",
                "questionOptions": {"rendering": "text"},
                "behaviours": [
                    {"intent": "*", "required": false, "hide": {"hideWhenExpression": "A"}},
                    {"intent": "X", "required": true}
                ]
            }]}]}]
        }))
        .expect("schema");

        let for_x = apply_form_intent(&"X".into(), &schema, &[]);
        let field = question(&for_x, "q");
        assert_eq!(field.required, Some(json!(true)));
        assert_eq!(field.hide.as_ref().and_then(|h| h.hide_when_expression.as_deref()), Some("A"));

        let for_y = apply_form_intent(&"Y".into(), &schema, &[]);
        assert_eq!(question(&for_y, "q").required, Some(json!(false)));
    }

    #[test]
    fn input_schema_is_not_mutated() {
        let schema = schema_v2();
        let _ = apply_form_intent(&"HTS_RETROSPECTIVE".into(), &schema, &[]);
        assert!(question(&schema, "dateTestPerformed").behaviours.is_some());
    }

    #[test]
    fn descriptor_intent_matches_like_a_name() {
        let descriptor = FormIntent::Descriptor(openmrs::IntentDescriptor {
            intent: "HTS_RETROSPECTIVE".into(),
            ..Default::default()
        });
        let by_descriptor = apply_form_intent(&descriptor, &schema_v2(), &[]);
        let by_name = apply_form_intent(&"HTS_RETROSPECTIVE".into(), &schema_v2(), &[]);
        assert_eq!(by_descriptor, by_name);
    }

    #[test]
    fn default_page_comes_from_matching_descriptor() {
        let resolved = apply_form_intent(&"HTS_RETROSPECTIVE".into(), &schema_v2(), &[]);
        assert_eq!(resolved.default_page.as_deref(), Some("Testing history"));

        let wildcard = apply_form_intent(&FormIntent::default(), &schema_v2(), &[]);
        assert_eq!(wildcard.default_page, None);
    }

    #[test]
    fn page_and_section_hide_prefer_specific_entry() {
        let retro = apply_form_intent(&"HTS_RETROSPECTIVE".into(), &schema_v2(), &[]);
        let page = &retro.pages[0];
        assert!(page.behaviours.is_none());
        assert_eq!(page.hide.as_ref().and_then(|h| h.hide_when_expression.as_deref()), Some("false"));
        assert_eq!(
            page.sections[0].hide.as_ref().and_then(|h| h.hide_when_expression.as_deref()),
            Some("true")
        );

        let other = apply_form_intent(&"OTHER".into(), &schema_v2(), &[]);
        assert_eq!(
            other.pages[0].hide.as_ref().and_then(|h| h.hide_when_expression.as_deref()),
            Some("isEmpty(previousHivTest)")
        );
        // The section has no wildcard entry, so nothing is set.
        assert!(other.pages[0].sections[0].hide.is_none());
    }

    #[test]
    fn markdown_uses_specific_then_wildcard_entry() {
        let retro = apply_form_intent(&"HTS_RETROSPECTIVE".into(), &schema_v2(), &[]);
        let markdown = retro.markdown.expect("markdown");
        assert_eq!(
            markdown.get("text"),
            Some(&json!("Retrospective entry: copy results from the paper register."))
        );
        assert!(markdown.get("behaviours").is_none());
        assert!(markdown.get("hide").is_none());

        let other = apply_form_intent(&"OTHER".into(), &schema_v2(), &[]);
        let markdown = other.markdown.expect("markdown");
        assert_eq!(markdown.get("text"), Some(&json!("Capture the test result before counselling.")));
        assert_eq!(markdown.get("hide"), Some(&json!({"hideWhenExpression": "false"})));
    }

    #[test]
    fn obs_group_children_are_resolved() {
        let retro = apply_form_intent(&"HTS_RETROSPECTIVE".into(), &schema_v2(), &[]);
        let group = question(&retro, "testResults");
        let child = &group.children()[0];
        assert!(child.behaviours.is_none());
        assert!(child.is_required());
    }

    #[test]
    fn subform_uses_subform_intent_and_forced_readonly() {
        let embedded: FormSchema = serde_json::from_value(json!({
            "name": "embedded",
            "pages": [{"label": "e", "sections": [{"label": "s", "questions": [{
                "id": "inner",
                "type": "obs",
                "questionOptions": {"rendering": "text"},
                "behaviours": [
                    {"intent": "*", "required": false},
                    {"intent": "INNER", "required": true}
                ]
            }]}]}]
        }))
        .expect("embedded");

        let parent = FormSchema {
            name: "parent".into(),
            pages: vec![Page {
                label: "sub".into(),
                is_subform: true,
                subform: Some(SubformRef {
                    name: Some("embedded".into()),
                    form: Some(Box::new(embedded)),
                    behaviours: Some(vec![SubformBehaviour {
                        intent: "OUTER".into(),
                        subform_intent: Some("INNER".into()),
                        readonly: Some(json!("true")),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };

        let resolved = apply_form_intent(&"OUTER".into(), &parent, &[]);
        let nested = resolved.pages[0].subform_schema().expect("nested form");
        let inner = question(nested, "inner");
        assert!(inner.is_required());
        assert!(inner.is_readonly());

        let fallback = apply_form_intent(&"UNRELATED".into(), &parent, &[]);
        let nested = fallback.pages[0].subform_schema().expect("nested form");
        assert!(!question(nested, "inner").is_required());
        assert!(!question(nested, "inner").is_readonly());
    }

    #[test]
    fn field_scoped_override_only_hits_named_field() {
        let overrides = [BehaviourOverride::field("previousHivTest", "readonly", json!(true))];
        let resolved = apply_form_intent(&FormIntent::default(), &schema_v2(), &overrides);
        assert!(question(&resolved, "previousHivTest").is_readonly());
        assert!(!question(&resolved, "dateTestPerformed").is_readonly());
    }
}
