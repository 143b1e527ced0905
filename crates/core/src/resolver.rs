//! Schema resolution.
//!
//! Turns a form identifier (or raw form JSON) into a fully merged, intent-specialised schema.
//!
//! Responsibilities:
//! - Fetch form metadata and body through a [`FormSource`].
//! - Attach sub-forms referenced by name, and resolve form components declared in
//!   `referencedForms`. Siblings are fetched concurrently; a level waits for all of its children.
//! - Splice component sections into sections carrying a `reference`.
//! - Inline sub-form pages whose encounter type matches the parent's.
//! - Move the legacy `encounter` key into `encounterType`.
//! - Apply the session intent once, at the root.
//!
//! Notes:
//! - Structure is resolved intent-free and memoised per identifier, so a form referenced from
//!   several places is fetched once per loader.
//! - A form that references itself, directly or transitively, fails with
//!   [`FormError::CyclicReference`].
//! - Aborted loads surface as [`FormJsonState::Cancelled`], never as a failure.

use crate::intent::apply_form_intent_owned;
use crate::source::FormSource;
use crate::{FormError, FormResult};
use dashmap::DashMap;
use futures::future::{try_join_all, AbortRegistration, Abortable, BoxFuture, FutureExt};
use openmrs::{FormIdentifier, FormIntent, FormSchema, ReferencedForm};
use serde_json::Value;

/// Outcome of a cancellable schema load, as seen by a UI layer.
#[derive(Debug, Default)]
pub enum FormJsonState {
    #[default]
    Loading,
    Ready(FormSchema),
    Failed(FormError),
    Cancelled,
}

impl FormJsonState {
    pub fn form_json(&self) -> Option<&FormSchema> {
        match self {
            FormJsonState::Ready(schema) => Some(schema),
            _ => None,
        }
    }

    pub fn form_error(&self) -> Option<&FormError> {
        match self {
            FormJsonState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, FormJsonState::Loading)
    }
}

/// Resolves form schemas against a [`FormSource`].
pub struct FormLoader<S> {
    source: S,
    cache: DashMap<String, FormSchema>,
}

impl<S: FormSource> FormLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Forget every memoised form.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Resolve a form by identifier or from raw JSON and specialise it for `intent`.
    ///
    /// # Errors
    ///
    /// - [`FormError::InvalidArguments`] unless exactly one of `identifier` and `raw_form_json`
    ///   is supplied.
    /// - [`FormError::FormNotFound`] when a fetched form has no stored body.
    /// - Source, parse and cycle errors from any level of the tree.
    pub async fn load_form_json(
        &self,
        identifier: Option<&str>,
        raw_form_json: Option<Value>,
        intent: &FormIntent,
    ) -> FormResult<FormSchema> {
        let schema = match (identifier, raw_form_json) {
            (Some(identifier), None) if !identifier.trim().is_empty() => {
                self.load_structure(identifier.trim().to_string(), Vec::new())
                    .await?
            }
            (None, Some(raw)) => {
                let schema = FormSchema::from_value(raw)?;
                let chain = if schema.name.is_empty() {
                    Vec::new()
                } else {
                    vec![schema.name.clone()]
                };
                self.resolve_structure(schema, chain).await?
            }
            _ => {
                return Err(FormError::InvalidArguments(
                    "supply exactly one of a form identifier or raw form JSON".into(),
                ))
            }
        };

        Ok(apply_form_intent_owned(intent, schema, &[]))
    }

    /// [`FormLoader::load_form_json`] that stops when `registration`'s handle is aborted.
    pub async fn load_form_json_abortable(
        &self,
        identifier: Option<&str>,
        raw_form_json: Option<Value>,
        intent: &FormIntent,
        registration: AbortRegistration,
    ) -> FormResult<FormSchema> {
        let load = self.load_form_json(identifier, raw_form_json, intent);
        match Abortable::new(load, registration).await {
            Ok(result) => result,
            Err(_aborted) => Err(FormError::Aborted),
        }
    }

    /// Cancellable load reported as a [`FormJsonState`].
    pub async fn load_form_json_state(
        &self,
        identifier: Option<&str>,
        raw_form_json: Option<Value>,
        intent: &FormIntent,
        registration: AbortRegistration,
    ) -> FormJsonState {
        match self
            .load_form_json_abortable(identifier, raw_form_json, intent, registration)
            .await
        {
            Ok(schema) => FormJsonState::Ready(schema),
            Err(err) if err.is_abort() => {
                tracing::debug!("form load cancelled");
                FormJsonState::Cancelled
            }
            Err(err) => FormJsonState::Failed(err),
        }
    }

    // ========================================================================
    // Recursive resolution
    // ========================================================================

    /// Fetch a form by identifier and resolve its structure, memoised per identifier.
    fn load_structure<'a>(
        &'a self,
        identifier: String,
        chain: Vec<String>,
    ) -> BoxFuture<'a, FormResult<FormSchema>> {
        async move {
            if chain.contains(&identifier) {
                let mut cycle = chain;
                cycle.push(identifier);
                return Err(FormError::CyclicReference(cycle.join(" -> ")));
            }
            let cached = self.cache.get(&identifier).map(|entry| entry.value().clone());
            if let Some(cached) = cached {
                tracing::debug!("form '{identifier}' served from resolution cache");
                return Ok(cached);
            }

            let parsed = FormIdentifier::parse(&identifier)?;
            let schema = self.fetch_schema(&parsed).await?;

            let mut chain = chain;
            chain.push(identifier.clone());
            if !schema.name.is_empty() && schema.name != identifier {
                chain.push(schema.name.clone());
            }

            let resolved = self.resolve_structure(schema, chain).await?;
            self.cache.insert(identifier, resolved.clone());
            Ok(resolved)
        }
        .boxed()
    }

    async fn fetch_schema(&self, identifier: &FormIdentifier) -> FormResult<FormSchema> {
        tracing::debug!("fetching form '{identifier}'");
        let metadata = self.source.fetch_form(identifier).await?;
        let Some(body) = self.source.fetch_clob_data(&metadata).await? else {
            tracing::debug!("form '{identifier}' has no stored schema body");
            return Err(FormError::FormNotFound(identifier.to_string()));
        };
        Ok(FormSchema::from_value(body)?)
    }

    /// Attach sub-forms, splice components and inline same-encounter sub-forms.
    fn resolve_structure<'a>(
        &'a self,
        mut schema: FormSchema,
        chain: Vec<String>,
    ) -> BoxFuture<'a, FormResult<FormSchema>> {
        async move {
            let pending: Vec<(usize, String)> = schema
                .pages
                .iter()
                .enumerate()
                .filter_map(|(index, page)| {
                    page.unresolved_subform_name()
                        .map(|name| (index, name.to_string()))
                })
                .collect();
            let subforms = try_join_all(
                pending
                    .iter()
                    .map(|(_, name)| self.load_structure(name.clone(), chain.clone())),
            )
            .await?;
            for ((index, _), form) in pending.into_iter().zip(subforms) {
                if let Some(subform) = schema.pages[index].subform.as_mut() {
                    subform.form = Some(Box::new(form));
                }
            }

            let referenced = schema.referenced_forms.clone();
            let components = try_join_all(
                referenced
                    .iter()
                    .map(|declared| self.load_structure(declared.form_name.clone(), chain.clone())),
            )
            .await?;
            splice_component_sections(&mut schema, &referenced, &components);

            remove_inline_subforms(&mut schema);
            schema.normalize_encounter_type();
            Ok(schema)
        }
        .boxed()
    }
}

/// Replace the questions of every referencing section with the referenced component section's,
/// minus `excludeQuestions`.
///
/// A component is matched by its schema name, its declared alias or its declared form name; the
/// page and section by label. Unmatched references are logged and left as they are.
fn splice_component_sections(
    schema: &mut FormSchema,
    referenced: &[ReferencedForm],
    components: &[FormSchema],
) {
    for page in &mut schema.pages {
        for section in &mut page.sections {
            let Some(reference) = section.reference.as_ref() else {
                continue;
            };

            let component = referenced
                .iter()
                .zip(components)
                .find(|(declared, component)| {
                    component.name == reference.form
                        || declared.alias == reference.form
                        || declared.form_name == reference.form
                })
                .map(|(_, component)| component);
            let Some(component) = component else {
                tracing::warn!(
                    "section '{}' references unknown form component '{}'",
                    section.label,
                    reference.form
                );
                continue;
            };

            let source = component
                .pages
                .iter()
                .find(|candidate| candidate.label == reference.page)
                .and_then(|candidate| {
                    candidate
                        .sections
                        .iter()
                        .find(|candidate| candidate.label == reference.section)
                });
            let Some(source) = source else {
                tracing::warn!(
                    "form component '{}' has no section '{}' on page '{}'",
                    reference.form,
                    reference.section,
                    reference.page
                );
                continue;
            };

            section.questions = source
                .questions
                .iter()
                .filter(|question| !reference.exclude_questions.contains(&question.id))
                .cloned()
                .collect();
        }
    }
}

/// Replace visible sub-form pages that share the parent's encounter type with the sub-form's own
/// non-subform pages.
///
/// Pages are walked from the end so earlier indices stay valid while splicing. Two forms without
/// an encounter type count as matching.
fn remove_inline_subforms(schema: &mut FormSchema) {
    let parent_encounter_type = schema.effective_encounter_type().map(str::to_string);

    for index in (0..schema.pages.len()).rev() {
        let page = &schema.pages[index];
        if page.is_hidden {
            continue;
        }
        let Some(nested) = page.subform_schema() else {
            continue;
        };
        if nested.effective_encounter_type() != parent_encounter_type.as_deref() {
            continue;
        }

        let Some(nested) = schema.pages[index]
            .subform
            .as_mut()
            .and_then(|subform| subform.form.take())
        else {
            continue;
        };
        let mut nested = *nested;
        remove_inline_subforms(&mut nested);
        tracing::debug!(
            "inlining sub-form '{}' into '{}' at page {index}",
            nested.name,
            schema.name
        );

        let pages: Vec<_> = nested
            .pages
            .into_iter()
            .filter(|page| !page.is_subform)
            .collect();
        schema.pages.splice(index..=index, pages);
    }
}
