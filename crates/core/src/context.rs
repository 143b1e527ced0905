//! Per-session encounter context.
//!
//! One [`EncounterContext`] exists per form being filled in. Handlers read ambient defaults from
//! it, write encounter-level values into it, and record which persisted obs and orders have
//! already been bound to a field so two questions never hydrate from the same record.
//!
//! Notes:
//! - Claims are session state; a new session starts with none. [`EncounterContext::reset_assignments`]
//!   clears them when a context is reused for another hydration pass.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How the form was opened.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Enter,
    Edit,
    View,
    #[serde(rename = "embedded-view")]
    EmbeddedView,
}

impl SessionMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, SessionMode::View | SessionMode::EmbeddedView)
    }
}

/// Values used for a new encounter when the form does not capture them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AmbientDefaults {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub encounter_role: Option<String>,
    /// Wire date string; the current time is used when absent.
    #[serde(default)]
    pub encounter_date: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct EncounterContext {
    namespace: String,
    session_mode: SessionMode,
    patient_uuid: Option<String>,
    defaults: AmbientDefaults,

    encounter_date: Option<String>,
    location: Option<String>,
    provider: Option<String>,
    encounter_role: Option<String>,

    assigned_order_ids: HashSet<String>,
    assigned_obs_ids: HashSet<String>,
}

impl EncounterContext {
    /// `namespace` prefixes every `formFieldPath` written by this session, normally the form name.
    pub fn new(namespace: impl Into<String>, session_mode: SessionMode) -> Self {
        Self {
            namespace: namespace.into(),
            session_mode,
            ..Default::default()
        }
    }

    pub fn with_defaults(mut self, defaults: AmbientDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_patient(mut self, patient_uuid: impl Into<String>) -> Self {
        self.patient_uuid = Some(patient_uuid.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn session_mode(&self) -> SessionMode {
        self.session_mode
    }

    pub fn patient_uuid(&self) -> Option<&str> {
        self.patient_uuid.as_deref()
    }

    pub fn defaults(&self) -> &AmbientDefaults {
        &self.defaults
    }

    // ------------------------------------------------------------------------
    // Encounter-level values
    // ------------------------------------------------------------------------

    pub fn encounter_date(&self) -> Option<&str> {
        self.encounter_date.as_deref()
    }

    pub fn set_encounter_date(&mut self, date: Option<String>) {
        self.encounter_date = date;
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn set_location(&mut self, location: Option<String>) {
        self.location = location;
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn set_provider(&mut self, provider: Option<String>) {
        self.provider = provider;
    }

    pub fn encounter_role(&self) -> Option<&str> {
        self.encounter_role.as_deref()
    }

    pub fn set_encounter_role(&mut self, role: Option<String>) {
        self.encounter_role = role;
    }

    // ------------------------------------------------------------------------
    // Claims
    // ------------------------------------------------------------------------

    /// Bind an order to a field. Returns `false` when it was already bound.
    pub fn claim_order(&mut self, uuid: &str) -> bool {
        self.assigned_order_ids.insert(uuid.to_string())
    }

    pub fn is_order_claimed(&self, uuid: &str) -> bool {
        self.assigned_order_ids.contains(uuid)
    }

    /// Bind an obs to a field. Returns `false` when it was already bound.
    pub fn claim_obs(&mut self, uuid: &str) -> bool {
        self.assigned_obs_ids.insert(uuid.to_string())
    }

    pub fn is_obs_claimed(&self, uuid: &str) -> bool {
        self.assigned_obs_ids.contains(uuid)
    }

    pub fn reset_assignments(&mut self) {
        self.assigned_order_ids.clear();
        self.assigned_obs_ids.clear();
    }
}
