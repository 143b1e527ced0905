//! Save-side wire types.
//!
//! Submission handlers produce [`ObsPayload`]/[`OrderPayload`] fragments and park them on the
//! field as a [`SubmissionState`]. At save time the fragments are gathered into an
//! [`EncounterPayload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Obs fragment: a new obs, an in-place edit (carries `uuid`), or a void.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_field_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_field_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_members: Option<Vec<ObsPayload>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_datetime: Option<String>,
}

impl ObsPayload {
    /// Void marker for a persisted obs.
    pub fn voided(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            voided: Some(true),
            ..Default::default()
        }
    }

    pub fn is_void(&self) -> bool {
        self.voided == Some(true)
    }
}

/// Order fragment.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub order_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orderer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub care_setting: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided: Option<bool>,
}

impl OrderPayload {
    pub fn voided(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            voided: Some(true),
            ..Default::default()
        }
    }
}

/// What a field contributes at save time.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SubmissionValue {
    Obs(ObsPayload),
    ObsList(Vec<ObsPayload>),
    Order(OrderPayload),
    OrderList(Vec<OrderPayload>),
}

impl SubmissionValue {
    /// Obs fragments, flattening lists.
    pub fn obs(&self) -> Vec<&ObsPayload> {
        match self {
            SubmissionValue::Obs(obs) => vec![obs],
            SubmissionValue::ObsList(list) => list.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn orders(&self) -> Vec<&OrderPayload> {
        match self {
            SubmissionValue::Order(order) => vec![order],
            SubmissionValue::OrderList(list) => list.iter().collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Error,
    Warning,
}

/// Outcome of a field validator.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub result_type: ResultType,
    pub message: String,
}

impl ValidationResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::Warning,
            message: message.into(),
        }
    }
}

/// Pending mutation and validation outcome of a single field.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<SubmissionValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voided_value: Option<SubmissionValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationResult>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ValidationResult>,
}

impl SubmissionState {
    /// Nothing to send and nothing to report.
    pub fn is_empty(&self) -> bool {
        self.new_value.is_none()
            && self.voided_value.is_none()
            && self.errors.is_empty()
            && self.warnings.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncounterProviderPayload {
    pub provider: String,
    pub encounter_role: String,
}

/// Body of the encounter save call.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncounterPayload {
    /// Present in edit mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encounter_providers: Vec<EncounterProviderPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<String>,

    #[serde(default)]
    pub obs: Vec<ObsPayload>,

    #[serde(default)]
    pub orders: Vec<OrderPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn void_marker_serialises_minimal_shape() {
        let value = serde_json::to_value(ObsPayload::voided("U1")).expect("serialize");
        assert_eq!(value, json!({"uuid": "U1", "voided": true}));
    }

    #[test]
    fn order_type_uses_type_key() {
        let order = OrderPayload {
            concept: Some("test-1".into()),
            action: Some("NEW".into()),
            order_type: Some("testorder".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(order).expect("serialize");
        assert_eq!(value, json!({"concept": "test-1", "action": "NEW", "type": "testorder"}));
    }

    #[test]
    fn submission_value_flattens_obs_lists() {
        let list = SubmissionValue::ObsList(vec![
            ObsPayload::voided("a"),
            ObsPayload::voided("b"),
        ]);
        assert_eq!(list.obs().len(), 2);
        assert!(list.orders().is_empty());
    }

    #[test]
    fn empty_state_reports_empty() {
        let mut state = SubmissionState::default();
        assert!(state.is_empty());
        state.errors.push(ValidationResult::error("Field is mandatory"));
        assert!(!state.is_empty());
        assert!(state.has_errors());
    }
}
