//! Encounter resources as returned by the EMR backend.
//!
//! These are the read side of a form session: a previously saved encounter with its obs and
//! orders, used to seed initial values and to diff edits.
//!
//! The backend is inconsistent about references: the same slot may hold a bare uuid string or a
//! `{uuid, display}` object depending on the representation requested. [`OpenmrsResource`]
//! accepts both.

use crate::{from_str_with_path, from_value_with_path, OpenmrsResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reference to a backend resource (concept, location, provider, role...).
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct OpenmrsResource {
    pub uuid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpenmrsResource {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            ..Default::default()
        }
    }

    pub fn with_display(uuid: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            display: Some(display.into()),
            extra: Map::new(),
        }
    }
}

impl<'de> Deserialize<'de> for OpenmrsResource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Expanded {
            uuid: String,
            #[serde(default)]
            display: Option<String>,
            #[serde(flatten)]
            extra: Map<String, Value>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Uuid(String),
            Expanded(Expanded),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Uuid(uuid) => Ok(OpenmrsResource::new(uuid)),
            Wire::Expanded(expanded) => Ok(OpenmrsResource {
                uuid: expanded.uuid,
                display: expanded.display,
                extra: expanded.extra,
            }),
        }
    }
}

/// A persisted observation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenmrsObs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    pub concept: OpenmrsResource,

    /// Scalar, date string, or a `{uuid, display}` concept answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_field_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_field_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_members: Vec<OpenmrsObs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_datetime: Option<String>,

    #[serde(default)]
    pub voided: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpenmrsObs {
    /// The answer uuid for coded obs, otherwise the raw value.
    pub fn comparable_value(&self) -> Option<&Value> {
        let value = self.value.as_ref()?;
        match value {
            Value::Object(object) => object.get("uuid").or(Some(value)),
            other => Some(other),
        }
    }

    pub fn is_group(&self) -> bool {
        !self.group_members.is_empty()
    }
}

/// A persisted order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenmrsOrder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    pub concept: OpenmrsResource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orderer: Option<OpenmrsResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub care_setting: Option<OpenmrsResource>,

    #[serde(default)]
    pub voided: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncounterProvider {
    pub provider: OpenmrsResource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_role: Option<OpenmrsResource>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A previously saved encounter.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenmrsEncounter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_type: Option<OpenmrsResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<OpenmrsResource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encounter_providers: Vec<EncounterProvider>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obs: Vec<OpenmrsObs>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<OpenmrsOrder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<OpenmrsResource>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpenmrsEncounter {
    pub fn parse(json_text: &str) -> OpenmrsResult<Self> {
        from_str_with_path(json_text, "Encounter")
    }

    pub fn from_value(value: Value) -> OpenmrsResult<Self> {
        from_value_with_path(value, "Encounter")
    }
}
