//! Storage rows as the diff engine sees them.
//!
//! A row carries up to three **role** columns the engine understands
//! (`subject_id`, `property_id`, `object_id`) plus any number of payload
//! columns (serialized value, sort key, ...) that it never inspects.
//!
//! Rows serialize as flat field maps:
//!
//! ```text
//! { "subject_id": 1706, "property_id": 1707, "object_id": 388 }
//! { "subject_id": 1706, "o_serialized": "1/2015/8/8/18/51/39" }
//! ```
//!
//! The short column names used by older stores (`s_id`, `p_id`, `o_id`) are
//! accepted when reading. A row may name each role once: an input carrying
//! both `subject_id` and `s_id` is rejected as a duplicate field. Role column
//! names are never payload columns.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Internal store identifier of an entity (subject, property, or value page).
pub type EntityId = u64;

/// Opaque payload cell: any JSON value (text, numbers of any width, floats,
/// nested objects and arrays).
///
/// Cells compare, order and hash by their compact JSON text, so `1` and `1.0`
/// are different values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadValue(Value);

impl PayloadValue {
    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn into_json(self) -> Value {
        self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    fn canonical(&self) -> String {
        self.0.to_string()
    }
}

impl PartialEq for PayloadValue {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for PayloadValue {}

impl PartialOrd for PayloadValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PayloadValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl Hash for PayloadValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl From<Value> for PayloadValue {
    fn from(value: Value) -> Self {
        PayloadValue(value)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue(Value::from(value))
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue(Value::from(value))
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue(Value::from(value))
    }
}

impl From<u64> for PayloadValue {
    fn from(value: u64) -> Self {
        PayloadValue(Value::from(value))
    }
}

/// Non-finite floats have no JSON form and become null.
impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue(Value::from(value))
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue(Value::from(value))
    }
}

impl fmt::Display for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id-carrying column roles, in the order the flat id walk visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Property,
    Subject,
    Object,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Property, Role::Subject, Role::Object];

    pub fn column(self) -> &'static str {
        match self {
            Role::Property => "property_id",
            Role::Subject => "subject_id",
            Role::Object => "object_id",
        }
    }

    /// Role named by a column, long or short form.
    pub fn from_column(column: &str) -> Option<Role> {
        match column {
            "property_id" | "p_id" => Some(Role::Property),
            "subject_id" | "s_id" => Some(Role::Subject),
            "object_id" | "o_id" => Some(Role::Object),
            _ => None,
        }
    }
}

/// One row of a property table.
///
/// Equality (and ordering) is field-wise over every role and every payload
/// column: two rows are the same only if all of their columns match.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Row {
    #[serde(default, alias = "s_id", skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<EntityId>,
    #[serde(default, alias = "p_id", skip_serializing_if = "Option::is_none")]
    pub property_id: Option<EntityId>,
    #[serde(default, alias = "o_id", skip_serializing_if = "Option::is_none")]
    pub object_id: Option<EntityId>,
    /// Opaque columns; must not reuse a role column name.
    #[serde(flatten)]
    pub payload: BTreeMap<String, PayloadValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for an entity-valued fact row.
    pub fn triple(subject: EntityId, property: EntityId, object: EntityId) -> Self {
        Self {
            subject_id: Some(subject),
            property_id: Some(property),
            object_id: Some(object),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, id: EntityId) -> Self {
        self.subject_id = Some(id);
        self
    }

    pub fn with_property(mut self, id: EntityId) -> Self {
        self.property_id = Some(id);
        self
    }

    pub fn with_object(mut self, id: EntityId) -> Self {
        self.object_id = Some(id);
        self
    }

    /// Set a payload column. A role column name sets that role instead when
    /// the value is an id, and is dropped otherwise.
    pub fn with_payload(mut self, column: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        let column = column.into();
        let value = value.into();
        match Role::from_column(&column) {
            Some(role) => match value.as_json().as_u64() {
                Some(id) => *self.role_mut(role) = Some(id),
                None => {
                    tracing::warn!(column = %column, value = %value, "non-id value for role column dropped")
                }
            },
            None => {
                self.payload.insert(column, value);
            }
        }
        self
    }

    fn role_mut(&mut self, role: Role) -> &mut Option<EntityId> {
        match role {
            Role::Property => &mut self.property_id,
            Role::Subject => &mut self.subject_id,
            Role::Object => &mut self.object_id,
        }
    }

    pub fn role(&self, role: Role) -> Option<EntityId> {
        match role {
            Role::Property => self.property_id,
            Role::Subject => self.subject_id,
            Role::Object => self.object_id,
        }
    }

    /// Present role ids, property first, then subject, then object.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        Role::ALL.into_iter().filter_map(move |role| self.role(role))
    }

    pub fn payload(&self, column: &str) -> Option<&PayloadValue> {
        self.payload.get(column)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for role in [Role::Subject, Role::Property, Role::Object] {
            if let Some(id) = self.role(role) {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{}: {id}", role.column())?;
                first = false;
            }
        }
        for (column, value) in &self.payload {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{column}: {value}")?;
            first = false;
        }
        f.write_str("}")
    }
}
