use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Attribute keys the server assigns on every persisted record.
pub const ATTR_UUID: &str = "uuid";
pub const ATTR_TYPE: &str = "type";
pub const ATTR_CREATED: &str = "created";
pub const ATTR_MODIFIED: &str = "modified";
pub const ATTR_NAME: &str = "name";
pub const ATTR_USERNAME: &str = "username";

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("entity record is not a JSON object")]
    NotAnObject,
    #[error("entity record has no uuid")]
    MissingUuid,
    #[error("entity uuid is not a valid uuid: {0}")]
    InvalidUuid(String),
}

/// One remote resource instance.
///
/// An entity is an ordered string-keyed map of JSON values, exactly as the
/// server returned it, with the server-assigned `uuid` parsed out as the
/// stable identity. Two entities with the same uuid are the same remote
/// resource; `name`/`username` are mutable, type-specific aliases.
///
/// A fetch or save response replaces the attribute map wholesale. There is
/// no field-level merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    uuid: Uuid,
    attributes: Map<String, Value>,
}

impl Entity {
    /// Materialize an entity from one raw response record.
    ///
    /// All input fields are preserved verbatim. A missing `type` is filled
    /// in from the resource type the record was fetched under; a present
    /// `type` wins. Records without a parseable `uuid` are rejected so
    /// callers can filter malformed data.
    pub fn from_record(raw: &Value, resource_type: &str) -> Result<Self, EntityError> {
        let record = raw.as_object().ok_or(EntityError::NotAnObject)?;
        let uuid = parse_uuid(record)?;

        let mut attributes = record.clone();
        attributes
            .entry(ATTR_TYPE)
            .or_insert_with(|| Value::String(resource_type.to_string()));

        Ok(Self { uuid, attributes })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.get_str(ATTR_TYPE)
    }

    /// The human identifier usable in place of the uuid for some resource
    /// types: `name`, falling back to `username`.
    pub fn name(&self) -> Option<&str> {
        self.get_str(ATTR_NAME).or_else(|| self.get_str(ATTR_USERNAME))
    }

    /// Server-assigned creation timestamp, epoch milliseconds.
    pub fn created(&self) -> Option<i64> {
        self.get_i64(ATTR_CREATED)
    }

    /// Server-assigned last-modified timestamp, epoch milliseconds.
    pub fn modified(&self) -> Option<i64> {
        self.get_i64(ATTR_MODIFIED)
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(Value::as_bool)
    }

    /// Set a local attribute. The change is client-side until the entity is
    /// saved through the client facade.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Overwrite this entity from a fresh response record.
    ///
    /// Replace, not merge: fields absent from the record are gone afterward.
    /// The record must carry the same kind of well-formed uuid a fetch
    /// response does.
    pub fn replace_from_record(&mut self, raw: &Value) -> Result<(), EntityError> {
        let record = raw.as_object().ok_or(EntityError::NotAnObject)?;
        let uuid = parse_uuid(record)?;
        self.uuid = uuid;
        self.attributes = record.clone();
        Ok(())
    }

    /// The attribute map as a JSON value, suitable for a save request body.
    pub fn to_value(&self) -> Value {
        Value::Object(self.attributes.clone())
    }
}

fn parse_uuid(record: &Map<String, Value>) -> Result<Uuid, EntityError> {
    let value = record.get(ATTR_UUID).ok_or(EntityError::MissingUuid)?;
    let text = value
        .as_str()
        .ok_or_else(|| EntityError::InvalidUuid(value.to_string()))?;
    Uuid::parse_str(text).map_err(|_| EntityError::InvalidUuid(text.to_string()))
}

/// Builds one typed `Entity` from one raw response record.
///
/// Implementations must preserve all input fields, tolerate missing optional
/// fields (`name`, `username`), and fail when `uuid` is absent or invalid;
/// the collection relies on that to filter malformed records.
pub trait EntityFactory: Send + Sync {
    fn build(&self, raw: &Value, resource_type: &str) -> Result<Entity, EntityError>;
}

/// Default factory: the record becomes the entity's attribute map as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEntityFactory;

impl EntityFactory for JsonEntityFactory {
    fn build(&self, raw: &Value, resource_type: &str) -> Result<Entity, EntityError> {
        Entity::from_record(raw, resource_type)
    }
}
