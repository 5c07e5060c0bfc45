//! Instance Keys
//!
//! An [`InstanceKey`] is the identity tuple of one aggregate instance. Its
//! text form is a JSON array of the key values (`[1,"A-7"]`), so any string
//! survives the round trip through JSON escaping. Parsing is type-directed:
//! the caller supplies the primitive type of every slot.
//!
//! Shape instances are JSON objects ([`ShapeInstance`]). Which fields carry
//! the key depends on the shape kind:
//! - Persistence and SearchResult carry one column per key slot
//! - UIInstance carries the key only as opaque text
//! - SearchCondition cannot represent a key
//!
//! A UI instance that has not been saved yet has no key. Its instance-key
//! field holds a client-generated UUID instead ([`UiIdentity::Unsaved`]);
//! key text always starts with `[`, so the two forms never overlap.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

use crate::graph::MemberId;
use crate::shape::{Field, FieldKind, Shape, ShapeKind};
use crate::types::PrimitiveType;

/// One instance of a shape, as a JSON object
pub type ShapeInstance = Map<String, Value>;

/// Property holding the key text inside an identity field
pub const IDENTITY_KEY: &str = "key";
/// Property holding the cached display name inside an identity field
pub const IDENTITY_DISPLAY_NAME: &str = "displayName";

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// =============================================================================
// Errors
// =============================================================================

/// Instance-key errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("{kind} shape of '{path}' cannot represent an instance key")]
    Unrepresentable { path: String, kind: ShapeKind },

    #[error("Missing key field '{0}'")]
    MissingField(String),

    #[error("Key has {actual} value(s), expected {expected}")]
    Arity { expected: usize, actual: usize },

    #[error("Key slot {slot} expects {expected}, found {found}")]
    TypeMismatch {
        slot: usize,
        expected: String,
        found: String,
    },

    #[error("Malformed instance key text '{text}': {reason}")]
    Malformed { text: String, reason: String },

    #[error("Member {0:?} is not a reference in this shape")]
    NotAReference(MemberId),

    #[error("Instance {0} has not been saved and has no key yet")]
    Unsaved(Uuid),
}

// =============================================================================
// Key Values
// =============================================================================

/// One primitive value of an instance key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KeyValue {
    String(String),
    Bool(bool),
    Int(i64),
    /// Canonical decimal text (`-12.50`)
    Decimal(String),
    Date(NaiveDateTime),
    /// Enum value name
    Enum(String),
}

fn decimal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("decimal pattern is valid"))
}

impl KeyValue {
    /// A decimal value, if `text` is a plain decimal literal
    pub fn decimal(text: &str) -> Option<Self> {
        decimal_pattern()
            .is_match(text)
            .then(|| Self::Decimal(text.to_string()))
    }

    /// Whether this value may fill a slot of `primitive`
    pub fn matches(&self, primitive: &PrimitiveType) -> bool {
        matches!(
            (self, primitive),
            (Self::String(_), PrimitiveType::String)
                | (Self::Bool(_), PrimitiveType::Bool)
                | (Self::Int(_), PrimitiveType::Int)
                | (Self::Decimal(_), PrimitiveType::Decimal)
                | (Self::Date(_), PrimitiveType::Date)
                | (Self::Enum(_), PrimitiveType::Enum(_))
        )
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) | Self::Decimal(s) | Self::Enum(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
        }
    }

    /// Read a value of `primitive` from JSON
    pub fn from_json(
        primitive: &PrimitiveType,
        value: &Value,
        slot: usize,
    ) -> Result<Self, KeyError> {
        let mismatch = || KeyError::TypeMismatch {
            slot,
            expected: primitive.to_string(),
            found: value.to_string(),
        };

        match primitive {
            PrimitiveType::String => value.as_str().map(|s| Self::String(s.to_string())),
            PrimitiveType::Bool => value.as_bool().map(Self::Bool),
            PrimitiveType::Int => value.as_i64().map(Self::Int),
            PrimitiveType::Decimal => match value {
                Value::String(s) => Self::decimal(s),
                Value::Number(n) => Self::decimal(&n.to_string()),
                _ => None,
            },
            PrimitiveType::Date => value.as_str().and_then(parse_date).map(Self::Date),
            PrimitiveType::Enum(_) => value.as_str().map(|s| Self::Enum(s.to_string())),
        }
        .ok_or_else(mismatch)
    }
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// =============================================================================
// Instance Key
// =============================================================================

/// Identity tuple of one aggregate instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey(pub Vec<KeyValue>);

impl InstanceKey {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialized form: a JSON array of the values
    pub fn to_text(&self) -> String {
        Value::Array(self.0.iter().map(KeyValue::to_json).collect()).to_string()
    }

    /// Parse the serialized form against the slot types
    pub fn parse(text: &str, slots: &[PrimitiveType]) -> Result<Self, KeyError> {
        let values: Vec<Value> = serde_json::from_str(text).map_err(|e| KeyError::Malformed {
            text: text.to_string(),
            reason: e.to_string(),
        })?;
        if values.len() != slots.len() {
            return Err(KeyError::Arity {
                expected: slots.len(),
                actual: values.len(),
            });
        }
        values
            .iter()
            .zip(slots)
            .enumerate()
            .map(|(slot, (value, primitive))| KeyValue::from_json(primitive, value, slot))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Check arity and slot types against `slots`
    pub fn check(&self, slots: &[PrimitiveType]) -> Result<(), KeyError> {
        if self.len() != slots.len() {
            return Err(KeyError::Arity {
                expected: slots.len(),
                actual: self.len(),
            });
        }
        for (slot, (value, primitive)) in self.0.iter().zip(slots).enumerate() {
            if !value.matches(primitive) {
                return Err(KeyError::TypeMismatch {
                    slot,
                    expected: primitive.to_string(),
                    found: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

/// Content of a UI instance-key field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UiIdentity {
    Saved(InstanceKey),
    /// Created on the client and not stored yet
    Unsaved(Uuid),
}

impl UiIdentity {
    /// Fresh identity for a new instance
    pub fn new_unsaved() -> Self {
        Self::Unsaved(Uuid::new_v4())
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Saved(key) => key.to_text(),
            Self::Unsaved(id) => id.hyphenated().to_string(),
        }
    }

    /// Text starting with `[` is key text; anything else is a UUID, bare or
    /// as a JSON string
    pub fn restore(text: &str, slots: &[PrimitiveType]) -> Result<Self, KeyError> {
        let trimmed = text.trim();
        if trimmed.starts_with('[') {
            return InstanceKey::parse(trimmed, slots).map(Self::Saved);
        }
        let bare = trimmed
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(trimmed);
        Uuid::parse_str(bare)
            .map(Self::Unsaved)
            .map_err(|e| KeyError::Malformed {
                text: text.to_string(),
                reason: e.to_string(),
            })
    }
}

// =============================================================================
// Reading and Writing Through Shapes
// =============================================================================

fn unrepresentable(shape: &Shape) -> KeyError {
    KeyError::Unrepresentable {
        path: shape.path.clone(),
        kind: shape.kind,
    }
}

/// Columns carrying key slots `0..n`, or `None` if one is missing
fn key_columns(shape: &Shape) -> Option<Vec<&Field>> {
    (0..shape.key.len())
        .map(|slot| shape.fields.iter().find(|f| f.key_slot == Some(slot)))
        .collect()
}

fn instance_key_field(shape: &Shape) -> Option<&Field> {
    shape
        .fields
        .iter()
        .find(|f| matches!(f.kind, FieldKind::InstanceKey))
}

/// Read the instance key of the shape's own aggregate
pub fn get_instance_key(shape: &Shape, instance: &ShapeInstance) -> Result<InstanceKey, KeyError> {
    match shape.kind {
        ShapeKind::Persistence | ShapeKind::SearchResult => {
            let columns = key_columns(shape).ok_or_else(|| unrepresentable(shape))?;
            columns
                .iter()
                .enumerate()
                .map(|(slot, field)| {
                    let value = instance
                        .get(&field.name)
                        .filter(|v| !v.is_null())
                        .ok_or_else(|| KeyError::MissingField(field.name.clone()))?;
                    KeyValue::from_json(&shape.key[slot], value, slot)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(InstanceKey)
        }
        ShapeKind::UiInstance => match get_ui_identity(shape, instance)? {
            UiIdentity::Saved(key) => Ok(key),
            UiIdentity::Unsaved(id) => Err(KeyError::Unsaved(id)),
        },
        ShapeKind::SearchCondition => Err(unrepresentable(shape)),
    }
}

/// Read the instance-key field of a UI shape, saved or not
pub fn get_ui_identity(shape: &Shape, instance: &ShapeInstance) -> Result<UiIdentity, KeyError> {
    let field = ui_identity_field(shape)?;
    let text = instance
        .get(&field.name)
        .and_then(Value::as_str)
        .ok_or_else(|| KeyError::MissingField(field.name.clone()))?;
    UiIdentity::restore(text, &shape.key)
}

/// Write the instance-key field of a UI shape
pub fn set_ui_identity(
    shape: &Shape,
    instance: &mut ShapeInstance,
    identity: &UiIdentity,
) -> Result<(), KeyError> {
    let field = ui_identity_field(shape)?;
    if let UiIdentity::Saved(key) = identity {
        key.check(&shape.key)?;
    }
    instance.insert(field.name.clone(), Value::String(identity.to_text()));
    Ok(())
}

fn ui_identity_field(shape: &Shape) -> Result<&Field, KeyError> {
    if shape.kind != ShapeKind::UiInstance {
        return Err(unrepresentable(shape));
    }
    instance_key_field(shape).ok_or_else(|| unrepresentable(shape))
}

/// Write the instance key of the shape's own aggregate
pub fn set_instance_key(
    shape: &Shape,
    instance: &mut ShapeInstance,
    key: &InstanceKey,
) -> Result<(), KeyError> {
    key.check(&shape.key)?;
    match shape.kind {
        ShapeKind::Persistence | ShapeKind::SearchResult => {
            let columns = key_columns(shape).ok_or_else(|| unrepresentable(shape))?;
            for (field, value) in columns.iter().zip(key.values()) {
                instance.insert(field.name.clone(), value.to_json());
            }
            Ok(())
        }
        ShapeKind::UiInstance => set_ui_identity(shape, instance, &UiIdentity::Saved(key.clone())),
        ShapeKind::SearchCondition => Err(unrepresentable(shape)),
    }
}

/// How a shape carries one reference member
enum ReferenceCarrier<'a> {
    /// Foreign-key columns ordered by target slot
    Columns(Vec<&'a Field>),
    /// Opaque identity object
    Identity(&'a Field, &'a [PrimitiveType]),
}

fn reference_carrier(shape: &Shape, member: MemberId) -> Result<ReferenceCarrier<'_>, KeyError> {
    if let Some(field) = shape.fields.iter().find(|f| f.member == Some(member)) {
        match &field.kind {
            FieldKind::Identity { key, .. } | FieldKind::IdentityCondition { key, .. } => {
                return Ok(ReferenceCarrier::Identity(field, key));
            }
            _ => {}
        }
    }

    let mut columns: Vec<&Field> = shape
        .fields
        .iter()
        .filter(|f| f.member == Some(member) && f.ref_slot.is_some())
        .collect();
    if columns.is_empty() {
        return Err(KeyError::NotAReference(member));
    }
    columns.sort_by_key(|f| f.ref_slot);
    Ok(ReferenceCarrier::Columns(columns))
}

fn column_primitive(field: &Field) -> PrimitiveType {
    match &field.kind {
        FieldKind::Column { primitive } => primitive.clone(),
        other => panic!("foreign-key field '{}' is not a column: {:?}", field.name, other),
    }
}

/// Read the target key held by a reference member; `None` when unset
pub fn get_reference_key(
    shape: &Shape,
    instance: &ShapeInstance,
    member: MemberId,
) -> Result<Option<InstanceKey>, KeyError> {
    match reference_carrier(shape, member)? {
        ReferenceCarrier::Columns(columns) => {
            let present: Vec<Option<&Value>> = columns
                .iter()
                .map(|f| instance.get(&f.name).filter(|v| !v.is_null()))
                .collect();
            if present.iter().all(Option::is_none) {
                return Ok(None);
            }
            columns
                .iter()
                .zip(present)
                .enumerate()
                .map(|(slot, (field, value))| {
                    let value = value.ok_or_else(|| KeyError::MissingField(field.name.clone()))?;
                    KeyValue::from_json(&column_primitive(field), value, slot)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|values| Some(InstanceKey(values)))
        }
        ReferenceCarrier::Identity(field, slots) => {
            let text = instance
                .get(&field.name)
                .and_then(|v| v.get(IDENTITY_KEY))
                .and_then(Value::as_str);
            text.map(|t| InstanceKey::parse(t, slots)).transpose()
        }
    }
}

/// Write (or clear, with `None`) the target key held by a reference member
pub fn set_reference_key(
    shape: &Shape,
    instance: &mut ShapeInstance,
    member: MemberId,
    key: Option<&InstanceKey>,
) -> Result<(), KeyError> {
    match reference_carrier(shape, member)? {
        ReferenceCarrier::Columns(columns) => {
            let slots: Vec<PrimitiveType> = columns.iter().map(|f| column_primitive(f)).collect();
            match key {
                Some(key) => {
                    key.check(&slots)?;
                    for (field, value) in columns.iter().zip(key.values()) {
                        instance.insert(field.name.clone(), value.to_json());
                    }
                }
                None => {
                    for field in columns {
                        instance.insert(field.name.clone(), Value::Null);
                    }
                }
            }
            Ok(())
        }
        ReferenceCarrier::Identity(field, slots) => {
            match key {
                Some(key) => {
                    key.check(slots)?;
                    let mut identity = instance
                        .get(&field.name)
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    identity.insert(IDENTITY_KEY.to_string(), Value::String(key.to_text()));
                    instance.insert(field.name.clone(), Value::Object(identity));
                }
                None => {
                    instance.insert(field.name.clone(), Value::Null);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip_with_awkward_strings() {
        let key = InstanceKey::new(vec![
            KeyValue::String("a,\"b\"]\\".to_string()),
            KeyValue::Int(-7),
            KeyValue::Decimal("12.50".to_string()),
            KeyValue::Bool(true),
        ]);
        let slots = vec![
            PrimitiveType::String,
            PrimitiveType::Int,
            PrimitiveType::Decimal,
            PrimitiveType::Bool,
        ];
        let text = key.to_text();
        assert_eq!(InstanceKey::parse(&text, &slots).unwrap(), key);
    }

    #[test]
    fn test_date_values() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        let key = InstanceKey::new(vec![KeyValue::Date(date)]);
        assert_eq!(key.to_text(), "[\"2024-02-29T13:05:00\"]");
        assert_eq!(InstanceKey::parse(&key.to_text(), &[PrimitiveType::Date]).unwrap(), key);

        let date_only = InstanceKey::parse("[\"2024-02-29\"]", &[PrimitiveType::Date]).unwrap();
        assert_eq!(
            date_only.values()[0],
            KeyValue::Date(
                NaiveDate::from_ymd_opt(2024, 2, 29)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_parse_errors() {
        let slots = [PrimitiveType::Int];
        assert!(matches!(
            InstanceKey::parse("1,2", &slots),
            Err(KeyError::Malformed { .. })
        ));
        assert_eq!(
            InstanceKey::parse("[1,2]", &slots),
            Err(KeyError::Arity { expected: 1, actual: 2 })
        );
        assert!(matches!(
            InstanceKey::parse("[\"x\"]", &slots),
            Err(KeyError::TypeMismatch { slot: 0, .. })
        ));
        assert!(KeyValue::decimal("1e5").is_none());
    }

    #[test]
    fn test_ui_identity_forms() {
        let slots = [PrimitiveType::Int, PrimitiveType::String];
        let saved = UiIdentity::Saved(InstanceKey::new(vec![
            KeyValue::Int(3),
            KeyValue::String("A-7".to_string()),
        ]));
        assert_eq!(UiIdentity::restore(&saved.to_text(), &slots).unwrap(), saved);

        let unsaved = UiIdentity::new_unsaved();
        assert!(!unsaved.to_text().starts_with('['));
        assert_eq!(UiIdentity::restore(&unsaved.to_text(), &slots).unwrap(), unsaved);

        let quoted = "\"67e55044-10b1-426f-9247-bb680e5fe0c8\"";
        assert!(matches!(
            UiIdentity::restore(quoted, &slots),
            Ok(UiIdentity::Unsaved(_))
        ));
        assert!(matches!(
            UiIdentity::restore("not-a-uuid", &slots),
            Err(KeyError::Malformed { .. })
        ));
    }
}
