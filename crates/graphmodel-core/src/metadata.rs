//! Entity metadata: persistent fields, relationships and identity per label.
//!
//! The session never inspects entity types on its own. Everything it needs to
//! know about a label goes through the [`EntityMetadata`] trait, which must be
//! deterministic and side-effect free. [`SchemaRegistry`] is the provided
//! implementation, built from [`NodeSchema`] descriptors.
//!
//! # Example
//!
//! ```
//! use graphmodel_core::{Direction, EntityMetadata, FieldInfo, NodeSchema, RelationshipInfo, ScalarType, SchemaRegistry};
//!
//! let registry = SchemaRegistry::new()
//!     .with(
//!         NodeSchema::new("Ingredient")
//!             .field(FieldInfo::new("name", ScalarType::Text))
//!             .relationship(RelationshipInfo::new(
//!                 "pairings",
//!                 "PAIRS_WITH",
//!                 Direction::Undirected,
//!                 "Ingredient",
//!             )),
//!     )
//!     .unwrap();
//!
//! assert_eq!(registry.identity_field_of("Ingredient").unwrap(), Some("id"));
//! assert_eq!(registry.relationships_of("Ingredient").unwrap().len(), 1);
//! ```

use crate::entity::Properties;
use crate::error::{Error, MappingErrorKind, MetadataErrorKind, Result};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Declared direction of a relationship field, relative to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// The owner is the start node.
    Outgoing,
    /// The owner is the end node.
    Incoming,
    /// Either orientation; the side that initiates the save becomes the start node.
    Undirected,
}

impl Direction {
    /// The direction the other endpoint must declare for the same relationship.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Undirected => Direction::Undirected,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Outgoing => "OUTGOING",
            Direction::Incoming => "INCOMING",
            Direction::Undirected => "UNDIRECTED",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared scalar type of a persistent field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    Text,
    /// No declared type; values are stored as given.
    #[default]
    Any,
}

impl ScalarType {
    /// Normalise a stored value to the declared type.
    ///
    /// Transports that round-trip through JSON lose the distinction between
    /// `1` and `1.0`; declared floats are widened back. Everything else is
    /// returned untouched.
    #[must_use]
    pub fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (ScalarType::Float, Value::Int(v)) => Value::Float(v as f64),
            (_, value) => value,
        }
    }
}

/// A persistent scalar field of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub scalar_type: ScalarType,
}

impl FieldInfo {
    #[must_use]
    pub const fn new(name: &'static str, scalar_type: ScalarType) -> Self {
        Self { name, scalar_type }
    }
}

/// A relationship field declared by a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship field on the owning entity.
    pub field: &'static str,
    /// Relationship type stored in the database (e.g. `"KNOWN_BY"`).
    pub rel_type: &'static str,
    pub direction: Direction,
    /// Label every related entity must carry.
    pub target_label: &'static str,
    /// The field on the target label that declares the same relationship
    /// from the other side.
    pub back_populates: Option<&'static str>,
}

impl RelationshipInfo {
    #[must_use]
    pub const fn new(
        field: &'static str,
        rel_type: &'static str,
        direction: Direction,
        target_label: &'static str,
    ) -> Self {
        Self {
            field,
            rel_type,
            direction,
            target_label,
            back_populates: None,
        }
    }

    /// Declare the mirror field on the target label (builder pattern).
    #[must_use]
    pub const fn back_populates(mut self, field: &'static str) -> Self {
        self.back_populates = Some(field);
        self
    }
}

/// Lookup service for entity metadata.
pub trait EntityMetadata: Send + Sync {
    /// Persistent scalar fields of `label`, in declaration order.
    fn fields_of(&self, label: &str) -> Result<&[FieldInfo]>;

    /// Relationship fields declared by `label`.
    fn relationships_of(&self, label: &str) -> Result<&[RelationshipInfo]>;

    /// Field that carries the database identity, if the label has one.
    fn identity_field_of(&self, label: &str) -> Result<Option<&'static str>>;

    /// Look up one relationship field of `label`.
    fn relationship(&self, label: &str, field: &str) -> Result<&RelationshipInfo> {
        self.relationships_of(label)?
            .iter()
            .find(|r| r.field == field)
            .ok_or_else(|| {
                Error::metadata(
                    MetadataErrorKind::UnknownRelationship,
                    label,
                    format!("no relationship field '{}'", field),
                )
            })
    }

    /// Cross-check the whole model, if the implementation can enumerate it.
    fn verify(&self) -> Result<()> {
        Ok(())
    }

    /// The subset of `properties` that `label` persists, coerced to the
    /// declared types. Undeclared keys and the identity field are dropped.
    fn persistent_properties(&self, label: &str, properties: &Properties) -> Result<Properties> {
        let identity = self.identity_field_of(label)?;
        let mut persistent = Properties::new();
        for field in self.fields_of(label)? {
            if Some(field.name) == identity {
                continue;
            }
            if let Some(value) = properties.get(field.name) {
                persistent.insert(field.name.to_string(), field.scalar_type.coerce(value.clone()));
            }
        }
        Ok(persistent)
    }
}

/// Check that a relationship's `back_populates` mirror describes the same
/// logical relationship seen from the other endpoint.
///
/// The mirror must exist on the target label, carry the same relationship
/// type, the reverse direction, and point back at `owner_label`.
pub fn check_back_reference<M: EntityMetadata + ?Sized>(
    metadata: &M,
    owner_label: &str,
    info: &RelationshipInfo,
) -> Result<()> {
    let Some(back_field) = info.back_populates else {
        return Ok(());
    };

    let mirror = metadata.relationship(info.target_label, back_field)?;

    if mirror.rel_type != info.rel_type || mirror.direction != info.direction.reverse() {
        return Err(Error::mapping(
            MappingErrorKind::ConflictingDirection,
            format!(
                "{}.{} declares {} {} but {}.{} declares {} {}",
                owner_label,
                info.field,
                info.rel_type,
                info.direction,
                info.target_label,
                back_field,
                mirror.rel_type,
                mirror.direction
            ),
        ));
    }

    if mirror.target_label != owner_label {
        return Err(Error::mapping(
            MappingErrorKind::UnexpectedTarget,
            format!(
                "{}.{} points back at {} instead of {}",
                info.target_label, back_field, mirror.target_label, owner_label
            ),
        ));
    }

    Ok(())
}

/// Identifier rule for labels, relationship types and field names.
fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
    })
}

fn check_identifier(label: &str, what: &str, name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::metadata(
            MetadataErrorKind::InvalidIdentifier,
            label,
            format!("invalid {} '{}'", what, name),
        ))
    }
}

/// Mapping descriptor for one label.
#[derive(Debug, Clone)]
pub struct NodeSchema {
    pub label: &'static str,
    pub identity_field: Option<&'static str>,
    pub fields: Vec<FieldInfo>,
    pub relationships: Vec<RelationshipInfo>,
}

impl NodeSchema {
    /// Create a schema whose identity lives in the `id` field.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            identity_field: Some("id"),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Use a different identity field name.
    #[must_use]
    pub fn identity(mut self, field: &'static str) -> Self {
        self.identity_field = Some(field);
        self
    }

    /// Declare that this label has no identity field (it can be read but
    /// never persisted).
    #[must_use]
    pub fn without_identity(mut self) -> Self {
        self.identity_field = None;
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipInfo) -> Self {
        self.relationships.push(relationship);
        self
    }

    fn check(&self) -> Result<()> {
        check_identifier(self.label, "label", self.label)?;
        if let Some(identity) = self.identity_field {
            check_identifier(self.label, "identity field", identity)?;
        }
        for field in &self.fields {
            check_identifier(self.label, "field", field.name)?;
        }
        for rel in &self.relationships {
            check_identifier(self.label, "relationship field", rel.field)?;
            check_identifier(self.label, "relationship type", rel.rel_type)?;
            check_identifier(self.label, "target label", rel.target_label)?;
        }
        Ok(())
    }
}

/// In-memory [`EntityMetadata`] built from [`NodeSchema`]s.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, NodeSchema>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema.
    ///
    /// Fails on invalid identifiers or if the label is already registered.
    pub fn register(&mut self, schema: NodeSchema) -> Result<()> {
        schema.check()?;
        if self.schemas.contains_key(schema.label) {
            return Err(Error::metadata(
                MetadataErrorKind::DuplicateLabel,
                schema.label,
                "label registered twice",
            ));
        }
        tracing::debug!(
            label = schema.label,
            fields = schema.fields.len(),
            relationships = schema.relationships.len(),
            "Registered node schema"
        );
        self.schemas.insert(schema.label, schema);
        Ok(())
    }

    /// Register a schema (builder pattern).
    pub fn with(mut self, schema: NodeSchema) -> Result<Self> {
        self.register(schema)?;
        Ok(self)
    }

    /// Cross-check every relationship: target labels must be registered and
    /// `back_populates` mirrors must agree on type and direction.
    pub fn validate(&self) -> Result<()> {
        let mut labels: Vec<&&'static str> = self.schemas.keys().collect();
        labels.sort();
        for label in labels {
            let schema = &self.schemas[*label];
            for rel in &schema.relationships {
                if !self.schemas.contains_key(rel.target_label) {
                    return Err(Error::metadata(
                        MetadataErrorKind::UnknownLabel,
                        rel.target_label,
                        format!("target of {}.{} is not registered", schema.label, rel.field),
                    ));
                }
                check_back_reference(self, schema.label, rel)?;
            }
        }
        Ok(())
    }

    pub fn schema(&self, label: &str) -> Option<&NodeSchema> {
        self.schemas.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    fn resolve(&self, label: &str) -> Result<&NodeSchema> {
        self.schemas.get(label).ok_or_else(|| {
            Error::metadata(MetadataErrorKind::UnknownLabel, label, "no schema registered")
        })
    }
}

impl EntityMetadata for SchemaRegistry {
    fn fields_of(&self, label: &str) -> Result<&[FieldInfo]> {
        Ok(&self.resolve(label)?.fields)
    }

    fn relationships_of(&self, label: &str) -> Result<&[RelationshipInfo]> {
        Ok(&self.resolve(label)?.relationships)
    }

    fn identity_field_of(&self, label: &str) -> Result<Option<&'static str>> {
        Ok(self.resolve(label)?.identity_field)
    }

    fn verify(&self) -> Result<()> {
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> NodeSchema {
        NodeSchema::new("Person")
            .field(FieldInfo::new("name", ScalarType::Text))
            .field(FieldInfo::new("height", ScalarType::Float))
            .relationship(
                RelationshipInfo::new("follows", "FOLLOWS", Direction::Outgoing, "Person")
                    .back_populates("followers"),
            )
            .relationship(
                RelationshipInfo::new("followers", "FOLLOWS", Direction::Incoming, "Person")
                    .back_populates("follows"),
            )
    }

    #[test]
    fn test_unknown_label_is_metadata_error() {
        let registry = SchemaRegistry::new();
        let err = registry.fields_of("Nope").unwrap_err();
        assert!(matches!(
            err,
            Error::Metadata(ref m) if m.kind == MetadataErrorKind::UnknownLabel
        ));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(NodeSchema::new("Person").relationship(RelationshipInfo::new(
                "knows",
                "KNOWS; DROP",
                Direction::Outgoing,
                "Person",
            )))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Metadata(ref m) if m.kind == MetadataErrorKind::InvalidIdentifier
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(person()).unwrap();
        let err = registry.register(person()).unwrap_err();
        assert!(matches!(
            err,
            Error::Metadata(ref m) if m.kind == MetadataErrorKind::DuplicateLabel
        ));
    }

    #[test]
    fn test_mirrored_back_reference_validates() {
        let registry = SchemaRegistry::new().with(person()).unwrap();
        registry.validate().unwrap();
    }

    #[test]
    fn test_non_mirrored_directions_conflict() {
        let registry = SchemaRegistry::new()
            .with(
                NodeSchema::new("Person")
                    .relationship(
                        RelationshipInfo::new("follows", "FOLLOWS", Direction::Outgoing, "Person")
                            .back_populates("followers"),
                    )
                    .relationship(
                        RelationshipInfo::new("followers", "FOLLOWS", Direction::Outgoing, "Person")
                            .back_populates("follows"),
                    ),
            )
            .unwrap();
        let err = registry.validate().unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_missing_mirror_is_unknown_relationship() {
        let registry = SchemaRegistry::new()
            .with(NodeSchema::new("Person").relationship(
                RelationshipInfo::new("follows", "FOLLOWS", Direction::Outgoing, "Person")
                    .back_populates("fans"),
            ))
            .unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Metadata(ref m) if m.kind == MetadataErrorKind::UnknownRelationship
        ));
    }

    #[test]
    fn test_unregistered_target_label() {
        let registry = SchemaRegistry::new()
            .with(NodeSchema::new("Person").relationship(RelationshipInfo::new(
                "pets",
                "OWNS",
                Direction::Outgoing,
                "Pet",
            )))
            .unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Metadata(ref m) if m.kind == MetadataErrorKind::UnknownLabel && m.label == "Pet"
        ));
    }

    #[test]
    fn test_persistent_properties_filters_and_coerces() {
        let registry = SchemaRegistry::new().with(person()).unwrap();
        let mut props = Properties::new();
        props.insert("name".into(), Value::Text("Ada".into()));
        props.insert("height".into(), Value::Int(2));
        props.insert("id".into(), Value::Int(99));
        props.insert("scratch".into(), Value::Bool(true));

        let persistent = registry.persistent_properties("Person", &props).unwrap();
        assert_eq!(persistent.len(), 2);
        assert_eq!(persistent.get("height"), Some(&Value::Float(2.0)));
        assert!(!persistent.contains_key("scratch"));
        assert!(!persistent.contains_key("id"));
    }

    #[test]
    fn test_identity_field_override() {
        let registry = SchemaRegistry::new()
            .with(NodeSchema::new("Tag").without_identity())
            .unwrap()
            .with(NodeSchema::new("Doc").identity("docId"))
            .unwrap();
        assert_eq!(registry.identity_field_of("Tag").unwrap(), None);
        assert_eq!(registry.identity_field_of("Doc").unwrap(), Some("docId"));
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Outgoing.reverse(), Direction::Incoming);
        assert_eq!(Direction::Undirected.reverse(), Direction::Undirected);
        assert_eq!(Direction::Incoming.to_string(), "INCOMING");
    }
}
