use super::object::SchemaObject;
use crate::db::names::QName;
use indexmap::IndexMap;
use quartzdb_primitives::ObjectKind;

/// One schema: a named owner plus per-object-kind ordered sets.
/// Tables and views share a namespace, as do types and domains.
pub struct Schema {
    pub name: QName,
    pub owner: Box<str>,
    tables: IndexMap<Box<str>, SchemaObject>,
    sequences: IndexMap<Box<str>, SchemaObject>,
    routines: IndexMap<Box<str>, SchemaObject>,
    types: IndexMap<Box<str>, SchemaObject>,
    charsets: IndexMap<Box<str>, SchemaObject>,
    collations: IndexMap<Box<str>, SchemaObject>,
    indexes: IndexMap<Box<str>, SchemaObject>,
    constraints: IndexMap<Box<str>, SchemaObject>,
    triggers: IndexMap<Box<str>, SchemaObject>,
    references: IndexMap<Box<str>, SchemaObject>,
}

impl Schema {
    pub fn new(name: QName, owner: &str) -> Self {
        Self {
            name,
            owner: owner.into(),
            tables: IndexMap::new(),
            sequences: IndexMap::new(),
            routines: IndexMap::new(),
            types: IndexMap::new(),
            charsets: IndexMap::new(),
            collations: IndexMap::new(),
            indexes: IndexMap::new(),
            constraints: IndexMap::new(),
            triggers: IndexMap::new(),
            references: IndexMap::new(),
        }
    }

    pub(super) fn set_for(&self, kind: ObjectKind) -> &IndexMap<Box<str>, SchemaObject> {
        match kind {
            ObjectKind::Table | ObjectKind::View => &self.tables,
            ObjectKind::Sequence => &self.sequences,
            ObjectKind::Routine => &self.routines,
            ObjectKind::Type | ObjectKind::Domain => &self.types,
            ObjectKind::Charset => &self.charsets,
            ObjectKind::Collation => &self.collations,
            ObjectKind::Index => &self.indexes,
            ObjectKind::Constraint => &self.constraints,
            ObjectKind::Trigger => &self.triggers,
            _ => &self.references,
        }
    }

    pub(super) fn set_for_mut(&mut self, kind: ObjectKind) -> &mut IndexMap<Box<str>, SchemaObject> {
        match kind {
            ObjectKind::Table | ObjectKind::View => &mut self.tables,
            ObjectKind::Sequence => &mut self.sequences,
            ObjectKind::Routine => &mut self.routines,
            ObjectKind::Type | ObjectKind::Domain => &mut self.types,
            ObjectKind::Charset => &mut self.charsets,
            ObjectKind::Collation => &mut self.collations,
            ObjectKind::Index => &mut self.indexes,
            ObjectKind::Constraint => &mut self.constraints,
            ObjectKind::Trigger => &mut self.triggers,
            _ => &mut self.references,
        }
    }

    pub fn object(&self, kind: ObjectKind, name: &str) -> Option<&SchemaObject> {
        self.set_for(kind).get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.sequences.is_empty()
            && self.routines.is_empty()
            && self.types.is_empty()
            && self.charsets.is_empty()
            && self.collations.is_empty()
            && self.indexes.is_empty()
            && self.constraints.is_empty()
            && self.triggers.is_empty()
            && self.references.is_empty()
    }

    fn all_sets(&self) -> [&IndexMap<Box<str>, SchemaObject>; 10] {
        [
            &self.references,
            &self.triggers,
            &self.constraints,
            &self.indexes,
            &self.tables,
            &self.sequences,
            &self.routines,
            &self.types,
            &self.collations,
            &self.charsets,
        ]
    }

    /// Every object name in the schema, dependents-first: references,
    /// triggers, constraints and indexes before the tables they hang
    /// off, ancillary kinds last.
    pub fn object_names(&self) -> Vec<QName> {
        self.all_sets()
            .into_iter()
            .flat_map(|set| set.values().map(|o| o.name().clone()))
            .collect()
    }

    /// The TABLE / SEQUENCE / ROUTINE children a schema-level grant
    /// expands into.
    pub fn grantable_children(&self) -> Vec<QName> {
        self.tables
            .values()
            .chain(self.sequences.values())
            .chain(self.routines.values())
            .map(|o| o.name().clone())
            .collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &SchemaObject> {
        self.tables.values()
    }
}
