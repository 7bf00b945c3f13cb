use super::object::{ColumnDef, Constraint, ConstraintKind, SchemaObject, Table, Trigger, View};
use super::schema::Schema;
use super::sequence::NumberSequence;
use crate::db::names::{NameRegistry, QName};
use crate::db::store::HybridRowStore;
use crate::error::{CatalogError, Result};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools as _;
use parking_lot::RwLock;
use quartzdb_primitives::{ColSet, ObjectKind};
use std::sync::Arc;

pub const DEFAULT_SCHEMA: &str = "PUBLIC";
pub const SYSTEM_SCHEMA: &str = "SYSTEM_SCHEMA";
pub const INFORMATION_SCHEMA: &str = "INFORMATION_SCHEMA";

fn is_system_schema(name: &str) -> bool {
    matches!(name, SYSTEM_SCHEMA | INFORMATION_SCHEMA)
}

fn is_descendant_of(name: &QName, ancestor: &QName) -> bool {
    let mut current = name.parent();
    while let Some(parent) = current {
        if parent == ancestor {
            return true;
        }
        current = parent.parent();
    }
    false
}

/// The schema catalog: schema CRUD, object CRUD with reference
/// integrity and cascading drops. Callers hold the catalog behind one
/// read/write lock; every mutating method assumes exclusive access.
pub struct SchemaManager {
    registry: NameRegistry,
    schemas: IndexMap<Box<str>, Schema>,
    default_schema: Box<str>,
}

impl SchemaManager {
    pub fn new(default_owner: &str) -> Self {
        let registry = NameRegistry::new();
        let mut schemas = IndexMap::new();
        let system_name = registry.new_schema_name(SYSTEM_SCHEMA, false, crate::db::rights::SYSTEM_AUTHORIZATION);
        schemas.insert(
            Box::from(SYSTEM_SCHEMA),
            Schema::new(system_name, crate::db::rights::SYSTEM_AUTHORIZATION),
        );
        let default_name = registry.new_schema_name(DEFAULT_SCHEMA, false, default_owner);
        schemas.insert(Box::from(DEFAULT_SCHEMA), Schema::new(default_name, default_owner));
        Self {
            registry,
            schemas,
            default_schema: DEFAULT_SCHEMA.into(),
        }
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    pub fn default_schema_name(&self) -> &str {
        &self.default_schema
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    fn require_schema(&self, name: &str) -> Result<&Schema> {
        self.schemas.get(name).ok_or_else(|| {
            CatalogError::ObjectNotFound {
                kind: ObjectKind::Schema,
                name: name.into(),
            }
            .into()
        })
    }

    fn require_schema_mut(&mut self, name: &str) -> Result<&mut Schema> {
        self.schemas.get_mut(name).ok_or_else(|| {
            CatalogError::ObjectNotFound {
                kind: ObjectKind::Schema,
                name: name.into(),
            }
            .into()
        })
    }

    // ---- schema CRUD ---------------------------------------------------------

    pub fn create_schema(&mut self, name: &str, owner: &str) -> Result<QName> {
        if is_system_schema(name) {
            return Err(CatalogError::SchemaNotModifiable(name.into()).into());
        }
        if self.schemas.contains_key(name) {
            return Err(CatalogError::ObjectExists {
                kind: ObjectKind::Schema,
                name: name.into(),
            }
            .into());
        }
        let qname = self.registry.new_schema_name(name, false, owner);
        self.schemas.insert(name.into(), Schema::new(qname.clone(), owner));
        log::trace!("SCHEMA CREATED: {} owner={}", name, owner);
        Ok(qname)
    }

    /// Drops a schema. Without `cascade` the schema must be empty.
    /// With it, every object inside goes, along with the transitive
    /// closure of outside objects referencing into the schema. If the
    /// dropped schema was the default, a fresh empty default replaces
    /// it. Returns every dropped object name so the caller can strip
    /// rights.
    pub fn drop_schema(&mut self, name: &str, cascade: bool) -> Result<Vec<QName>> {
        if is_system_schema(name) {
            return Err(CatalogError::SchemaNotModifiable(name.into()).into());
        }
        let schema = self.require_schema(name)?;
        if !schema.is_empty() && !cascade {
            return Err(CatalogError::SchemaNotEmpty(name.into()).into());
        }
        let schema_qname = schema.name.clone();
        let owner = schema.owner.clone();

        // Outside objects referencing into this schema, transitively.
        let mut external: IndexSet<QName> = IndexSet::new();
        for referrer in self.registry.referrers_in_schema(&schema_qname) {
            if !referrer.in_schema(&schema_qname) {
                for transitive in self.registry.cascading_referrers_of(&referrer) {
                    if !transitive.in_schema(&schema_qname) {
                        external.insert(transitive);
                    }
                }
                external.insert(referrer);
            }
        }
        // Dependents first within the external set.
        let mut dropped: Vec<QName> = external
            .into_iter()
            .sorted_by_key(|n| n.parent().is_none())
            .collect();
        for obj_name in &dropped {
            self.remove_single(obj_name);
        }

        let inside = self.require_schema(name)?.object_names();
        for obj_name in &inside {
            self.remove_single(obj_name);
        }
        dropped.extend(inside);

        self.schemas.shift_remove(name);
        log::trace!("SCHEMA DROPPED: {} cascade={}", name, cascade);

        if *name == *self.default_schema {
            let qname = self.registry.new_schema_name(name, false, &owner);
            self.schemas.insert(name.into(), Schema::new(qname, &owner));
            log::trace!("SCHEMA RECREATED: {} (was default)", name);
        }
        Ok(dropped)
    }

    // ---- object CRUD ---------------------------------------------------------

    /// Inserts a fully-built object into its schema's set and records
    /// its outgoing reference edges.
    pub fn add_schema_object(&mut self, object: SchemaObject) -> Result<()> {
        let name = object.name().clone();
        let refs = object.references();
        let schema_key = name
            .schema()
            .map(|s| s.name())
            .ok_or_else(|| CatalogError::ObjectNotFound {
                kind: ObjectKind::Schema,
                name: name.qualified(),
            })?;
        let schema = self.require_schema_mut(&schema_key)?;
        let set = schema.set_for_mut(name.kind());
        let key = name.name();
        if set.contains_key(&*key) {
            return Err(CatalogError::ObjectExists {
                kind: name.kind(),
                name: name.qualified(),
            }
            .into());
        }
        set.insert(key.into(), object);
        self.registry.add_references(&name, &refs);
        log::trace!("OBJECT ADDED: {:?}", name);
        Ok(())
    }

    pub fn find_schema_object(&self, schema: &str, kind: ObjectKind, name: &str) -> Option<&SchemaObject> {
        self.schemas.get(schema).and_then(|s| s.object(kind, name))
    }

    fn remove_single(&mut self, name: &QName) {
        self.registry.remove_references(name);
        if let Some(schema_name) = name.schema().map(|s| s.name()) {
            if let Some(schema) = self.schemas.get_mut(&*schema_name) {
                schema.set_for_mut(name.kind()).shift_remove(&*name.name());
            }
        }
        log::trace!("OBJECT DROPPED: {:?}", name);
    }

    /// Removes an object. Incoming references block the drop unless
    /// `cascade`, in which case the transitive referrer closure goes
    /// first, dependents before the objects they hang off. The object's
    /// own children never block it. Returns every dropped name.
    pub fn remove_schema_object(&mut self, name: &QName, cascade: bool) -> Result<Vec<QName>> {
        let closure = self.registry.cascading_referrers_of(name);
        if !cascade {
            if let Some(blocker) = closure.iter().find(|r| !is_descendant_of(r, name)) {
                return Err(CatalogError::ObjectReferenced {
                    object: name.qualified(),
                    referrer: blocker.qualified(),
                }
                .into());
            }
        }
        let doomed: Vec<QName> = closure
            .into_iter()
            .sorted_by_key(|n| n.parent().is_none())
            .collect();
        let mut dropped = Vec::new();
        for obj_name in doomed {
            self.remove_single(&obj_name);
            dropped.push(obj_name);
        }
        self.remove_single(name);
        dropped.push(name.clone());
        Ok(dropped)
    }

    /// Renames an object in place, keeping its identity. Refused while
    /// an object with a compiled form (view, routine, trigger) embeds
    /// the old name, and for cross-schema moves by construction.
    pub fn rename_schema_object(&mut self, name: &QName, new_name: &str) -> Result<()> {
        for referrer in self.registry.referrers_of(name) {
            if matches!(
                referrer.kind(),
                ObjectKind::View | ObjectKind::Routine | ObjectKind::Trigger
            ) {
                return Err(CatalogError::ObjectReferenced {
                    object: name.qualified(),
                    referrer: referrer.qualified(),
                }
                .into());
            }
        }
        let schema_key = name
            .schema()
            .map(|s| s.name())
            .ok_or_else(|| CatalogError::CrossSchemaRename {
                object: name.qualified(),
                schema: "".into(),
            })?;
        let schema = self.require_schema_mut(&schema_key)?;
        let set = schema.set_for_mut(name.kind());
        if set.contains_key(new_name) {
            return Err(CatalogError::ObjectExists {
                kind: name.kind(),
                name: new_name.into(),
            }
            .into());
        }
        let object = set.shift_remove(&*name.name()).ok_or_else(|| CatalogError::ObjectNotFound {
            kind: name.kind(),
            name: name.qualified(),
        })?;
        let old = name.name();
        name.rename(new_name);
        set.insert(new_name.into(), object);
        log::trace!("OBJECT RENAMED: {} -> {}", old, new_name);
        Ok(())
    }

    /// After ALTER TABLE, asks each dependent compiled object to
    /// recompile against the new shape.
    pub fn recompile_dependent_objects(&mut self, table: &QName) {
        for referrer in self.registry.referrers_of(table) {
            if !matches!(
                referrer.kind(),
                ObjectKind::View | ObjectKind::Constraint | ObjectKind::Routine | ObjectKind::Trigger
            ) {
                continue;
            }
            let Some(schema_name) = referrer.schema().map(|s| s.name()) else {
                continue;
            };
            if let Some(schema) = self.schemas.get_mut(&*schema_name) {
                if let Some(object) = schema.set_for_mut(referrer.kind()).get_mut(&*referrer.name()) {
                    object.recompile();
                    log::trace!("OBJECT RECOMPILED: {:?}", referrer);
                }
            }
        }
    }

    /// Drops a table. Foreign keys exported to other tables refuse the
    /// drop without `cascade`; with it, the referring tables are
    /// rewritten first through [`TableWorks`].
    pub fn drop_table(&mut self, name: &QName, cascade: bool) -> Result<Vec<QName>> {
        let exported: Vec<QName> = self
            .registry
            .referrers_of(name)
            .into_iter()
            .filter(|r| r.kind() == ObjectKind::Constraint && !is_descendant_of(r, name))
            .collect();
        if !exported.is_empty() && !cascade {
            return Err(CatalogError::ObjectReferenced {
                object: name.qualified(),
                referrer: exported[0].qualified(),
            }
            .into());
        }
        let mut works = TableWorks { manager: self };
        for constraint in &exported {
            works.drop_exported_foreign_key(constraint);
        }
        let mut dropped = self.remove_schema_object(name, cascade)?;
        dropped.extend(exported);
        Ok(dropped)
    }

    // ---- typed builders ------------------------------------------------------

    pub fn create_table(
        &mut self,
        schema: &str,
        name: &str,
        columns: Vec<ColumnDef>,
        primary_key: ColSet,
        max_memory_rows: usize,
    ) -> Result<QName> {
        let (schema_qname, owner) = {
            let s = self.require_schema(schema)?;
            (s.name.clone(), s.owner.clone())
        };
        let qname =
            self.registry
                .new_schema_object_name(name, false, ObjectKind::Table, &schema_qname, Some(&*owner));
        let mut store = HybridRowStore::new(qname.clone(), columns.len(), max_memory_rows);
        if !primary_key.is_empty() {
            store.add_index(&format!("SYS_IDX_{name}_PK"), primary_key.clone(), true);
        }
        log::trace!("TABLE CREATING: {}", qname);
        self.add_schema_object(SchemaObject::Table(Table {
            name: qname.clone(),
            columns,
            primary_key,
            store: Arc::new(RwLock::new(store)),
        }))?;
        Ok(qname)
    }

    pub fn create_view(&mut self, schema: &str, name: &str, sql: &str, references: &[QName]) -> Result<QName> {
        let (schema_qname, owner) = {
            let s = self.require_schema(schema)?;
            (s.name.clone(), s.owner.clone())
        };
        let qname = self
            .registry
            .new_schema_object_name(name, false, ObjectKind::View, &schema_qname, Some(&*owner));
        self.add_schema_object(SchemaObject::View(View {
            name: qname.clone(),
            sql: sql.into(),
            references: references.to_vec(),
            recompile_count: 0,
        }))?;
        Ok(qname)
    }

    pub fn create_sequence(&mut self, schema: &str, name: &str) -> Result<QName> {
        let (schema_qname, owner) = {
            let s = self.require_schema(schema)?;
            (s.name.clone(), s.owner.clone())
        };
        let qname =
            self.registry
                .new_schema_object_name(name, false, ObjectKind::Sequence, &schema_qname, Some(&*owner));
        self.add_schema_object(SchemaObject::Sequence(NumberSequence::with_defaults(qname.clone())))?;
        Ok(qname)
    }

    /// Adds a foreign-key constraint owned by `table`, pointing at
    /// `referenced`.
    pub fn add_foreign_key(&mut self, table: &QName, name: &str, cols: ColSet, referenced: &QName) -> Result<QName> {
        let qname = self.registry.new_child_name(name, false, ObjectKind::Constraint, table);
        self.add_schema_object(SchemaObject::Constraint(Constraint {
            name: qname.clone(),
            table: table.clone(),
            kind: ConstraintKind::ForeignKey,
            cols,
            referenced_table: Some(referenced.clone()),
            recompile_count: 0,
        }))?;
        Ok(qname)
    }

    pub fn add_trigger(&mut self, table: &QName, name: &str, references: &[QName]) -> Result<QName> {
        let qname = self.registry.new_child_name(name, false, ObjectKind::Trigger, table);
        self.add_schema_object(SchemaObject::Trigger(Trigger {
            name: qname.clone(),
            table: table.clone(),
            references: references.to_vec(),
            recompile_count: 0,
        }))?;
        Ok(qname)
    }

    // ---- row-path lookups ----------------------------------------------------

    pub fn table(&self, schema: &str, name: &str) -> Result<&Table> {
        match self.find_schema_object(schema, ObjectKind::Table, name) {
            Some(SchemaObject::Table(table)) => Ok(table),
            _ => Err(CatalogError::ObjectNotFound {
                kind: ObjectKind::Table,
                name: format!("{schema}.{name}"),
            }
            .into()),
        }
    }

    /// The store attached to a table name, if the name still resolves.
    pub fn store_of(&self, name: &QName) -> Option<Arc<RwLock<HybridRowStore>>> {
        let schema = name.schema()?.name();
        match self.schemas.get(&*schema)?.object(ObjectKind::Table, &name.name()) {
            Some(SchemaObject::Table(table)) if table.name == *name => Some(Arc::clone(&table.store)),
            _ => None,
        }
    }

    pub fn sequence_next(&mut self, schema: &str, name: &str) -> Result<(i64, bool, QName)> {
        let s = self.require_schema_mut(schema)?;
        match s.set_for_mut(ObjectKind::Sequence).get_mut(name) {
            Some(SchemaObject::Sequence(seq)) => {
                let qname = seq.name.clone();
                let (value, allocated) = seq.next_value()?;
                Ok((value, allocated, qname))
            }
            _ => Err(CatalogError::ObjectNotFound {
                kind: ObjectKind::Sequence,
                name: format!("{schema}.{name}"),
            }
            .into()),
        }
    }
}

/// The helper that rewrites referring tables when a referenced table
/// goes away: the exported foreign-key constraints are detached from
/// their owning tables before the target drops.
pub(crate) struct TableWorks<'a> {
    manager: &'a mut SchemaManager,
}

impl TableWorks<'_> {
    fn drop_exported_foreign_key(&mut self, constraint: &QName) {
        if let Some(owner) = constraint.parent() {
            log::trace!("TABLEWORKS: dropping {} from {}", constraint, owner);
        }
        self.manager.remove_single(constraint);
    }
}
