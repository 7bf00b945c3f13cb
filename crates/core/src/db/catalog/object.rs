use super::sequence::NumberSequence;
use crate::db::names::QName;
use crate::db::store::HybridRowStore;
use parking_lot::RwLock;
use quartzdb_primitives::ColSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: Box<str>,
    pub type_name: Box<str>,
    pub nullable: bool,
    pub is_lob: bool,
}

impl ColumnDef {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            is_lob: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn lob(mut self) -> Self {
        self.is_lob = true;
        self
    }
}

/// A base table. The rows live in the attached hybrid store; sessions
/// reach it through the catalog and share it by `Arc`. Foreign keys are
/// not recorded here: they are [`Constraint`] objects parented on the
/// table, and the reference graph carries their edges.
pub struct Table {
    pub name: QName,
    pub columns: Vec<ColumnDef>,
    pub primary_key: ColSet,
    pub store: Arc<RwLock<HybridRowStore>>,
}

impl Table {
    pub fn lob_columns(&self) -> ColSet {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_lob)
            .map(|(i, _)| i as u16)
            .collect()
    }
}

/// A view: compiled statement text plus the names it resolves to.
/// The compiled form embeds referenced names, which is why renaming a
/// referenced object is refused while views exist.
pub struct View {
    pub name: QName,
    pub sql: Box<str>,
    pub references: Vec<QName>,
    /// Bumped whenever a dependency's ALTER forces recompilation.
    pub recompile_count: u32,
}

pub struct Routine {
    pub name: QName,
    pub body: Box<str>,
    pub references: Vec<QName>,
    pub recompile_count: u32,
}

pub struct Trigger {
    pub name: QName,
    pub table: QName,
    pub references: Vec<QName>,
    pub recompile_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

pub struct Constraint {
    pub name: QName,
    pub table: QName,
    pub kind: ConstraintKind,
    pub cols: ColSet,
    /// For foreign keys, the referenced table.
    pub referenced_table: Option<QName>,
    pub recompile_count: u32,
}

pub struct IndexObject {
    pub name: QName,
    pub table: QName,
    pub cols: ColSet,
    pub is_unique: bool,
}

/// A user-defined type or domain; the two share a namespace but keep
/// distinct kinds.
pub struct TypeObject {
    pub name: QName,
    pub base_type: Box<str>,
}

pub struct Charset {
    pub name: QName,
    pub base: Box<str>,
}

pub struct Collation {
    pub name: QName,
    pub charset: Box<str>,
}

/// A synonym: an alternate name resolving to another object.
pub struct Reference {
    pub name: QName,
    pub target: QName,
}

/// Every kind of object a schema can hold, behind one variant so the
/// catalog can treat name, kind and outgoing references uniformly.
pub enum SchemaObject {
    Table(Table),
    View(View),
    Sequence(NumberSequence),
    Routine(Routine),
    Trigger(Trigger),
    Constraint(Constraint),
    Index(IndexObject),
    Type(TypeObject),
    Domain(TypeObject),
    Charset(Charset),
    Collation(Collation),
    Reference(Reference),
}

impl SchemaObject {
    pub fn name(&self) -> &QName {
        match self {
            SchemaObject::Table(o) => &o.name,
            SchemaObject::View(o) => &o.name,
            SchemaObject::Sequence(o) => &o.name,
            SchemaObject::Routine(o) => &o.name,
            SchemaObject::Trigger(o) => &o.name,
            SchemaObject::Constraint(o) => &o.name,
            SchemaObject::Index(o) => &o.name,
            SchemaObject::Type(o) | SchemaObject::Domain(o) => &o.name,
            SchemaObject::Charset(o) => &o.name,
            SchemaObject::Collation(o) => &o.name,
            SchemaObject::Reference(o) => &o.name,
        }
    }

    /// Every name this object's definition mentions; the registry turns
    /// these into reference-graph edges.
    pub fn references(&self) -> Vec<QName> {
        match self {
            SchemaObject::Table(_) => Vec::new(),
            SchemaObject::View(o) => o.references.clone(),
            SchemaObject::Sequence(_) => Vec::new(),
            SchemaObject::Routine(o) => o.references.clone(),
            SchemaObject::Trigger(o) => {
                let mut refs = o.references.clone();
                refs.push(o.table.clone());
                refs
            }
            SchemaObject::Constraint(o) => {
                let mut refs = vec![o.table.clone()];
                refs.extend(o.referenced_table.clone());
                refs
            }
            SchemaObject::Index(o) => vec![o.table.clone()],
            SchemaObject::Type(_) | SchemaObject::Domain(_) => Vec::new(),
            SchemaObject::Charset(_) | SchemaObject::Collation(_) => Vec::new(),
            SchemaObject::Reference(o) => vec![o.target.clone()],
        }
    }

    /// Whether the object's compiled form embeds names of other
    /// objects; such objects pin their dependencies against rename.
    pub fn has_compiled_form(&self) -> bool {
        matches!(
            self,
            SchemaObject::View(_) | SchemaObject::Routine(_) | SchemaObject::Trigger(_)
        )
    }

    /// Re-resolves the compiled form after a dependency changed shape.
    /// The SQL compiler lives outside the kernel; the catalog records
    /// that recompilation happened.
    pub fn recompile(&mut self) {
        match self {
            SchemaObject::View(o) => o.recompile_count += 1,
            SchemaObject::Routine(o) => o.recompile_count += 1,
            SchemaObject::Trigger(o) => o.recompile_count += 1,
            SchemaObject::Constraint(o) => o.recompile_count += 1,
            _ => {}
        }
    }
}
