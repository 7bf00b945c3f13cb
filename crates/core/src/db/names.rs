//! Interned object names and the catalog-wide reference graph.
//!
//! Two [`QName`]s compare equal only when they are the same interned
//! allocation; renaming or re-creating an object under the same text
//! yields a distinct name. The registry records which object names
//! mention which others so the catalog can refuse or cascade drops.

use indexmap::IndexSet;
use parking_lot::RwLock;
use quartzdb_primitives::ObjectKind;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

struct NameInner {
    name: RwLock<Box<str>>,
    quoted: bool,
    kind: ObjectKind,
    /// Owning schema name, `None` for schemas and grantees.
    schema: Option<QName>,
    /// Enclosing object for columns, indexes and constraints.
    parent: Option<QName>,
    /// Name of the grantee that owns the object.
    owner: Option<Box<str>>,
}

/// An interned, immutable object name. Cheap to clone; equality and
/// hashing go by allocation identity, never by text.
#[derive(Clone)]
pub struct QName(Arc<NameInner>);

impl QName {
    pub fn name(&self) -> String {
        self.0.name.read().to_string()
    }

    /// Renames in place. Identity (and therefore every reference-graph
    /// edge and store keyed by this name) is preserved; only the text
    /// changes. The catalog is the sole caller, under its write lock.
    pub(crate) fn rename(&self, new_name: &str) {
        *self.0.name.write() = new_name.into();
    }

    pub fn kind(&self) -> ObjectKind {
        self.0.kind
    }

    pub fn schema(&self) -> Option<&QName> {
        self.0.schema.as_ref()
    }

    pub fn parent(&self) -> Option<&QName> {
        self.0.parent.as_ref()
    }

    pub fn owner(&self) -> Option<&str> {
        self.0.owner.as_deref()
    }

    pub fn is_quoted(&self) -> bool {
        self.0.quoted
    }

    /// The form the name takes when embedded in statement text.
    pub fn statement_name(&self) -> String {
        let name = self.0.name.read();
        if self.0.quoted {
            format!("\"{}\"", name.replace('"', "\"\""))
        } else {
            name.to_string()
        }
    }

    /// Schema-qualified rendering, for messages.
    pub fn qualified(&self) -> String {
        match &self.0.schema {
            Some(schema) => format!("{}.{}", schema.statement_name(), self.statement_name()),
            None => self.statement_name(),
        }
    }

    pub fn in_schema(&self, schema: &QName) -> bool {
        self.0.schema.as_ref().is_some_and(|s| s == schema)
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0.kind, self.qualified())
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// Builder-style constructor set for [`QName`]. Uniqueness is not
/// enforced here; the schema object sets are the authority on that.
pub struct NameRegistry {
    /// referent -> names of objects whose definition mentions it.
    referrers: HashMap<QName, IndexSet<QName>>,
    /// referrer -> the referents its definition mentions. Kept so edge
    /// removal is exact rather than a full scan.
    referents: HashMap<QName, Vec<QName>>,
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NameRegistry {
    pub fn new() -> Self {
        Self {
            referrers: HashMap::new(),
            referents: HashMap::new(),
        }
    }

    pub fn new_name(&self, name: &str, quoted: bool, kind: ObjectKind) -> QName {
        QName(Arc::new(NameInner {
            name: RwLock::new(name.into()),
            quoted,
            kind,
            schema: None,
            parent: None,
            owner: None,
        }))
    }

    /// A schema's own name; carries the owning grantee for the
    /// schema-owner shortcut in access checks.
    pub fn new_schema_name(&self, name: &str, quoted: bool, owner: &str) -> QName {
        QName(Arc::new(NameInner {
            name: RwLock::new(name.into()),
            quoted,
            kind: ObjectKind::Schema,
            schema: None,
            parent: None,
            owner: Some(owner.into()),
        }))
    }

    pub fn new_schema_object_name(
        &self,
        name: &str,
        quoted: bool,
        kind: ObjectKind,
        schema: &QName,
        owner: Option<&str>,
    ) -> QName {
        QName(Arc::new(NameInner {
            name: RwLock::new(name.into()),
            quoted,
            kind,
            schema: Some(schema.clone()),
            parent: None,
            owner: owner.map(Into::into),
        }))
    }

    pub fn new_child_name(&self, name: &str, quoted: bool, kind: ObjectKind, parent: &QName) -> QName {
        QName(Arc::new(NameInner {
            name: RwLock::new(name.into()),
            quoted,
            kind,
            schema: parent.schema().cloned(),
            parent: Some(parent.clone()),
            owner: parent.owner().map(Into::into),
        }))
    }

    /// Records one edge per referent: `referent -> from`. Called when an
    /// object whose definition names others enters the catalog. Must run
    /// under the catalog's exclusive lock.
    pub fn add_references(&mut self, from: &QName, referents: &[QName]) {
        for referent in referents {
            self.referrers
                .entry(referent.clone())
                .or_default()
                .insert(from.clone());
        }
        if !referents.is_empty() {
            self.referents
                .entry(from.clone())
                .or_default()
                .extend(referents.iter().cloned());
        }
    }

    /// Removes exactly the edges a previous [`Self::add_references`]
    /// with the same `from` added.
    pub fn remove_references(&mut self, from: &QName) {
        let Some(referents) = self.referents.remove(from) else {
            return;
        };
        for referent in referents {
            if let Some(set) = self.referrers.get_mut(&referent) {
                set.shift_remove(from);
                if set.is_empty() {
                    self.referrers.remove(&referent);
                }
            }
        }
    }

    pub fn referrers_of(&self, name: &QName) -> Vec<QName> {
        self.referrers
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_referrers(&self, name: &QName) -> bool {
        self.referrers.get(name).is_some_and(|set| !set.is_empty())
    }

    /// Transitive closure of referrers, in discovery order. Terminates
    /// when a pass adds no new name.
    pub fn cascading_referrers_of(&self, name: &QName) -> IndexSet<QName> {
        let mut closure: IndexSet<QName> = self.referrers.get(name).cloned().unwrap_or_default();
        loop {
            let before = closure.len();
            let frontier: Vec<QName> = closure.iter().cloned().collect();
            for referrer in frontier {
                if let Some(next) = self.referrers.get(&referrer) {
                    closure.extend(next.iter().cloned());
                }
            }
            if closure.len() == before {
                return closure;
            }
        }
    }

    /// Every referrer, from anywhere, of any object that lives in
    /// `schema`.
    pub fn referrers_in_schema(&self, schema: &QName) -> IndexSet<QName> {
        let mut out = IndexSet::new();
        for (referent, referrers) in &self.referrers {
            if referent.in_schema(schema) || referent == schema {
                out.extend(referrers.iter().cloned());
            }
        }
        out
    }

    /// Edge count, for invariant checks: equals the number of
    /// `add_references` edges not yet removed.
    pub fn edge_count(&self) -> usize {
        self.referents.values().map(Vec::len).sum()
    }
}
