use crate::db::names::QName;
use quartzdb_primitives::{ColSet, ObjectKind, PrivilegeSet};

/// One grant over one database object: the privilege bits, the
/// per-column scopes for the column-scopable subset, the grantor that
/// issued it and, when granted WITH GRANT OPTION, the sub-right the
/// holder may pass on.
///
/// A column scope of `None` means "all columns, including ones added
/// later"; `Some(set)` restricts the privilege to the listed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Right {
    pub object: QName,
    pub privileges: PrivilegeSet,
    pub select_cols: Option<ColSet>,
    pub insert_cols: Option<ColSet>,
    pub update_cols: Option<ColSet>,
    pub reference_cols: Option<ColSet>,
    pub trigger_cols: Option<ColSet>,
    pub grantor: Box<str>,
    pub grantable: Option<Box<Right>>,
}

impl Right {
    pub fn new(object: QName, privileges: PrivilegeSet, grantor: &str) -> Self {
        Self {
            object,
            privileges,
            select_cols: None,
            insert_cols: None,
            update_cols: None,
            reference_cols: None,
            trigger_cols: None,
            grantor: grantor.into(),
            grantable: None,
        }
    }

    /// The complete right over `object`, as held by an owner or admin.
    pub fn full(object: QName, grantor: &str) -> Self {
        let privileges = match object.kind() {
            ObjectKind::Table | ObjectKind::View => PrivilegeSet::all_for_table(),
            ObjectKind::Sequence | ObjectKind::Type | ObjectKind::Domain | ObjectKind::Charset
            | ObjectKind::Collation => PrivilegeSet::USAGE,
            ObjectKind::Routine => PrivilegeSet::EXECUTE,
            _ => PrivilegeSet::all(),
        };
        Self::new(object, privileges, grantor)
    }

    /// Whether this right covers everything grantable on its object,
    /// with no column restriction.
    pub fn is_full(&self) -> bool {
        self.privileges.contains(Right::full(self.object.clone(), &self.grantor).privileges)
            && self.select_cols.is_none()
            && self.insert_cols.is_none()
            && self.update_cols.is_none()
            && self.reference_cols.is_none()
            && self.trigger_cols.is_none()
    }

    fn scopes(&self) -> [(&Option<ColSet>, PrivilegeSet); 5] {
        [
            (&self.select_cols, PrivilegeSet::SELECT),
            (&self.insert_cols, PrivilegeSet::INSERT),
            (&self.update_cols, PrivilegeSet::UPDATE),
            (&self.reference_cols, PrivilegeSet::REFERENCES),
            (&self.trigger_cols, PrivilegeSet::TRIGGER),
        ]
    }

    fn scopes_mut(&mut self) -> [(&mut Option<ColSet>, PrivilegeSet); 5] {
        [
            (&mut self.select_cols, PrivilegeSet::SELECT),
            (&mut self.insert_cols, PrivilegeSet::INSERT),
            (&mut self.update_cols, PrivilegeSet::UPDATE),
            (&mut self.reference_cols, PrivilegeSet::REFERENCES),
            (&mut self.trigger_cols, PrivilegeSet::TRIGGER),
        ]
    }

    /// Set-unions `other` into `self`. A `None` scope absorbs any
    /// restricted scope for the same privilege.
    pub fn union_with(&mut self, other: &Right) {
        let had = self.privileges;
        for ((mine, bit), (theirs, _)) in self.scopes_mut().into_iter().zip(other.scopes()) {
            if !other.privileges.contains(bit) {
                continue;
            }
            if !had.contains(bit) {
                *mine = theirs.clone();
            } else {
                match (mine.as_mut(), theirs) {
                    (Some(m), Some(t)) => m.union_with(t),
                    _ => *mine = None,
                }
            }
        }
        self.privileges |= other.privileges;
        if let Some(other_grantable) = &other.grantable {
            match &mut self.grantable {
                Some(mine) => mine.union_with(other_grantable),
                None => self.grantable = Some(other_grantable.clone()),
            }
        }
    }

    /// Removes the privileges of `other` from `self`. A restricted
    /// scope in `other` only narrows the corresponding scope; removing
    /// from an unrestricted (`None`) scope is all-or-nothing, matching
    /// the grant statement's granularity.
    pub fn subtract(&mut self, other: &Right) {
        let had = self.privileges;
        let mut removed = PrivilegeSet::empty();
        for ((mine, bit), (theirs, _)) in self.scopes_mut().into_iter().zip(other.scopes()) {
            if !other.privileges.contains(bit) || !had.contains(bit) {
                continue;
            }
            match (mine.as_mut(), theirs) {
                (Some(m), Some(t)) => {
                    m.remove_all(t);
                    if m.is_empty() {
                        *mine = None;
                        removed |= bit;
                    }
                }
                _ => {
                    *mine = None;
                    removed |= bit;
                }
            }
        }
        self.privileges &= !removed;
        let scoped = PrivilegeSet::SELECT
            | PrivilegeSet::INSERT
            | PrivilegeSet::UPDATE
            | PrivilegeSet::REFERENCES
            | PrivilegeSet::TRIGGER;
        self.privileges &= !(other.privileges & !scoped);
        if let Some(mine) = &mut self.grantable {
            mine.subtract(other);
        }
        if self.grantable.as_ref().is_some_and(|g| g.privileges.is_empty()) {
            self.grantable = None;
        }
    }

    /// Whether this right is sufficient to grant `other`: every
    /// privilege bit present, and every column scope at least as wide.
    pub fn contains(&self, other: &Right) -> bool {
        if !self.privileges.contains(other.privileges) {
            return false;
        }
        for ((mine, bit), (theirs, _)) in self.scopes().into_iter().zip(other.scopes()) {
            if !other.privileges.contains(bit) {
                continue;
            }
            match (mine, theirs) {
                (None, _) => {}
                (Some(_), None) => return false,
                (Some(m), Some(t)) => {
                    if !m.is_superset(t) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Whether the right allows `privileges`, optionally restricted to
    /// the given columns.
    pub fn can(&self, privileges: PrivilegeSet, cols: Option<&ColSet>) -> bool {
        if !self.privileges.contains(privileges) {
            return false;
        }
        let Some(cols) = cols else { return true };
        self.scopes().into_iter().all(|(scope, bit)| {
            !privileges.contains(bit) || scope.as_ref().map_or(true, |s| s.is_superset(cols))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.privileges.is_empty()
    }

    /// The projection a holder may pass on, or an empty right.
    pub fn grantable_rights(&self) -> Option<&Right> {
        self.grantable.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::names::NameRegistry;

    fn table_name() -> QName {
        NameRegistry::new().new_name("T", false, ObjectKind::Table)
    }

    #[test]
    fn union_widens_column_scope_to_all() {
        let t = table_name();
        let mut scoped = Right::new(t.clone(), PrivilegeSet::SELECT, "A");
        scoped.select_cols = Some([1u16].into_iter().collect());
        let unscoped = Right::new(t, PrivilegeSet::SELECT, "A");
        scoped.union_with(&unscoped);
        assert!(scoped.select_cols.is_none());
    }

    #[test]
    fn subtract_narrows_then_clears() {
        let t = table_name();
        let mut r = Right::new(t.clone(), PrivilegeSet::SELECT, "A");
        r.select_cols = Some([1u16, 2].into_iter().collect());
        let mut minus = Right::new(t.clone(), PrivilegeSet::SELECT, "A");
        minus.select_cols = Some([1u16].into_iter().collect());
        r.subtract(&minus);
        assert!(r.privileges.contains(PrivilegeSet::SELECT));
        let mut rest = Right::new(t, PrivilegeSet::SELECT, "A");
        rest.select_cols = Some([2u16].into_iter().collect());
        r.subtract(&rest);
        assert!(r.is_empty());
    }

    #[test]
    fn contains_respects_scopes() {
        let t = table_name();
        let full = Right::full(t.clone(), "A");
        let mut narrow = Right::new(t.clone(), PrivilegeSet::UPDATE, "A");
        narrow.update_cols = Some([0u16].into_iter().collect());
        assert!(full.contains(&narrow));
        assert!(!narrow.contains(&full));
    }

    #[test]
    fn full_right_for_sequence_is_usage() {
        let seq = NameRegistry::new().new_name("SQ", false, ObjectKind::Sequence);
        assert_eq!(Right::full(seq, "A").privileges, PrivilegeSet::USAGE);
    }
}
