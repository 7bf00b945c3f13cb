use super::right::Right;
use crate::db::names::QName;
use indexmap::{IndexMap, IndexSet};
use quartzdb_primitives::{ColSet, PrivilegeSet};
use std::collections::HashMap;

/// A user or role. The two share one record; `is_role` drives the
/// differing behavior during effective-rights recomputation.
///
/// `direct_rights` keeps one entry per `(object, grantor)` pair.
/// `full_rights` is derived: the union of direct rights, every
/// directly-or-transitively held role's full rights and, for non-role
/// grantees, PUBLIC's full rights. It is recomputed by the manager
/// whenever any constituent changes, never edited in place.
pub struct Grantee {
    name: Box<str>,
    is_role: bool,
    pub(super) direct_rights: IndexMap<QName, Vec<Right>>,
    /// Mirror of the grants this grantee has issued, keyed by object.
    pub(super) granted_rights: IndexMap<QName, Vec<Right>>,
    pub(super) roles: IndexSet<Box<str>>,
    pub(super) full_rights: HashMap<QName, Right>,
    pub(super) admin_direct: bool,
    pub(super) admin: bool,
}

impl Grantee {
    pub(super) fn new(name: &str, is_role: bool) -> Self {
        Self {
            name: name.into(),
            is_role,
            direct_rights: IndexMap::new(),
            granted_rights: IndexMap::new(),
            roles: IndexSet::new(),
            full_rights: HashMap::new(),
            admin_direct: false,
            admin: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_role(&self) -> bool {
        self.is_role
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn direct_roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(|r| &**r)
    }

    pub fn has_role_direct(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Inserts or unions a direct right from `grantor`, optionally
    /// widening the grant-option sub-right as well.
    pub(super) fn grant_direct(&mut self, right: Right, with_grant_option: bool) {
        let entry = self.direct_rights.entry(right.object.clone()).or_default();
        let existing = entry.iter_mut().find(|r| r.grantor == right.grantor);
        let slot = match existing {
            Some(r) => {
                r.union_with(&right);
                r
            }
            None => {
                entry.push(right.clone());
                entry.last_mut().unwrap()
            }
        };
        if with_grant_option {
            let mut sub = right.clone();
            sub.grantable = None;
            match &mut slot.grantable {
                Some(g) => g.union_with(&sub),
                None => slot.grantable = Some(Box::new(sub)),
            }
        }
    }

    /// Subtracts privileges from the `(object, grantor)` entry.
    /// `grant_option_only` leaves the base right untouched and only
    /// narrows the sub-right. Returns whether an entry was found.
    pub(super) fn revoke_direct(
        &mut self,
        object: &QName,
        revoked: &Right,
        grant_option_only: bool,
        cascade: bool,
    ) -> bool {
        let Some(entry) = self.direct_rights.get_mut(object) else {
            return false;
        };
        let Some(pos) = entry.iter().position(|r| r.grantor == revoked.grantor) else {
            return false;
        };
        let slot = &mut entry[pos];
        if grant_option_only {
            if let Some(g) = &mut slot.grantable {
                g.subtract(revoked);
            }
            if slot.grantable.as_ref().is_some_and(|g| g.privileges.is_empty()) {
                slot.grantable = None;
            }
        } else if cascade {
            entry.remove(pos);
        } else {
            slot.subtract(revoked);
            if slot.is_empty() {
                entry.remove(pos);
            }
        }
        if entry.is_empty() {
            self.direct_rights.shift_remove(object);
        }
        true
    }

    pub(super) fn record_granted(&mut self, right: Right) {
        let entry = self.granted_rights.entry(right.object.clone()).or_default();
        match entry.iter_mut().find(|r| r.grantor == right.grantor) {
            Some(r) => r.union_with(&right),
            None => entry.push(right),
        }
    }

    /// Drops every direct and mirrored entry touching `object`; used by
    /// cascading drops in the catalog.
    pub(super) fn remove_rights_on(&mut self, object: &QName) {
        self.direct_rights.shift_remove(object);
        self.granted_rights.shift_remove(object);
    }

    /// The right this grantee effectively holds on `object`, if any.
    pub fn full_right_on(&self, object: &QName) -> Option<&Right> {
        self.full_rights.get(object)
    }

    pub fn can(&self, object: &QName, privileges: PrivilegeSet, cols: Option<&ColSet>) -> bool {
        if self.admin {
            return true;
        }
        self.full_rights
            .get(object)
            .is_some_and(|r| r.can(privileges, cols))
    }

    /// All grantable rights this grantee holds on `object`: the
    /// grant-option projections of its effective rights.
    pub(super) fn grantable_right_on(&self, object: &QName) -> Option<Right> {
        self.full_rights
            .get(object)
            .and_then(|r| r.grantable_rights().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::names::NameRegistry;
    use quartzdb_primitives::ObjectKind;

    fn table() -> QName {
        NameRegistry::new().new_name("T", false, ObjectKind::Table)
    }

    #[test]
    fn grant_direct_unions_per_grantor() {
        let t = table();
        let mut g = Grantee::new("U", false);
        g.grant_direct(Right::new(t.clone(), PrivilegeSet::SELECT, "A"), false);
        g.grant_direct(Right::new(t.clone(), PrivilegeSet::INSERT, "A"), false);
        g.grant_direct(Right::new(t.clone(), PrivilegeSet::DELETE, "B"), false);
        let entry = g.direct_rights.get(&t).unwrap();
        assert_eq!(entry.len(), 2);
        assert_eq!(entry[0].privileges, PrivilegeSet::SELECT | PrivilegeSet::INSERT);
        assert_eq!(entry[1].privileges, PrivilegeSet::DELETE);
    }

    #[test]
    fn grant_option_builds_sub_right() {
        let t = table();
        let mut g = Grantee::new("U", false);
        g.grant_direct(Right::new(t.clone(), PrivilegeSet::SELECT, "A"), true);
        let entry = &g.direct_rights.get(&t).unwrap()[0];
        assert_eq!(entry.grantable.as_ref().unwrap().privileges, PrivilegeSet::SELECT);
    }

    #[test]
    fn revoke_direct_empties_and_removes_entry() {
        let t = table();
        let mut g = Grantee::new("U", false);
        g.grant_direct(Right::new(t.clone(), PrivilegeSet::SELECT, "A"), false);
        let gone = g.revoke_direct(&t, &Right::new(t.clone(), PrivilegeSet::SELECT, "A"), false, false);
        assert!(gone);
        assert!(g.direct_rights.get(&t).is_none());
    }

    #[test]
    fn grant_option_only_revoke_keeps_base_right() {
        let t = table();
        let mut g = Grantee::new("U", false);
        g.grant_direct(Right::new(t.clone(), PrivilegeSet::SELECT, "A"), true);
        g.revoke_direct(&t, &Right::new(t.clone(), PrivilegeSet::SELECT, "A"), true, false);
        let entry = &g.direct_rights.get(&t).unwrap()[0];
        assert!(entry.privileges.contains(PrivilegeSet::SELECT));
        assert!(entry.grantable.is_none());
    }
}
