use super::grantee::Grantee;
use super::right::Right;
use crate::db::names::QName;
use crate::error::{Result, RightsError};
use indexmap::{IndexMap, IndexSet};
use quartzdb_primitives::{ColSet, ObjectKind, PrivilegeSet};
use std::collections::HashMap;

/// The PUBLIC role, merged into every user's effective rights.
pub const PUBLIC_ROLE: &str = "PUBLIC";
/// The internal authorization the engine itself acts under.
pub const SYSTEM_AUTHORIZATION: &str = "_SYSTEM";
/// The administrator role seeded at database creation.
pub const DBA_ROLE: &str = "DBA";

/// Owns every grantee; everything else refers to grantees by name.
///
/// All mutation goes through methods that finish with a full-rights
/// recomputation, so readers can rely on the derived maps at any time
/// the enclosing lock is held.
pub struct GranteeManager {
    grantees: IndexMap<Box<str>, Grantee>,
}

impl GranteeManager {
    pub fn new() -> Self {
        let mut manager = Self {
            grantees: IndexMap::new(),
        };
        let mut system = Grantee::new(SYSTEM_AUTHORIZATION, false);
        system.admin_direct = true;
        system.admin = true;
        manager.grantees.insert(SYSTEM_AUTHORIZATION.into(), system);
        manager.grantees.insert(PUBLIC_ROLE.into(), Grantee::new(PUBLIC_ROLE, true));
        let mut dba = Grantee::new(DBA_ROLE, true);
        dba.admin_direct = true;
        dba.admin = true;
        manager.grantees.insert(DBA_ROLE.into(), dba);
        manager
    }

    fn is_reserved(name: &str) -> bool {
        matches!(name, PUBLIC_ROLE | SYSTEM_AUTHORIZATION | DBA_ROLE)
    }

    pub fn grantee(&self, name: &str) -> Option<&Grantee> {
        self.grantees.get(name)
    }

    fn require(&self, name: &str) -> Result<&Grantee> {
        self.grantees
            .get(name)
            .ok_or_else(|| RightsError::GranteeNotFound(name.into()).into())
    }

    fn require_mut(&mut self, name: &str) -> Result<&mut Grantee> {
        self.grantees
            .get_mut(name)
            .ok_or_else(|| RightsError::GranteeNotFound(name.into()).into())
    }

    pub fn add_user(&mut self, name: &str) -> Result<()> {
        self.add_grantee(name, false)
    }

    pub fn add_role(&mut self, name: &str) -> Result<()> {
        self.add_grantee(name, true)
    }

    fn add_grantee(&mut self, name: &str, is_role: bool) -> Result<()> {
        if Self::is_reserved(name) {
            return Err(RightsError::ReservedGrantee(name.into()).into());
        }
        if self.grantees.contains_key(name) {
            return Err(RightsError::GranteeExists(name.into()).into());
        }
        log::trace!("GRANTEE CREATED: {} role={}", name, is_role);
        self.grantees.insert(name.into(), Grantee::new(name, is_role));
        Ok(())
    }

    /// Removes a grantee. Role membership pointing at it is stripped
    /// from every other grantee before effective rights are rebuilt.
    pub fn drop_grantee(&mut self, name: &str) -> Result<()> {
        if Self::is_reserved(name) {
            return Err(RightsError::ReservedGrantee(name.into()).into());
        }
        if self.grantees.shift_remove(name).is_none() {
            return Err(RightsError::GranteeNotFound(name.into()).into());
        }
        for grantee in self.grantees.values_mut() {
            grantee.roles.shift_remove(name);
        }
        log::trace!("GRANTEE DROPPED: {}", name);
        self.update_all_rights();
        Ok(())
    }

    /// The transitive closure of roles held by `name`, excluding PUBLIC.
    pub fn all_roles(&self, name: &str) -> IndexSet<Box<str>> {
        let mut closure = IndexSet::new();
        let Some(grantee) = self.grantees.get(name) else {
            return closure;
        };
        let mut frontier: Vec<Box<str>> = grantee.direct_roles().map(Into::into).collect();
        while let Some(role) = frontier.pop() {
            if closure.insert(role.clone()) {
                if let Some(r) = self.grantees.get(&*role) {
                    frontier.extend(r.direct_roles().map(Box::<str>::from));
                }
            }
        }
        closure
    }

    fn is_schema_owner(&self, name: &str, object: &QName) -> bool {
        let owner = if object.kind() == ObjectKind::Schema {
            object.owner()
        } else {
            object.schema().and_then(|s| s.owner())
        };
        match owner {
            Some(owner) => owner == name || self.all_roles(name).contains(owner),
            None => false,
        }
    }

    /// Everything `grantor` may pass on for `object`: the full right
    /// when the grantor is an admin or owns the object's schema,
    /// otherwise the grant-option projection of its effective right.
    pub fn all_grantable_rights_on(&self, grantor: &str, object: &QName) -> Result<Right> {
        let g = self.require(grantor)?;
        if g.is_admin() || self.is_schema_owner(grantor, object) {
            return Ok(Right::full(object.clone(), grantor));
        }
        Ok(g.grantable_right_on(object)
            .unwrap_or_else(|| Right::new(object.clone(), PrivilegeSet::empty(), grantor)))
    }

    /// Grants `request` on each object. A full request is substituted by
    /// whatever the grantor can pass on; a partial request must be
    /// covered by it or the grant fails with `GRANT_INVALID`.
    ///
    /// Schema-name expansion into TABLE/SEQUENCE/ROUTINE children is the
    /// caller's job; every name in `objects` is granted as-is.
    pub fn grant(
        &mut self,
        grantee: &str,
        objects: &[QName],
        request: &Right,
        grantor: &str,
        with_grant_option: bool,
    ) -> Result<()> {
        self.require(grantee)?;
        for object in objects {
            let grantable = self.all_grantable_rights_on(grantor, object)?;
            let mut granted = if request.is_full() {
                grantable.clone()
            } else {
                let mut narrowed = request.clone();
                narrowed.object = object.clone();
                if !grantable.contains(&narrowed) {
                    return Err(RightsError::GrantInvalid(object.qualified()).into());
                }
                narrowed
            };
            if granted.is_empty() {
                return Err(RightsError::GrantInvalid(object.qualified()).into());
            }
            granted.grantor = grantor.into();
            granted.grantable = None;

            self.require_mut(grantee)?.grant_direct(granted.clone(), with_grant_option);
            if grantor != SYSTEM_AUTHORIZATION {
                self.require_mut(grantor)?.record_granted(granted);
            }
            log::trace!("RIGHT GRANTED: {} on {} to {}", request.privileges.bits(), object, grantee);
        }
        self.update_all_rights();
        Ok(())
    }

    /// Subtracts `revoked` from the grantee's `(object, grantor)` entry
    /// on each object. With `cascade` the whole entry goes; without it,
    /// rights the grantee has passed on downstream are left alone (the
    /// regrant tree is not tracked).
    pub fn revoke(
        &mut self,
        grantee: &str,
        objects: &[QName],
        revoked: &Right,
        grantor: &str,
        grant_option_only: bool,
        cascade: bool,
    ) -> Result<()> {
        for object in objects {
            let mut narrowed = revoked.clone();
            narrowed.object = object.clone();
            narrowed.grantor = grantor.into();
            self.require_mut(grantee)?
                .revoke_direct(object, &narrowed, grant_option_only, cascade);
            log::trace!("RIGHT REVOKED: {} on {} from {}", revoked.privileges.bits(), object, grantee);
        }
        self.update_all_rights();
        Ok(())
    }

    pub fn grant_role(&mut self, grantee: &str, role: &str, grantor: &str) -> Result<()> {
        if !self.require(grantor)?.is_admin() {
            return Err(RightsError::NotAuthorized(role.into()).into());
        }
        let role_exists = self.require(role)?.is_role();
        if !role_exists {
            return Err(RightsError::GranteeNotFound(role.into()).into());
        }
        self.require_mut(grantee)?.roles.insert(role.into());
        log::trace!("ROLE GRANTED: {} to {}", role, grantee);
        self.update_all_rights();
        Ok(())
    }

    /// Revoking a role that is not *directly* held fails with
    /// `ROLE_NOT_GRANTED`, even when the grantee holds it transitively.
    pub fn revoke_role(&mut self, grantee: &str, role: &str, grantor: &str) -> Result<()> {
        if !self.require(grantor)?.is_admin() {
            return Err(RightsError::NotAuthorized(role.into()).into());
        }
        let g = self.require_mut(grantee)?;
        if !g.has_role_direct(role) {
            return Err(RightsError::RoleNotGranted(role.into()).into());
        }
        g.roles.shift_remove(role);
        log::trace!("ROLE REVOKED: {} from {}", role, grantee);
        self.update_all_rights();
        Ok(())
    }

    /// Strips every right on `object` across all grantees; the catalog
    /// calls this while dropping the object.
    pub fn remove_object_rights(&mut self, object: &QName) {
        for grantee in self.grantees.values_mut() {
            grantee.remove_rights_on(object);
        }
        self.update_all_rights();
    }

    /// Whether the grantee may touch `object` at all (`privileges`
    /// `None`) or with the given privileges. Admins and schema owners
    /// pass outright; everyone else consults the effective-rights map,
    /// into which PUBLIC has already been merged for users.
    pub fn is_accessible(&self, name: &str, object: &QName, privileges: Option<PrivilegeSet>) -> bool {
        let Some(grantee) = self.grantees.get(name) else {
            return false;
        };
        if grantee.is_admin() || self.is_schema_owner(name, object) {
            return true;
        }
        match privileges {
            None => grantee.full_right_on(object).is_some(),
            Some(p) => grantee.can(object, p, None),
        }
    }

    pub fn check_access(&self, name: &str, object: &QName, privileges: Option<PrivilegeSet>) -> Result<()> {
        if self.is_accessible(name, object, privileges) {
            Ok(())
        } else {
            Err(RightsError::NotAuthorized(object.qualified()).into())
        }
    }

    fn check_columns(&self, name: &str, table: &QName, privileges: PrivilegeSet, cols: &ColSet) -> bool {
        let Some(grantee) = self.grantees.get(name) else {
            return false;
        };
        if grantee.is_admin() || self.is_schema_owner(name, table) {
            return true;
        }
        grantee.can(table, privileges, Some(cols))
    }

    pub fn can_select(&self, name: &str, table: &QName, cols: &ColSet) -> bool {
        self.check_columns(name, table, PrivilegeSet::SELECT, cols)
    }

    pub fn can_insert(&self, name: &str, table: &QName, cols: &ColSet) -> bool {
        self.check_columns(name, table, PrivilegeSet::INSERT, cols)
    }

    pub fn can_update(&self, name: &str, table: &QName, cols: &ColSet) -> bool {
        self.check_columns(name, table, PrivilegeSet::UPDATE, cols)
    }

    pub fn can_reference(&self, name: &str, table: &QName, cols: &ColSet) -> bool {
        self.check_columns(name, table, PrivilegeSet::REFERENCES, cols)
    }

    pub fn check_trigger(&self, name: &str, table: &QName, cols: &ColSet) -> bool {
        self.check_columns(name, table, PrivilegeSet::TRIGGER, cols)
    }

    /// Fixed-point recomputation of every derived rights map: roles
    /// until stable (role-into-role inheritance), then users. The
    /// effective admin flag is reseeded from the direct flag and OR-ed
    /// with each direct role's effective admin.
    pub fn update_all_rights(&mut self) {
        let roles: Vec<Box<str>> = self
            .grantees
            .values()
            .filter(|g| g.is_role())
            .map(|g| Box::<str>::from(g.name()))
            .collect();
        loop {
            let mut changed = false;
            for role in &roles {
                changed |= self.rebuild_full_rights(role);
            }
            if !changed {
                break;
            }
        }
        let users: Vec<Box<str>> = self
            .grantees
            .values()
            .filter(|g| !g.is_role())
            .map(|g| Box::<str>::from(g.name()))
            .collect();
        for user in &users {
            self.rebuild_full_rights(user);
        }
    }

    fn rebuild_full_rights(&mut self, name: &str) -> bool {
        fn merge(into: &mut HashMap<QName, Right>, right: &Right) {
            match into.get_mut(&right.object) {
                Some(r) => r.union_with(right),
                None => {
                    into.insert(right.object.clone(), right.clone());
                }
            }
        }

        let Some(grantee) = self.grantees.get(name) else {
            return false;
        };
        let mut admin = grantee.admin_direct;
        let mut merged: HashMap<QName, Right> = HashMap::new();
        for rights in grantee.direct_rights.values() {
            for right in rights {
                merge(&mut merged, right);
            }
        }
        for role_name in grantee.direct_roles() {
            if let Some(role) = self.grantees.get(role_name) {
                for right in role.full_rights.values() {
                    merge(&mut merged, right);
                }
                admin |= role.is_admin();
            }
        }
        let takes_public = !grantee.is_role() && name != PUBLIC_ROLE && name != SYSTEM_AUTHORIZATION;
        if takes_public {
            if let Some(public) = self.grantees.get(PUBLIC_ROLE) {
                for right in public.full_rights.values() {
                    merge(&mut merged, right);
                }
            }
        }

        let grantee = self.grantees.get_mut(name).unwrap();
        let changed = grantee.full_rights != merged || grantee.admin != admin;
        grantee.full_rights = merged;
        grantee.admin = admin;
        changed
    }
}

impl Default for GranteeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::names::NameRegistry;
    use crate::error::ErrorCode;

    fn table() -> QName {
        NameRegistry::new().new_name("T", false, ObjectKind::Table)
    }

    fn manager_with_user(user: &str) -> GranteeManager {
        let mut m = GranteeManager::new();
        m.add_user(user).unwrap();
        m
    }

    #[test]
    fn system_grant_then_revoke_is_identity() {
        let t = table();
        let mut m = manager_with_user("U");
        let r = Right::new(t.clone(), PrivilegeSet::SELECT, SYSTEM_AUTHORIZATION);
        m.grant("U", &[t.clone()], &r, SYSTEM_AUTHORIZATION, false).unwrap();
        assert!(m.is_accessible("U", &t, Some(PrivilegeSet::SELECT)));
        m.revoke("U", &[t.clone()], &r, SYSTEM_AUTHORIZATION, false, false).unwrap();
        assert!(!m.is_accessible("U", &t, Some(PrivilegeSet::SELECT)));
        assert!(m.grantee("U").unwrap().full_right_on(&t).is_none());
    }

    #[test]
    fn grantor_without_grant_option_cannot_pass_on() {
        let t = table();
        let mut m = manager_with_user("A");
        m.add_user("B").unwrap();
        let r = Right::new(t.clone(), PrivilegeSet::SELECT, SYSTEM_AUTHORIZATION);
        m.grant("A", &[t.clone()], &r, SYSTEM_AUTHORIZATION, false).unwrap();
        let err = m
            .grant("B", &[t.clone()], &Right::new(t.clone(), PrivilegeSet::SELECT, "A"), "A", false)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GrantInvalid);
    }

    #[test]
    fn grant_option_chains_through_intermediate_grantee() {
        let t = table();
        let mut m = manager_with_user("A");
        m.add_user("B").unwrap();
        let r = Right::new(t.clone(), PrivilegeSet::SELECT, SYSTEM_AUTHORIZATION);
        m.grant("A", &[t.clone()], &r, SYSTEM_AUTHORIZATION, true).unwrap();
        m.grant("B", &[t.clone()], &Right::new(t.clone(), PrivilegeSet::SELECT, "A"), "A", false)
            .unwrap();
        assert!(m.is_accessible("B", &t, Some(PrivilegeSet::SELECT)));
    }

    #[test]
    fn role_rights_flow_to_members_and_back_out() {
        let t = table();
        let mut m = manager_with_user("U");
        m.add_role("R").unwrap();
        let r = Right::new(t.clone(), PrivilegeSet::INSERT, SYSTEM_AUTHORIZATION);
        m.grant("R", &[t.clone()], &r, SYSTEM_AUTHORIZATION, false).unwrap();
        m.grant_role("U", "R", SYSTEM_AUTHORIZATION).unwrap();
        assert!(m.is_accessible("U", &t, Some(PrivilegeSet::INSERT)));
        m.revoke_role("U", "R", SYSTEM_AUTHORIZATION).unwrap();
        assert!(!m.is_accessible("U", &t, Some(PrivilegeSet::INSERT)));
    }

    #[test]
    fn nested_roles_converge_to_a_fixed_point() {
        let t = table();
        let mut m = manager_with_user("U");
        m.add_role("INNER").unwrap();
        m.add_role("OUTER").unwrap();
        let r = Right::new(t.clone(), PrivilegeSet::DELETE, SYSTEM_AUTHORIZATION);
        m.grant("INNER", &[t.clone()], &r, SYSTEM_AUTHORIZATION, false).unwrap();
        m.grant_role("OUTER", "INNER", SYSTEM_AUTHORIZATION).unwrap();
        m.grant_role("U", "OUTER", SYSTEM_AUTHORIZATION).unwrap();
        assert!(m.is_accessible("U", &t, Some(PrivilegeSet::DELETE)));
        assert!(m.all_roles("U").contains("INNER"));
    }

    #[test]
    fn public_rights_reach_users_but_not_roles() {
        let t = table();
        let mut m = manager_with_user("U");
        m.add_role("R").unwrap();
        let r = Right::new(t.clone(), PrivilegeSet::SELECT, SYSTEM_AUTHORIZATION);
        m.grant(PUBLIC_ROLE, &[t.clone()], &r, SYSTEM_AUTHORIZATION, false).unwrap();
        assert!(m.is_accessible("U", &t, Some(PrivilegeSet::SELECT)));
        assert!(!m.is_accessible("R", &t, Some(PrivilegeSet::SELECT)));
    }

    #[test]
    fn revoking_transitively_held_role_fails() {
        let mut m = manager_with_user("U");
        m.add_role("INNER").unwrap();
        m.add_role("OUTER").unwrap();
        m.grant_role("OUTER", "INNER", SYSTEM_AUTHORIZATION).unwrap();
        m.grant_role("U", "OUTER", SYSTEM_AUTHORIZATION).unwrap();
        let err = m.revoke_role("U", "INNER", SYSTEM_AUTHORIZATION).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoleNotGranted);
    }

    #[test]
    fn dba_members_are_admins() {
        let t = table();
        let mut m = manager_with_user("SA");
        m.grant_role("SA", DBA_ROLE, SYSTEM_AUTHORIZATION).unwrap();
        assert!(m.grantee("SA").unwrap().is_admin());
        assert!(m.is_accessible("SA", &t, Some(PrivilegeSet::all_for_table())));
    }

    #[test]
    fn reserved_grantees_cannot_be_dropped() {
        let mut m = GranteeManager::new();
        assert!(m.drop_grantee(PUBLIC_ROLE).is_err());
        assert!(m.drop_grantee(DBA_ROLE).is_err());
    }
}
