use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// The privileges a [`crate::ObjectKind::Grantee`] may hold over a
    /// database object. The first five are column-scopable on tables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrivilegeSet: u16 {
        const SELECT = 1 << 0;
        const INSERT = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETE = 1 << 3;
        const REFERENCES = 1 << 4;
        const TRIGGER = 1 << 5;
        const USAGE = 1 << 6;
        const EXECUTE = 1 << 7;
    }
}

impl PrivilegeSet {
    /// The full set a table grant can carry.
    pub fn all_for_table() -> Self {
        Self::SELECT | Self::INSERT | Self::UPDATE | Self::DELETE | Self::REFERENCES | Self::TRIGGER
    }

    pub fn names(self) -> impl Iterator<Item = &'static str> {
        self.iter_names().map(|(name, _)| name)
    }
}

/// A single named privilege; the unit of grant and revoke statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    References,
    Trigger,
    Usage,
    Execute,
}

impl From<Privilege> for PrivilegeSet {
    fn from(p: Privilege) -> Self {
        match p {
            Privilege::Select => PrivilegeSet::SELECT,
            Privilege::Insert => PrivilegeSet::INSERT,
            Privilege::Update => PrivilegeSet::UPDATE,
            Privilege::Delete => PrivilegeSet::DELETE,
            Privilege::References => PrivilegeSet::REFERENCES,
            Privilege::Trigger => PrivilegeSet::TRIGGER,
            Privilege::Usage => PrivilegeSet::USAGE,
            Privilege::Execute => PrivilegeSet::EXECUTE,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::References => "REFERENCES",
            Privilege::Trigger => "TRIGGER",
            Privilege::Usage => "USAGE",
            Privilege::Execute => "EXECUTE",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_set_excludes_usage_and_execute() {
        let all = PrivilegeSet::all_for_table();
        assert!(all.contains(PrivilegeSet::SELECT | PrivilegeSet::TRIGGER));
        assert!(!all.intersects(PrivilegeSet::USAGE | PrivilegeSet::EXECUTE));
    }
}
