use super::action::RowAction;

/// The per-session ordered sequence of row actions: the unit of commit,
/// rollback and savepoint truncation.
///
/// Action timestamps come from the database-wide change counter, so the
/// sequence is non-decreasing within a session and globally unique.
#[derive(Default)]
pub struct RowActionLog {
    actions: Vec<RowAction>,
}

impl RowActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, action: RowAction) {
        debug_assert!(
            self.actions
                .last()
                .map_or(true, |last| last.timestamp <= action.timestamp),
            "action timestamps must not decrease within a session",
        );
        self.actions.push(action);
    }

    pub fn get(&self, index: usize) -> Option<&RowAction> {
        self.actions.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut RowAction> {
        self.actions.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drops every action at or after `to_index`; savepoint rollback
    /// reverses those actions first, then truncates here.
    pub fn truncate(&mut self, to_index: usize) {
        self.actions.truncate(to_index);
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RowAction> {
        self.actions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RowAction> {
        self.actions.iter_mut()
    }

    /// The actions from `from_index` on, newest first, as rollback
    /// wants them.
    pub fn drain_reverse_from(&mut self, from_index: usize) -> Vec<RowAction> {
        let mut tail: Vec<RowAction> = self.actions.split_off(from_index);
        tail.reverse();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::names::NameRegistry;
    use crate::db::store::row::{Row, RowVersion};
    use crate::db::store::ActionKind;
    use quartzdb_primitives::{ObjectKind, RowId, SessionId};

    fn action(ts: u64) -> RowAction {
        let table = NameRegistry::new().new_name("T", false, ObjectKind::Table);
        let row = Row::new(RowId(ts), vec![], RowVersion::inserted_by(SessionId(1)));
        RowAction::insert(SessionId(1), table, row, ts)
    }

    #[test]
    fn drain_reverse_returns_newest_first_and_truncates() {
        let mut log = RowActionLog::new();
        for ts in 1..=4 {
            log.append(action(ts));
        }
        let tail = log.drain_reverse_from(2);
        assert_eq!(tail.iter().map(|a| a.timestamp).collect::<Vec<_>>(), vec![4, 3]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).unwrap().kind, ActionKind::Insert);
    }
}
