use crate::config::DatabaseConfig;
use crate::db::catalog::{ColumnDef, SchemaManager};
use crate::db::log::{CommitLog, LobTracker, NoopLog, NoopLobTracker};
use crate::db::names::QName;
use crate::db::rights::{GranteeManager, Right, DBA_ROLE, SYSTEM_AUTHORIZATION};
use crate::db::store::{HybridRowStore, Row, RowAction, RowVersion};
use crate::db::tx::{mvcc, TxManager};
use crate::error::{Result, RightsError, StoreError, TxError};
use crate::session::{ResetMode, Session, Statement};
use parking_lot::{Mutex, RwLock};
use quartzdb_primitives::{ColSet, ObjectKind, PrivilegeSet, RowId, SessionId, TxMode, TxTimestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

/// The default administrator account seeded at creation.
pub const DEFAULT_ADMIN_USER: &str = "SA";

enum UniqueOutcome {
    Clear,
    Violation(String),
    WaitFor(SessionId),
}

/// The explicit value every session is constructed against: catalog,
/// grantees, the transaction manager, the session registry and the
/// durability collaborators. Tests instantiate isolated databases; no
/// global state exists.
pub struct Database {
    config: DatabaseConfig,
    catalog: RwLock<SchemaManager>,
    grantees: RwLock<GranteeManager>,
    tx: TxManager,
    commit_log: Arc<dyn CommitLog>,
    lob: Arc<dyn LobTracker>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_session_id: AtomicU32,
    shutdown: Arc<AtomicBool>,
    timeout_runner: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    pub fn open(config: DatabaseConfig) -> Arc<Self> {
        Self::open_with_collaborators(config, Arc::new(NoopLog), Arc::new(NoopLobTracker))
    }

    pub fn open_with_log(config: DatabaseConfig, commit_log: Arc<dyn CommitLog>) -> Arc<Self> {
        Self::open_with_collaborators(config, commit_log, Arc::new(NoopLobTracker))
    }

    pub fn open_with_collaborators(
        config: DatabaseConfig,
        commit_log: Arc<dyn CommitLog>,
        lob: Arc<dyn LobTracker>,
    ) -> Arc<Self> {
        let mut grantees = GranteeManager::new();
        grantees.add_user(DEFAULT_ADMIN_USER).expect("fresh manager");
        grantees
            .grant_role(DEFAULT_ADMIN_USER, DBA_ROLE, SYSTEM_AUTHORIZATION)
            .expect("fresh manager");
        let db = Arc::new(Self {
            tx: TxManager::new(config.tx_mode),
            catalog: RwLock::new(SchemaManager::new(DBA_ROLE)),
            grantees: RwLock::new(grantees),
            commit_log,
            lob,
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU32::new(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            timeout_runner: Mutex::new(None),
            config,
        });
        Self::spawn_timeout_runner(&db);
        db
    }

    fn spawn_timeout_runner(db: &Arc<Self>) {
        let weak: Weak<Database> = Arc::downgrade(db);
        let shutdown = Arc::clone(&db.shutdown);
        let tick = db.config.timeout_tick;
        let handle = std::thread::Builder::new()
            .name("quartzdb-timeout".into())
            .spawn(move || loop {
                std::thread::sleep(tick);
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                let Some(db) = weak.upgrade() else { return };
                let sessions: Vec<Arc<Session>> = db.sessions.lock().values().cloned().collect();
                for session in sessions {
                    if session.current_timeout.load(Ordering::SeqCst) <= 0 {
                        continue;
                    }
                    // The statement may finish (resetting the counter)
                    // between the load and the decrement; only an exact
                    // one-to-zero transition fires the abort.
                    if session.current_timeout.fetch_sub(1, Ordering::SeqCst) == 1 {
                        log::trace!("SESSION {} statement timed out", session.id);
                        db.reset_session(session.id, ResetMode::Statement);
                    }
                }
            })
            .expect("timeout runner spawn");
        *db.timeout_runner.lock() = Some(handle);
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn tx(&self) -> &TxManager {
        &self.tx
    }

    pub fn catalog(&self) -> &RwLock<SchemaManager> {
        &self.catalog
    }

    pub fn grantees(&self) -> &RwLock<GranteeManager> {
        &self.grantees
    }

    pub(crate) fn commit_log(&self) -> &Arc<dyn CommitLog> {
        &self.commit_log
    }

    // ---- sessions ------------------------------------------------------------

    /// Opens a session for an existing user.
    pub fn connect(
        self: &Arc<Self>,
        user: &str,
        autocommit: bool,
        read_only: bool,
        zone: Option<&str>,
    ) -> Result<Arc<Session>> {
        if self.grantees.read().grantee(user).is_none() {
            return Err(RightsError::GranteeNotFound(user.into()).into());
        }
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        let default_schema = self.catalog.read().default_schema_name().to_string();
        let session = Arc::new(Session::new(
            Arc::downgrade(self),
            id,
            user,
            autocommit,
            read_only,
            zone,
            self.config.default_isolation,
            &default_schema,
        ));
        self.sessions.lock().insert(id, Arc::clone(&session));
        log::trace!("SESSION OPENED: {} user={}", id, user);
        Ok(session)
    }

    pub(crate) fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub(crate) fn forget_session(&self, id: SessionId) {
        self.sessions.lock().remove(&id);
        log::trace!("SESSION CLOSED: {}", id);
    }

    pub(crate) fn transacting_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.in_transaction())
            .map(|s| s.id)
            .collect()
    }

    /// The count of sessions with an open transaction; equals the
    /// manager's transaction count at every quiescent point.
    pub fn open_transaction_count(&self) -> usize {
        self.transacting_sessions().len()
    }

    // ---- statement lifecycle -------------------------------------------------

    pub(crate) fn begin_action(&self, session: &Session, stmt: &Statement) -> Result<()> {
        self.tx.begin_action(self, session, stmt)
    }

    pub(crate) fn end_action(&self, session: &Session) -> Result<()> {
        self.tx.end_action(self, session);
        Ok(())
    }

    pub(crate) fn commit(&self, session: &Session) -> Result<()> {
        self.tx.commit(self, session)
    }

    pub(crate) fn rollback(&self, session: &Session) {
        self.tx.rollback(self, session);
    }

    pub(crate) fn rollback_partial(&self, session: &Session, start_index: usize, timestamp: TxTimestamp) -> Result<()> {
        self.tx.rollback_partial(self, session, start_index, timestamp)
    }

    /// Switches the transaction-manager mode; fails while two or more
    /// transactions are live.
    pub fn set_transaction_mode(&self, mode: TxMode) -> Result<()> {
        self.tx.set_mode(mode)
    }

    // ---- row operations ------------------------------------------------------

    fn check_statement_state(&self, session: &Session) -> Result<()> {
        if session.abort_transaction.load(Ordering::SeqCst) {
            self.rollback(session);
            return Err(TxError::SerializationFailure.into());
        }
        if session.abort_action.swap(false, Ordering::SeqCst) {
            let start = session.statement_start_index.load(Ordering::SeqCst);
            let ts = session.statement_start_timestamp.load(Ordering::SeqCst);
            self.rollback_partial(session, start, ts)?;
            return Err(TxError::StatementAborted.into());
        }
        Ok(())
    }

    fn resolve_table(&self, session: &Session, table: &str) -> Result<(QName, Arc<RwLock<HybridRowStore>>, ColSet)> {
        let catalog = self.catalog.read();
        let t = catalog.table(&session.current_schema(), table)?;
        Ok((t.name.clone(), Arc::clone(&t.store), t.lob_columns()))
    }

    pub(crate) fn try_store_of(&self, name: &QName) -> Option<Arc<RwLock<HybridRowStore>>> {
        self.catalog.read().store_of(name)
    }

    pub(crate) fn insert_row(
        &self,
        session: &Session,
        table: &str,
        values: Vec<crate::db::store::Value>,
        changed_cols: Option<ColSet>,
    ) -> Result<RowId> {
        self.check_statement_state(session)?;
        if session.is_read_only() {
            return Err(TxError::InvalidTransactionState("write in a read-only transaction".into()).into());
        }
        let (qname, store, _) = self.resolve_table(session, table)?;
        let privilege = if changed_cols.is_some() {
            PrivilegeSet::UPDATE
        } else {
            PrivilegeSet::INSERT
        };
        self.grantees
            .read()
            .check_access(&session.user(), &qname, Some(privilege))?;
        self.tx.begin_transaction(session);
        let versioned = self.tx.mode() != TxMode::Locks;

        loop {
            let snapshot = self.tx.read_snapshot(session);
            let outcome = {
                let mut guard = store.write();
                match self.unique_conflict(session, &guard, &values, snapshot, versioned) {
                    UniqueOutcome::Clear => {
                        let ts = self.tx.next_timestamp();
                        session.action_timestamp.store(ts, Ordering::SeqCst);
                        let id = guard.add(values, RowVersion::inserted_by(session.id));
                        let row = guard.get(id).expect("row just added");
                        drop(guard);
                        let mut action = RowAction::insert(session.id, qname, row, ts);
                        action.changed_cols = changed_cols;
                        session.actions.lock().append(action);
                        return Ok(id);
                    }
                    UniqueOutcome::Violation(index) => {
                        return Err(StoreError::UniqueConstraintViolation {
                            index,
                            table: qname.qualified(),
                        }
                        .into());
                    }
                    UniqueOutcome::WaitFor(holder) => holder,
                }
            };
            if self.config.tx_conflict_rollback {
                self.rollback(session);
                return Err(TxError::SerializationFailure.into());
            }
            self.tx.wait_for_session(self, session, outcome)?;
        }
    }

    /// Classifies the insert of `values` against every unique index.
    ///
    /// The check runs against the newest state of each conflicting row,
    /// not the session's snapshot: a key whose holder committed after
    /// our snapshot is a write-write conflict, dooming the transaction
    /// to a serialization failure at commit rather than a duplicate-key
    /// error now. An uncommitted holder is waited for.
    fn unique_conflict(
        &self,
        session: &Session,
        store: &HybridRowStore,
        values: &[crate::db::store::Value],
        snapshot: TxTimestamp,
        versioned: bool,
    ) -> UniqueOutcome {
        for index in store.indexes() {
            if !index.is_unique {
                continue;
            }
            let key: Vec<crate::db::store::Value> = index
                .cols
                .iter()
                .map(|c| values.get(c as usize).cloned().unwrap_or(crate::db::store::Value::Null))
                .collect();
            for row_id in index.seek(&key) {
                let Some(existing) = store.get(row_id) else { continue };
                let v = &existing.version;
                if v.deleted_at != 0 {
                    // Delete already committed; the key is free.
                    continue;
                }
                if v.deleted_by == Some(session.id) {
                    // We deleted it ourselves this transaction.
                    continue;
                }
                if versioned {
                    if let Some(deleter) = v.deleted_by {
                        // Someone else holds an uncommitted delete of
                        // this key; whether the key frees up depends on
                        // their outcome.
                        return UniqueOutcome::WaitFor(deleter);
                    }
                    if v.has_uncommitted_insert() {
                        match v.created_by {
                            Some(creator) if creator != session.id => return UniqueOutcome::WaitFor(creator),
                            _ => return UniqueOutcome::Violation(index.name.to_string()),
                        }
                    }
                    if v.created_at > snapshot && v.created_by != Some(session.id) {
                        // The key appeared after our snapshot: a lost
                        // update in the making, surfaced at commit.
                        session.tx_conflict.store(true, Ordering::SeqCst);
                        continue;
                    }
                    return UniqueOutcome::Violation(index.name.to_string());
                }
                return UniqueOutcome::Violation(index.name.to_string());
            }
        }
        UniqueOutcome::Clear
    }

    pub(crate) fn delete_row(
        &self,
        session: &Session,
        table: &str,
        row_id: RowId,
        changed_cols: Option<ColSet>,
    ) -> Result<bool> {
        self.check_statement_state(session)?;
        if session.is_read_only() {
            return Err(TxError::InvalidTransactionState("write in a read-only transaction".into()).into());
        }
        let (qname, store, _) = self.resolve_table(session, table)?;
        let privilege = if changed_cols.is_some() {
            PrivilegeSet::UPDATE
        } else {
            PrivilegeSet::DELETE
        };
        self.grantees
            .read()
            .check_access(&session.user(), &qname, Some(privilege))?;
        self.tx.begin_transaction(session);

        loop {
            let snapshot = self.tx.read_snapshot(session);
            let versioned = self.tx.mode() != TxMode::Locks;
            let outcome = {
                let mut guard = store.write();
                let Some(row) = guard.get(row_id) else {
                    return Ok(false);
                };
                if versioned {
                    match mvcc::classify_write(&row.version, session, snapshot) {
                        mvcc::WriteConflict::WaitFor(holder) => Some(holder),
                        mvcc::WriteConflict::Doomed => {
                            // The row changed under us; the transaction
                            // can only end in a serialization failure.
                            session.tx_conflict.store(true, Ordering::SeqCst);
                            return Ok(false);
                        }
                        mvcc::WriteConflict::Clear => {
                            if !row.version.is_visible(session.id, snapshot) {
                                return Ok(false);
                            }
                            let action = self.mark_delete(session, &qname, &mut guard, row, changed_cols.clone())?;
                            drop(guard);
                            session.actions.lock().append(action);
                            return Ok(true);
                        }
                    }
                } else {
                    if !row.version.is_visible(session.id, snapshot) {
                        return Ok(false);
                    }
                    let action = self.mark_delete(session, &qname, &mut guard, row, changed_cols.clone())?;
                    drop(guard);
                    session.actions.lock().append(action);
                    return Ok(true);
                }
            };
            if let Some(holder) = outcome {
                if self.config.tx_conflict_rollback {
                    self.rollback(session);
                    return Err(TxError::SerializationFailure.into());
                }
                self.tx.wait_for_session(self, session, holder)?;
                // Holder finished; re-run the conflict classification.
            }
        }
    }

    /// Marks the uncommitted delete in the store and builds the action;
    /// the caller appends it to the session log after releasing the
    /// store guard, keeping the log-then-store lock order of commit.
    fn mark_delete(
        &self,
        session: &Session,
        qname: &QName,
        guard: &mut HybridRowStore,
        row: Row,
        changed_cols: Option<ColSet>,
    ) -> Result<RowAction> {
        let ts = self.tx.next_timestamp();
        session.action_timestamp.store(ts, Ordering::SeqCst);
        guard.update_version(row.id, |v| v.deleted_by = Some(session.id))?;
        let mut action = RowAction::delete(session.id, qname.clone(), row, ts);
        action.changed_cols = changed_cols;
        Ok(action)
    }

    pub(crate) fn scan_table(&self, session: &Session, table: &str) -> Result<Vec<Row>> {
        self.check_statement_state(session)?;
        let (qname, store, _) = self.resolve_table(session, table)?;
        self.grantees
            .read()
            .check_access(&session.user(), &qname, Some(PrivilegeSet::SELECT))?;
        let snapshot = self.tx.read_snapshot(session);
        let rows = store.read().scan_visible(session.id, snapshot);
        Ok(rows)
    }

    pub(crate) fn next_sequence_value(&self, session: &Session, sequence: &str) -> Result<i64> {
        self.check_statement_state(session)?;
        let schema = session.current_schema();
        {
            let catalog = self.catalog.read();
            if let Some(obj) = catalog.find_schema_object(&schema, ObjectKind::Sequence, sequence) {
                self.grantees
                    .read()
                    .check_access(&session.user(), obj.name(), Some(PrivilegeSet::USAGE))?;
            }
        }
        let (value, allocated, qname) = self.catalog.write().sequence_next(&schema, sequence)?;
        if allocated {
            let mut touched = session.touched_sequences.lock();
            if !touched.contains(&qname) {
                touched.push(qname);
            }
        }
        Ok(value)
    }

    pub(crate) fn adjust_lob_usage(&self, action: &RowAction) {
        use crate::db::store::ActionKind;
        let lob_cols = {
            let catalog = self.catalog.read();
            let Some(schema) = action.table.schema().map(|s| s.name()) else { return };
            match catalog.find_schema_object(&schema, ObjectKind::Table, &action.table.name()) {
                Some(crate::db::catalog::SchemaObject::Table(t)) => t.lob_columns(),
                _ => return,
            }
        };
        if lob_cols.is_empty() {
            return;
        }
        let delta = match action.kind {
            ActionKind::Insert => 1,
            ActionKind::Delete | ActionKind::DeleteFinal => -1,
            ActionKind::InsertDelete | ActionKind::None => return,
        };
        for col in lob_cols.iter() {
            if action.row.get(col as usize).is_some_and(|v| !v.is_null()) {
                self.lob.adjust(&action.table, &action.row, col, delta);
            }
        }
    }

    // ---- DDL, under the catalog lock protocol --------------------------------

    /// Runs `f` as a DDL statement: the catalog lock is acquired
    /// through the transaction manager (waiting out other transacting
    /// sessions), and the change commits immediately, as DDL does.
    fn run_ddl<R>(&self, session: &Session, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let stmt = Statement::ddl();
        self.begin_action(session, &stmt)?;
        let result = f(self);
        self.end_action(session)?;
        match result {
            Ok(value) => {
                self.commit(session)?;
                Ok(value)
            }
            Err(e) => {
                self.rollback(session);
                Err(e)
            }
        }
    }

    fn check_schema_ddl(&self, session: &Session, schema: &str) -> Result<()> {
        let grantees = self.grantees.read();
        let user = session.user();
        let is_admin = grantees.grantee(&user).is_some_and(|g| g.is_admin());
        if is_admin {
            return Ok(());
        }
        let catalog = self.catalog.read();
        let owner_ok = catalog.schema(schema).is_some_and(|s| {
            *s.owner == *user || grantees.all_roles(&user).contains(&*s.owner)
        });
        if owner_ok {
            Ok(())
        } else {
            Err(RightsError::NotAuthorized(schema.into()).into())
        }
    }

    pub fn create_schema(&self, session: &Arc<Session>, name: &str, owner: &str) -> Result<QName> {
        let user = session.user();
        if !self.grantees.read().grantee(&user).is_some_and(|g| g.is_admin()) {
            return Err(RightsError::NotAuthorized(name.into()).into());
        }
        self.run_ddl(session, |db| db.catalog.write().create_schema(name, owner))
    }

    pub fn drop_schema(&self, session: &Arc<Session>, name: &str, cascade: bool) -> Result<()> {
        self.check_schema_ddl(session, name)?;
        let dropped = self.run_ddl(session, |db| db.catalog.write().drop_schema(name, cascade))?;
        self.strip_rights(&dropped);
        Ok(())
    }

    pub fn create_table(
        &self,
        session: &Arc<Session>,
        schema: &str,
        name: &str,
        columns: Vec<ColumnDef>,
        primary_key: ColSet,
    ) -> Result<QName> {
        self.check_schema_ddl(session, schema)?;
        let max_rows = self.config.max_memory_row_count;
        self.run_ddl(session, |db| {
            db.catalog.write().create_table(schema, name, columns, primary_key, max_rows)
        })
    }

    pub fn create_view(
        &self,
        session: &Arc<Session>,
        schema: &str,
        name: &str,
        sql: &str,
        references: &[QName],
    ) -> Result<QName> {
        self.check_schema_ddl(session, schema)?;
        // Defining a view requires SELECT (or ownership) on everything
        // it reads.
        {
            let grantees = self.grantees.read();
            for referenced in references {
                grantees.check_access(&session.user(), referenced, Some(PrivilegeSet::SELECT))?;
            }
        }
        self.run_ddl(session, |db| db.catalog.write().create_view(schema, name, sql, references))
    }

    pub fn create_sequence(&self, session: &Arc<Session>, schema: &str, name: &str) -> Result<QName> {
        self.check_schema_ddl(session, schema)?;
        self.run_ddl(session, |db| db.catalog.write().create_sequence(schema, name))
    }

    pub fn add_foreign_key(
        &self,
        session: &Arc<Session>,
        table: &QName,
        name: &str,
        cols: ColSet,
        referenced: &QName,
    ) -> Result<QName> {
        let schema = table.schema().map(|s| s.name()).unwrap_or_default();
        self.check_schema_ddl(session, &schema)?;
        {
            let grantees = self.grantees.read();
            grantees.check_access(&session.user(), referenced, Some(PrivilegeSet::REFERENCES))?;
        }
        self.run_ddl(session, |db| db.catalog.write().add_foreign_key(table, name, cols, referenced))
    }

    pub fn drop_table(&self, session: &Arc<Session>, name: &QName, cascade: bool) -> Result<()> {
        let schema = name.schema().map(|s| s.name()).unwrap_or_default();
        self.check_schema_ddl(session, &schema)?;
        let dropped = self.run_ddl(session, |db| db.catalog.write().drop_table(name, cascade))?;
        self.strip_rights(&dropped);
        Ok(())
    }

    pub fn drop_object(&self, session: &Arc<Session>, name: &QName, cascade: bool) -> Result<()> {
        let schema = name.schema().map(|s| s.name()).unwrap_or_default();
        self.check_schema_ddl(session, &schema)?;
        let dropped = self.run_ddl(session, |db| db.catalog.write().remove_schema_object(name, cascade))?;
        self.strip_rights(&dropped);
        Ok(())
    }

    pub fn rename_object(&self, session: &Arc<Session>, name: &QName, new_name: &str) -> Result<()> {
        let schema = name.schema().map(|s| s.name()).unwrap_or_default();
        self.check_schema_ddl(session, &schema)?;
        self.run_ddl(session, |db| db.catalog.write().rename_schema_object(name, new_name))
    }

    pub fn recompile_dependents(&self, session: &Arc<Session>, table: &QName) -> Result<()> {
        let schema = table.schema().map(|s| s.name()).unwrap_or_default();
        self.check_schema_ddl(session, &schema)?;
        self.run_ddl(session, |db| {
            db.catalog.write().recompile_dependent_objects(table);
            Ok(())
        })
    }

    fn strip_rights(&self, dropped: &[QName]) {
        let mut grantees = self.grantees.write();
        for name in dropped {
            grantees.remove_object_rights(name);
        }
    }

    // ---- rights, with schema expansion ---------------------------------------

    /// Expands a schema name into its TABLE / SEQUENCE / ROUTINE
    /// children; any other name maps to itself.
    fn expand_grant_objects(&self, object: &QName) -> Vec<QName> {
        if object.kind() != ObjectKind::Schema {
            return vec![object.clone()];
        }
        self.catalog
            .read()
            .schema(&object.name())
            .map(|s| s.grantable_children())
            .unwrap_or_default()
    }

    pub fn grant(
        &self,
        session: &Arc<Session>,
        grantee: &str,
        object: &QName,
        privileges: PrivilegeSet,
        with_grant_option: bool,
    ) -> Result<()> {
        let objects = self.expand_grant_objects(object);
        let grantor = session.user();
        let request = Right::new(object.clone(), privileges, &grantor);
        self.grantees
            .write()
            .grant(grantee, &objects, &request, &grantor, with_grant_option)
    }

    /// Schema-level revoke recurses over the schema's children with
    /// `revoke`, the symmetric twin of schema-level grant.
    pub fn revoke(
        &self,
        session: &Arc<Session>,
        grantee: &str,
        object: &QName,
        privileges: PrivilegeSet,
        grant_option_only: bool,
        cascade: bool,
    ) -> Result<()> {
        let objects = self.expand_grant_objects(object);
        let grantor = session.user();
        let revoked = Right::new(object.clone(), privileges, &grantor);
        self.grantees
            .write()
            .revoke(grantee, &objects, &revoked, &grantor, grant_option_only, cascade)
    }

    pub fn grant_role(&self, session: &Arc<Session>, grantee: &str, role: &str) -> Result<()> {
        self.grantees.write().grant_role(grantee, role, &session.user())
    }

    pub fn revoke_role(&self, session: &Arc<Session>, grantee: &str, role: &str) -> Result<()> {
        self.grantees.write().revoke_role(grantee, role, &session.user())
    }

    pub fn create_user(&self, session: &Arc<Session>, name: &str) -> Result<()> {
        self.require_admin(session)?;
        self.grantees.write().add_user(name)
    }

    pub fn create_role(&self, session: &Arc<Session>, name: &str) -> Result<()> {
        self.require_admin(session)?;
        self.grantees.write().add_role(name)
    }

    pub fn drop_grantee(&self, session: &Arc<Session>, name: &str) -> Result<()> {
        self.require_admin(session)?;
        self.grantees.write().drop_grantee(name)
    }

    fn require_admin(&self, session: &Arc<Session>) -> Result<()> {
        let user = session.user();
        if self.grantees.read().grantee(&user).is_some_and(|g| g.is_admin()) {
            Ok(())
        } else {
            Err(RightsError::NotAuthorized(user).into())
        }
    }

    // ---- cross-session control -----------------------------------------------

    /// Cancels the statement another session is running. Authenticated
    /// by the target's random id, and a no-op when the statement
    /// identified by `statement_ts` has already completed.
    pub fn cancel(&self, target: SessionId, random_id: u64, statement_ts: TxTimestamp) -> bool {
        let Some(session) = self.session(target) else {
            return false;
        };
        if session.random_id != random_id {
            return false;
        }
        if !session.in_statement.load(Ordering::SeqCst)
            || session.statement_start_timestamp.load(Ordering::SeqCst) != statement_ts
        {
            return false;
        }
        self.reset_session(target, ResetMode::Statement);
        true
    }

    /// Resets another session's state; see [`ResetMode`] for how much
    /// is cleared. Cursor and statement-local-table state live outside
    /// the kernel; their modes clear nothing here.
    pub fn reset_session(&self, target: SessionId, mode: ResetMode) {
        let Some(session) = self.session(target) else { return };
        match mode {
            ResetMode::Results | ResetMode::Tables => {}
            ResetMode::Statement => {
                session.abort_action.store(true, Ordering::SeqCst);
                session.latch.clear();
            }
            ResetMode::Rollback => {
                if session.in_transaction() {
                    session.abort_transaction.store(true, Ordering::SeqCst);
                    session.latch.clear();
                }
            }
            ResetMode::ResetAll => {
                if session.in_transaction() {
                    session.abort_transaction.store(true, Ordering::SeqCst);
                    session.latch.clear();
                }
                session.reset_statement_state();
            }
            ResetMode::Close => session.close(),
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.timeout_runner.lock().take() {
            // The runner itself may hold the last reference; a thread
            // cannot join itself.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
