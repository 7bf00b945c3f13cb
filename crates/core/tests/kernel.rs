//! Multi-session scenarios exercising the transaction manager modes,
//! the catalog and the rights model end to end.

use pretty_assertions::assert_eq;
use quartzdb::db::log::{CommitLog, LogEvent, RecordingLog};
use quartzdb::{
    ColSet, ColumnDef, Database, DatabaseConfig, ErrorCode, IsolationLevel, PrivilegeSet, QName, Session, Statement,
    TxMode, Value, DEFAULT_ADMIN_USER,
};
use std::sync::Arc;
use std::time::Duration;

fn open(mode: TxMode) -> Arc<Database> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = DatabaseConfig::with_mode(mode);
    config.timeout_tick = Duration::from_millis(50);
    Database::open(config)
}

fn admin(db: &Arc<Database>) -> Arc<Session> {
    db.connect(DEFAULT_ADMIN_USER, true, false, None).unwrap()
}

fn tx_session(db: &Arc<Database>) -> Arc<Session> {
    db.connect(DEFAULT_ADMIN_USER, false, false, None).unwrap()
}

/// Creates PUBLIC.<name>(ID, VAL) with a unique primary key on ID.
fn id_val_table(db: &Arc<Database>, session: &Arc<Session>, name: &str) -> QName {
    db.create_table(
        session,
        "PUBLIC",
        name,
        vec![ColumnDef::new("ID", "BIGINT").not_null(), ColumnDef::new("VAL", "BIGINT")],
        [0u16].into_iter().collect(),
    )
    .unwrap()
}

fn row(id: i64, val: i64) -> Vec<Value> {
    vec![Value::Int(id), Value::Int(val)]
}

fn insert_rows(session: &Arc<Session>, table: &QName, rows: &[(i64, i64)]) {
    let stmt = Statement::writing(std::slice::from_ref(table));
    session.begin_statement(&stmt).unwrap();
    for (id, val) in rows {
        session.insert(&table.name(), row(*id, *val)).unwrap();
    }
    session.end_statement().unwrap();
}

fn scan_vals(session: &Arc<Session>, table: &QName) -> Vec<(i64, i64)> {
    let stmt = Statement::reading(std::slice::from_ref(table));
    session.begin_statement(&stmt).unwrap();
    let rows = session.scan(&table.name()).unwrap();
    session.end_statement().unwrap();
    rows.iter()
        .map(|r| match (&r.values[0], &r.values[1]) {
            (Value::Int(id), Value::Int(val)) => (*id, *val),
            other => panic!("unexpected row shape: {other:?}"),
        })
        .collect()
}

// ---- S1: lost update under MVCC ---------------------------------------------

#[test]
fn mvcc_lost_update_fails_with_serialization_failure() {
    let db = open(TxMode::Mvcc);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");
    insert_rows(&sa, &table, &[(1, 5)]);

    let a = tx_session(&db);
    let b = tx_session(&db);
    let stmt = Statement::reading_writing(std::slice::from_ref(&table), std::slice::from_ref(&table));

    a.begin_statement(&stmt).unwrap();
    b.begin_statement(&stmt).unwrap();
    let seen_a = a.scan("T").unwrap();
    let seen_b = b.scan("T").unwrap();
    assert_eq!(seen_a[0].values[1], Value::Int(5));
    assert_eq!(seen_b[0].values[1], Value::Int(5));

    a.update("T", seen_a[0].id, row(1, 7), [1u16].into_iter().collect()).unwrap();
    a.end_statement().unwrap();
    a.commit().unwrap();

    b.update("T", seen_b[0].id, row(1, 8), [1u16].into_iter().collect()).unwrap();
    b.end_statement().unwrap();
    let err = b.commit().unwrap_err();
    assert_eq!(err.code(), ErrorCode::SerializationFailure);

    assert_eq!(scan_vals(&admin(&db), &table), vec![(1, 7)]);
    a.close();
    b.close();
}

#[test]
fn mvcc_conflict_rollback_setting_aborts_immediately() {
    let mut config = DatabaseConfig::with_mode(TxMode::Mvcc);
    config.tx_conflict_rollback = true;
    let db = Database::open(config);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");
    insert_rows(&sa, &table, &[(1, 5)]);

    let a = tx_session(&db);
    let b = tx_session(&db);
    let stmt = Statement::reading_writing(std::slice::from_ref(&table), std::slice::from_ref(&table));

    a.begin_statement(&stmt).unwrap();
    let rid = a.scan("T").unwrap()[0].id;
    a.delete("T", rid).unwrap();

    // The row is held uncommitted by `a`; with conflict-rollback on,
    // `b` aborts instead of queueing behind it.
    b.begin_statement(&stmt).unwrap();
    let err = b.delete("T", rid).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SerializationFailure);
    assert!(!b.in_transaction());

    a.end_statement().unwrap();
    a.commit().unwrap();
    a.close();
    b.close();
}

// ---- S2: deadlock avoidance under 2PL ---------------------------------------

#[test]
fn two_phase_locking_deadlock_aborts_the_later_session() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let t1 = id_val_table(&db, &sa, "T1");
    let t2 = id_val_table(&db, &sa, "T2");

    let a = tx_session(&db);
    let b = tx_session(&db);

    a.begin_statement(&Statement::writing(std::slice::from_ref(&t1))).unwrap();
    a.insert("T1", row(1, 1)).unwrap();
    a.end_statement().unwrap();

    b.begin_statement(&Statement::writing(std::slice::from_ref(&t2))).unwrap();
    b.insert("T2", row(1, 1)).unwrap();
    b.end_statement().unwrap();

    let a2 = Arc::clone(&a);
    let t2_for_a = t2.clone();
    let waiter = std::thread::spawn(move || {
        // Parks behind b's write lock on T2.
        a2.begin_statement(&Statement::writing(std::slice::from_ref(&t2_for_a)))
    });
    std::thread::sleep(Duration::from_millis(100));

    // Completing the cycle is detected before anyone sleeps on it.
    let err = b
        .begin_statement(&Statement::writing(std::slice::from_ref(&t1)))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StatementAborted);
    assert!(!b.in_transaction());

    // The surviving session acquires T2 and commits both its writes.
    waiter.join().unwrap().unwrap();
    a.insert("T2", row(2, 2)).unwrap();
    a.end_statement().unwrap();
    a.commit().unwrap();

    assert_eq!(scan_vals(&admin(&db), &t1), vec![(1, 1)]);
    assert_eq!(scan_vals(&admin(&db), &t2), vec![(2, 2)]);
    a.close();
    b.close();
}

#[test]
fn blocked_writer_proceeds_after_holder_commits() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let t1 = id_val_table(&db, &sa, "T1");

    let a = tx_session(&db);
    a.begin_statement(&Statement::writing(std::slice::from_ref(&t1))).unwrap();
    a.insert("T1", row(1, 1)).unwrap();
    a.end_statement().unwrap();

    let b = tx_session(&db);
    let b2 = Arc::clone(&b);
    let t1_for_b = t1.clone();
    let waiter = std::thread::spawn(move || {
        b2.begin_statement(&Statement::writing(std::slice::from_ref(&t1_for_b)))?;
        b2.insert("T1", row(2, 2))?;
        b2.end_statement()?;
        b2.commit()
    });
    std::thread::sleep(Duration::from_millis(100));
    a.commit().unwrap();
    waiter.join().unwrap().unwrap();

    assert_eq!(scan_vals(&admin(&db), &t1), vec![(1, 1), (2, 2)]);
    a.close();
    b.close();
}

#[test]
fn lock_wait_times_out_with_statement_aborted() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let t1 = id_val_table(&db, &sa, "T1");

    let a = tx_session(&db);
    a.begin_statement(&Statement::writing(std::slice::from_ref(&t1))).unwrap();
    a.insert("T1", row(1, 1)).unwrap();
    a.end_statement().unwrap();

    let b = tx_session(&db);
    let err = b
        .begin_statement(&Statement::writing(std::slice::from_ref(&t1)).with_timeout(1))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StatementAborted);

    a.commit().unwrap();
    a.close();
    b.close();
}

// ---- S3: savepoint partial rollback -----------------------------------------

#[test]
fn savepoint_rollback_keeps_only_earlier_work() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");

    let s = tx_session(&db);
    let stmt = Statement::writing(std::slice::from_ref(&table));
    s.begin_statement(&stmt).unwrap();
    for id in 1..=3 {
        s.insert("T", row(id, id)).unwrap();
    }
    s.savepoint("SP").unwrap();
    for id in 4..=5 {
        s.insert("T", row(id, id)).unwrap();
    }
    s.rollback_to_savepoint("SP").unwrap();
    s.end_statement().unwrap();
    s.commit().unwrap();

    assert_eq!(scan_vals(&admin(&db), &table), vec![(1, 1), (2, 2), (3, 3)]);
    s.close();
}

#[test]
fn savepoint_roundtrip_with_no_work_changes_nothing() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");

    let s = tx_session(&db);
    s.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    s.insert("T", row(1, 1)).unwrap();
    s.savepoint("SP").unwrap();
    s.rollback_to_savepoint("SP").unwrap();
    s.end_statement().unwrap();
    s.commit().unwrap();

    assert_eq!(scan_vals(&admin(&db), &table), vec![(1, 1)]);
    s.close();
}

#[test]
fn release_savepoint_drops_later_ones_too() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");

    let s = tx_session(&db);
    s.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    s.savepoint("SP1").unwrap();
    s.savepoint("SP2").unwrap();
    s.release_savepoint("SP1").unwrap();
    let err = s.rollback_to_savepoint("SP2").unwrap_err();
    assert!(format!("{err}").contains("SP2"));
    s.end_statement().unwrap();
    s.commit().unwrap();
    s.close();
}

// ---- S4: hybrid store promotion ---------------------------------------------

#[test]
fn store_promotes_past_the_memory_threshold_and_keeps_order() {
    let mut config = DatabaseConfig::with_mode(TxMode::Locks);
    config.max_memory_row_count = 10_000;
    let db = Database::open(config);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");

    let stmt = Statement::writing(std::slice::from_ref(&table));
    sa.begin_statement(&stmt).unwrap();
    for id in 1..=10_000i64 {
        sa.insert("T", row(id, id)).unwrap();
    }
    sa.end_statement().unwrap();

    let store = db.catalog().read().table("PUBLIC", "T").unwrap().store.clone();
    assert!(!store.read().is_cached());

    sa.begin_statement(&stmt).unwrap();
    sa.insert("T", row(10_001, 10_001)).unwrap();
    sa.end_statement().unwrap();
    assert!(store.read().is_cached());

    let vals = scan_vals(&sa, &table);
    assert_eq!(vals.len(), 10_001);
    let ids: Vec<i64> = vals.iter().map(|(id, _)| *id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    sa.close();
}

// ---- S5: cascading schema drop ----------------------------------------------

#[test]
fn cascading_schema_drop_removes_cross_schema_views() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    db.create_schema(&sa, "S", "DBA").unwrap();
    db.create_schema(&sa, "SX", "DBA").unwrap();
    let t1 = db
        .create_table(
            &sa,
            "S",
            "T1",
            vec![ColumnDef::new("ID", "BIGINT")],
            ColSet::new(),
        )
        .unwrap();
    let v1 = db.create_view(&sa, "S", "V1", "SELECT * FROM T1", &[t1.clone()]).unwrap();
    db.create_view(&sa, "SX", "V2", "SELECT * FROM V1", &[v1.clone()]).unwrap();

    let err = db.drop_schema(&sa, "S", false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchemaNotEmpty);

    db.drop_schema(&sa, "S", true).unwrap();
    let catalog = db.catalog().read();
    assert!(catalog.schema("S").is_none());
    assert!(catalog
        .find_schema_object("SX", quartzdb::ObjectKind::View, "V2")
        .is_none());
    sa.close();
}

// ---- S6: role hierarchy rights ----------------------------------------------

#[test]
fn role_and_public_rights_compose_per_user() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");

    db.create_user(&sa, "U").unwrap();
    db.create_role(&sa, "R").unwrap();
    db.grant(&sa, "PUBLIC", &table, PrivilegeSet::SELECT, false).unwrap();
    db.grant(&sa, "R", &table, PrivilegeSet::INSERT, false).unwrap();
    db.grant_role(&sa, "U", "R").unwrap();

    {
        let grantees = db.grantees().read();
        assert!(grantees.is_accessible("U", &table, Some(PrivilegeSet::INSERT)));
        assert!(grantees.is_accessible("U", &table, Some(PrivilegeSet::SELECT)));
    }

    db.revoke_role(&sa, "U", "R").unwrap();
    {
        let grantees = db.grantees().read();
        assert!(!grantees.is_accessible("U", &table, Some(PrivilegeSet::INSERT)));
        assert!(grantees.is_accessible("U", &table, Some(PrivilegeSet::SELECT)));
    }

    // And the row path agrees with the check.
    let u = db.connect("U", true, false, None).unwrap();
    u.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    let err = u.insert("T", row(9, 9)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAuthorized);
    u.end_statement().unwrap();
    u.close();
    sa.close();
}

// ---- mode switching ----------------------------------------------------------

#[test]
fn mode_switch_needs_at_most_one_live_transaction() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let t1 = id_val_table(&db, &sa, "T1");
    let t2 = id_val_table(&db, &sa, "T2");

    let a = tx_session(&db);
    let b = tx_session(&db);
    a.begin_statement(&Statement::writing(std::slice::from_ref(&t1))).unwrap();
    a.insert("T1", row(1, 1)).unwrap();
    a.end_statement().unwrap();
    b.begin_statement(&Statement::writing(std::slice::from_ref(&t2))).unwrap();
    b.insert("T2", row(1, 1)).unwrap();
    b.end_statement().unwrap();

    let err = db.set_transaction_mode(TxMode::Mvcc).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidTransactionState);

    b.commit().unwrap();
    db.set_transaction_mode(TxMode::Mvcc).unwrap();
    assert_eq!(db.tx().mode(), TxMode::Mvcc);
    a.commit().unwrap();
    a.close();
    b.close();
}

// ---- MV2PL versioned reads ---------------------------------------------------

#[test]
fn mvlocks_readonly_session_sees_its_snapshot_without_blocking() {
    let db = open(TxMode::MvLocks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");
    insert_rows(&sa, &table, &[(1, 5)]);

    let writer = tx_session(&db);
    let reader = db.connect(DEFAULT_ADMIN_USER, false, true, None).unwrap();

    let read_stmt = Statement::reading(std::slice::from_ref(&table));
    reader.begin_statement(&read_stmt).unwrap();
    assert_eq!(reader.scan("T").unwrap()[0].values[1], Value::Int(5));

    let write_stmt = Statement::reading_writing(std::slice::from_ref(&table), std::slice::from_ref(&table));
    writer.begin_statement(&write_stmt).unwrap();
    let rid = writer.scan("T").unwrap()[0].id;
    writer.update("T", rid, row(1, 7), [1u16].into_iter().collect()).unwrap();
    writer.end_statement().unwrap();
    writer.commit().unwrap();

    // Still inside its transaction, the reader holds its snapshot.
    assert_eq!(reader.scan("T").unwrap()[0].values[1], Value::Int(5));
    reader.end_statement().unwrap();
    reader.commit().unwrap();

    // A fresh read-only transaction observes the committed update.
    reader.begin_statement(&read_stmt).unwrap();
    assert_eq!(reader.scan("T").unwrap()[0].values[1], Value::Int(7));
    reader.end_statement().unwrap();
    reader.commit().unwrap();
    reader.close();
    writer.close();
    sa.close();
}

// ---- invariants ---------------------------------------------------------------

#[test]
fn transaction_count_and_live_list_track_open_transactions() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let t1 = id_val_table(&db, &sa, "T1");
    let t2 = id_val_table(&db, &sa, "T2");
    let t3 = id_val_table(&db, &sa, "T3");

    let sessions: Vec<Arc<Session>> = (0..3).map(|_| tx_session(&db)).collect();
    for (s, t) in sessions.iter().zip([&t1, &t2, &t3]) {
        s.begin_statement(&Statement::writing(std::slice::from_ref(t))).unwrap();
        s.insert(&t.name(), row(1, 1)).unwrap();
        s.end_statement().unwrap();
    }

    assert_eq!(db.tx().transaction_count(), 3);
    let live = db.tx().live_timestamps();
    assert!(live.windows(2).all(|w| w[0] < w[1]));
    let mut session_ts: Vec<u64> = sessions.iter().map(|s| s.transaction_timestamp()).collect();
    session_ts.sort_unstable();
    assert_eq!(live, session_ts);

    sessions[1].commit().unwrap();
    assert_eq!(db.tx().transaction_count(), 2);
    assert_eq!(db.tx().live_timestamps().len(), 2);

    for s in &sessions {
        let _ = s.commit();
        s.close();
    }
    assert_eq!(db.tx().transaction_count(), 0);
}

#[test]
fn rollback_leaves_the_log_empty_and_tables_untouched() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");
    insert_rows(&sa, &table, &[(1, 1), (2, 2)]);

    let s = tx_session(&db);
    let stmt = Statement::reading_writing(std::slice::from_ref(&table), std::slice::from_ref(&table));
    s.begin_statement(&stmt).unwrap();
    let rows = s.scan("T").unwrap();
    s.delete("T", rows[0].id).unwrap();
    s.insert("T", row(3, 3)).unwrap();
    s.end_statement().unwrap();
    s.rollback().unwrap();

    assert_eq!(scan_vals(&admin(&db), &table), vec![(1, 1), (2, 2)]);
    s.close();
}

// ---- attributes and cancel -----------------------------------------------------

#[test]
fn isolation_is_sticky_and_rejected_mid_transaction() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");

    let s = tx_session(&db);
    s.set_isolation(IsolationLevel::Serializable).unwrap();
    s.set_isolation(IsolationLevel::Serializable).unwrap();
    assert_eq!(s.isolation(), IsolationLevel::Serializable);
    // READ UNCOMMITTED is accepted but rewritten.
    s.set_isolation(IsolationLevel::ReadUncommitted).unwrap();
    assert_eq!(s.isolation(), IsolationLevel::ReadCommitted);

    s.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    s.insert("T", row(1, 1)).unwrap();
    s.end_statement().unwrap();
    let err = s.set_isolation(IsolationLevel::Serializable).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidTransactionState);
    s.commit().unwrap();
    s.close();
}

#[test]
fn cancel_of_a_completed_statement_is_a_noop() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");

    let s = tx_session(&db);
    s.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    let ts = s.statement_start_timestamp();
    s.insert("T", row(1, 1)).unwrap();
    s.end_statement().unwrap();

    assert!(!db.cancel(s.id(), s.random_id(), ts));
    // A wrong random id never cancels, even mid-statement.
    s.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    assert!(!db.cancel(s.id(), s.random_id().wrapping_add(1), s.statement_start_timestamp()));
    assert!(db.cancel(s.id(), s.random_id(), s.statement_start_timestamp()));
    let err = s.insert("T", row(2, 2)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::StatementAborted);
    s.end_statement().unwrap();
    s.commit().unwrap();

    assert_eq!(scan_vals(&admin(&db), &table), vec![(1, 1)]);
    s.close();
}

// ---- commit log ---------------------------------------------------------------

#[test]
fn commits_and_sequence_allocations_reach_the_log() {
    let log = Arc::new(RecordingLog::default());
    let log_dyn: Arc<dyn CommitLog> = log.clone();
    let db = Database::open_with_log(DatabaseConfig::with_mode(TxMode::Locks), log_dyn);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");
    db.create_sequence(&sa, "PUBLIC", "SQ").unwrap();

    let s = tx_session(&db);
    s.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    let v1 = s.next_sequence_value("SQ").unwrap();
    let v2 = s.next_sequence_value("SQ").unwrap();
    assert_eq!((v1, v2), (1, 2));
    s.insert("T", row(v1, 0)).unwrap();
    s.end_statement().unwrap();
    s.commit().unwrap();

    let events = log.events.lock();
    assert!(events.iter().any(|e| matches!(e, LogEvent::Commit { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, LogEvent::Sequence { sequence, .. } if sequence.contains("SQ"))));
    drop(events);

    // A read-only transaction appends nothing.
    let before = log.events.lock().len();
    let r = tx_session(&db);
    r.begin_statement(&Statement::reading(std::slice::from_ref(&table))).unwrap();
    r.scan("T").unwrap();
    r.end_statement().unwrap();
    r.commit().unwrap();
    assert_eq!(log.events.lock().len(), before);
    r.close();
    s.close();
    sa.close();
}

// ---- unique constraints --------------------------------------------------------

#[test]
fn primary_key_rejects_duplicates_within_and_across_transactions() {
    let db = open(TxMode::Locks);
    let sa = admin(&db);
    let table = id_val_table(&db, &sa, "T");
    insert_rows(&sa, &table, &[(1, 1)]);

    let s = tx_session(&db);
    s.begin_statement(&Statement::writing(std::slice::from_ref(&table))).unwrap();
    assert!(s.insert("T", row(1, 9)).is_err());
    s.insert("T", row(2, 2)).unwrap();
    assert!(s.insert("T", row(2, 9)).is_err());
    s.end_statement().unwrap();
    s.commit().unwrap();

    assert_eq!(scan_vals(&admin(&db), &table), vec![(1, 1), (2, 2)]);
    s.close();
}
