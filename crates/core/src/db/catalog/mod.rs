//! The schema catalog: schemas, their object sets, and the operations
//! that keep the reference graph consistent across DDL.

mod manager;
mod object;
mod schema;
mod sequence;

pub use manager::{SchemaManager, DEFAULT_SCHEMA, INFORMATION_SCHEMA, SYSTEM_SCHEMA};
pub use object::{
    Charset, Collation, ColumnDef, Constraint, ConstraintKind, IndexObject, Reference, Routine, SchemaObject, Table,
    Trigger, TypeObject, View,
};
pub use schema::Schema;
pub use sequence::{NumberSequence, SEQUENCE_PREALLOCATION_AMOUNT};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use quartzdb_primitives::{ColSet, ObjectKind};

    fn manager() -> SchemaManager {
        SchemaManager::new("DBA")
    }

    fn cols(names: &[&str]) -> Vec<ColumnDef> {
        names.iter().map(|n| ColumnDef::new(n, "INTEGER")).collect()
    }

    #[test]
    fn system_schemas_cannot_be_created_or_dropped() {
        let mut m = manager();
        let err = m.create_schema(SYSTEM_SCHEMA, "DBA").unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaNotModifiable);
        let err = m.drop_schema(SYSTEM_SCHEMA, true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaNotModifiable);
    }

    #[test]
    fn drop_of_non_empty_schema_needs_cascade() {
        let mut m = manager();
        m.create_schema("S", "DBA").unwrap();
        m.create_table("S", "T1", cols(&["ID"]), ColSet::new(), 1024).unwrap();
        let err = m.drop_schema("S", false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaNotEmpty);
        m.drop_schema("S", true).unwrap();
        assert!(m.schema("S").is_none());
    }

    #[test]
    fn dropping_the_default_schema_reinstalls_an_empty_one() {
        let mut m = manager();
        m.create_table(DEFAULT_SCHEMA, "T1", cols(&["ID"]), ColSet::new(), 1024).unwrap();
        m.drop_schema(DEFAULT_SCHEMA, true).unwrap();
        let schema = m.schema(DEFAULT_SCHEMA).expect("default recreated");
        assert!(schema.is_empty());
    }

    #[test]
    fn cascading_schema_drop_takes_cross_schema_referrers() {
        let mut m = manager();
        m.create_schema("S", "DBA").unwrap();
        m.create_schema("S2", "DBA").unwrap();
        let t1 = m.create_table("S", "T1", cols(&["ID"]), ColSet::new(), 1024).unwrap();
        let v1 = m.create_view("S", "V1", "SELECT * FROM T1", &[t1.clone()]).unwrap();
        let v2 = m.create_view("S2", "V2", "SELECT * FROM V1", &[v1.clone()]).unwrap();
        let dropped = m.drop_schema("S", true).unwrap();
        assert!(dropped.contains(&v2));
        assert!(dropped.contains(&v1));
        assert!(dropped.contains(&t1));
        assert!(m.schema("S").is_none());
        assert!(m.find_schema_object("S2", ObjectKind::View, "V2").is_none());
    }

    #[test]
    fn referenced_object_refuses_drop_without_cascade() {
        let mut m = manager();
        let t1 = m
            .create_table(DEFAULT_SCHEMA, "T1", cols(&["ID"]), ColSet::new(), 1024)
            .unwrap();
        m.create_view(DEFAULT_SCHEMA, "V1", "SELECT * FROM T1", &[t1.clone()]).unwrap();
        let err = m.remove_schema_object(&t1, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ObjectReferenced);
        let dropped = m.remove_schema_object(&t1, true).unwrap();
        assert_eq!(dropped.len(), 2);
        assert!(m.find_schema_object(DEFAULT_SCHEMA, ObjectKind::View, "V1").is_none());
    }

    #[test]
    fn exported_foreign_keys_gate_drop_table() {
        let mut m = manager();
        let parent = m
            .create_table(DEFAULT_SCHEMA, "PARENT", cols(&["ID"]), [0u16].into_iter().collect(), 1024)
            .unwrap();
        let child = m
            .create_table(DEFAULT_SCHEMA, "CHILD", cols(&["ID", "PARENT_ID"]), ColSet::new(), 1024)
            .unwrap();
        m.add_foreign_key(&child, "FK_CHILD_PARENT", [1u16].into_iter().collect(), &parent)
            .unwrap();
        let err = m.drop_table(&parent, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ObjectReferenced);
        m.drop_table(&parent, true).unwrap();
        // The child table survives, rewritten without its foreign key.
        assert!(m.find_schema_object(DEFAULT_SCHEMA, ObjectKind::Table, "CHILD").is_some());
        assert!(m.registry().referrers_of(&child).is_empty());
    }

    #[test]
    fn rename_is_blocked_by_compiled_referrers() {
        let mut m = manager();
        let t1 = m
            .create_table(DEFAULT_SCHEMA, "T1", cols(&["ID"]), ColSet::new(), 1024)
            .unwrap();
        m.create_view(DEFAULT_SCHEMA, "V1", "SELECT * FROM T1", &[t1.clone()]).unwrap();
        let err = m.rename_schema_object(&t1, "T2").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ObjectReferenced);
    }

    #[test]
    fn rename_keeps_identity_and_moves_the_set_key() {
        let mut m = manager();
        let t1 = m
            .create_table(DEFAULT_SCHEMA, "T1", cols(&["ID"]), ColSet::new(), 1024)
            .unwrap();
        m.rename_schema_object(&t1, "T2").unwrap();
        assert_eq!(t1.name(), "T2");
        assert!(m.find_schema_object(DEFAULT_SCHEMA, ObjectKind::Table, "T1").is_none());
        assert!(m.find_schema_object(DEFAULT_SCHEMA, ObjectKind::Table, "T2").is_some());
        assert!(m.store_of(&t1).is_some());
    }

    #[test]
    fn recompile_touches_only_compiled_dependents() {
        let mut m = manager();
        let t1 = m
            .create_table(DEFAULT_SCHEMA, "T1", cols(&["ID"]), ColSet::new(), 1024)
            .unwrap();
        m.create_view(DEFAULT_SCHEMA, "V1", "SELECT * FROM T1", &[t1.clone()]).unwrap();
        m.recompile_dependent_objects(&t1);
        match m.find_schema_object(DEFAULT_SCHEMA, ObjectKind::View, "V1") {
            Some(SchemaObject::View(v)) => assert_eq!(v.recompile_count, 1),
            _ => panic!("view missing"),
        }
    }

    #[test]
    fn type_and_domain_share_a_namespace() {
        let mut m = manager();
        let s = m.schema(DEFAULT_SCHEMA).unwrap().name.clone();
        let ty = m.registry().new_schema_object_name("MONEY", false, ObjectKind::Type, &s, Some("DBA"));
        m.add_schema_object(SchemaObject::Type(TypeObject {
            name: ty,
            base_type: "DECIMAL".into(),
        }))
        .unwrap();
        let dom = m
            .registry()
            .new_schema_object_name("MONEY", false, ObjectKind::Domain, &s, Some("DBA"));
        let err = m
            .add_schema_object(SchemaObject::Domain(TypeObject {
                name: dom,
                base_type: "DECIMAL".into(),
            }))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::General);
    }
}
