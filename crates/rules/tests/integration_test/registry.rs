use tempfile::TempDir;

use reactive_core::Record;
use reactive_rules::{
    CountLink, RevisionStamp, RuleDeclaration, RuleEngine, RuleError, RuleKind, SyncDirection, UnionSync,
};
use reactive_storage::Database;

use crate::helpers::{customer_schema, invoice, invoice_schema, Harness};

fn count_link() -> CountLink {
    CountLink {
        parent_collection: "customer".into(),
        parent_id_field: "id".into(),
        count_field: "invoice_count".into(),
        child_collection: "invoice".into(),
        foreign_key_field: "customer_id".into(),
    }
}

fn with_rules() -> Harness {
    let mut h = Harness::new(vec![customer_schema(), invoice_schema()]);
    h.run(|engine, tx| {
        engine.create(tx, RuleDeclaration::new("stamp", RevisionStamp::new("invoice", "last_modified")))?;
        engine.create(tx, RuleDeclaration::new("counts", count_link()))?;
        Ok(())
    })
    .unwrap();
    h
}

#[test]
fn test_list_and_lookup() {
    let mut h = with_rules();
    h.run(|engine, tx| {
        let listed: Vec<_> = engine.list(tx)?.into_iter().map(|i| (i.id, i.kind)).collect();
        assert_eq!(
            listed,
            vec![
                ("counts".to_string(), RuleKind::CountLink),
                ("stamp".to_string(), RuleKind::RevisionStamp)
            ]
        );

        let on_invoice: Vec<_> = engine.lookup(tx, "invoice")?.into_iter().map(|i| i.id).collect();
        assert_eq!(on_invoice, vec!["counts", "stamp"]);
        assert!(engine.lookup(tx, "customer")?.is_empty());
        Ok(())
    })
    .unwrap();

    // Disabled instances drop out of lookup
    h.run(|engine, tx| engine.disable(tx, "stamp")).unwrap();
    let on_invoice = h.run(|engine, tx| engine.lookup(tx, "invoice")).unwrap();
    assert_eq!(on_invoice.len(), 1);
    assert_eq!(on_invoice[0].id, "counts");
}

#[test]
fn test_duplicate_and_unknown_ids() {
    let mut h = with_rules();

    let duplicate = h.run(|engine, tx| {
        engine.create(tx, RuleDeclaration::new("stamp", RevisionStamp::new("invoice", "last_modified")))
    });
    assert!(matches!(duplicate, Err(RuleError::DuplicateId(id)) if id == "stamp"));

    assert!(matches!(h.run(|engine, tx| engine.get(tx, "nope")), Err(RuleError::UnknownId(_))));
    assert!(matches!(h.run(|engine, tx| engine.enable(tx, "nope")), Err(RuleError::UnknownId(_))));
    assert!(matches!(h.run(|engine, tx| engine.refresh(tx, "nope")), Err(RuleError::UnknownId(_))));
    assert!(matches!(h.run(|engine, tx| engine.drop_rule(tx, "nope")), Err(RuleError::UnknownId(_))));
}

#[test]
fn test_unsupported_operations() {
    let mut h = with_rules();
    assert!(matches!(
        h.run(|engine, tx| engine.refresh(tx, "stamp")),
        Err(RuleError::Unsupported { kind: RuleKind::RevisionStamp, operation: "refresh" })
    ));
    assert!(matches!(
        h.run(|engine, tx| engine.enable(tx, "counts")),
        Err(RuleError::Unsupported { kind: RuleKind::CountLink, .. })
    ));
}

#[test]
fn test_drop_keeps_derived_state() {
    let mut h = with_rules();
    h.insert("customer", Record::new().with("id", 1)).unwrap();
    h.insert("invoice", invoice(1, 1, "FR", 5.5)).unwrap();
    assert_eq!(h.row("customer", "id", 1).value("invoice_count").as_i64(), Some(1));

    let dropped = h.run(|engine, tx| engine.drop_rule(tx, "counts")).unwrap();
    assert_eq!(dropped.kind, RuleKind::CountLink);

    // Existing counts stay; new children are no longer counted
    h.insert("invoice", invoice(2, 1, "FR", 1.0)).unwrap();
    assert_eq!(h.row("customer", "id", 1).value("invoice_count").as_i64(), Some(1));

    // The id can be reused
    h.run(|engine, tx| engine.create(tx, RuleDeclaration::new("counts", count_link())))
        .unwrap();
}

#[test]
fn test_failed_transaction_rolls_back_registration() {
    let mut h = with_rules();
    let result = h.run(|engine, tx| {
        engine.tree_level_create(tx, "levels", "customer", "id", "id", "invoice_count")?;
        Err::<(), _>(RuleError::InvariantViolation("abandon".to_string()))
    });
    assert!(result.is_err());
    assert!(matches!(h.run(|engine, tx| engine.get(tx, "levels")), Err(RuleError::UnknownId(_))));

    // A disable inside a failed transaction is undone too
    let _ = h.run(|engine, tx| {
        engine.disable(tx, "stamp")?;
        Err::<(), _>(RuleError::InvariantViolation("abandon".to_string()))
    });
    assert!(h.run(|engine, tx| engine.get(tx, "stamp")).unwrap().enabled);
}

#[test]
fn test_provision_is_idempotent() {
    let mut h = Harness::new(vec![customer_schema(), invoice_schema()]);
    let declarations = || {
        vec![
            RuleDeclaration::new("stamp", RevisionStamp::new("invoice", "last_modified")),
            RuleDeclaration::new("counts", count_link()),
        ]
    };

    assert_eq!(h.run(|engine, tx| engine.provision(tx, declarations())).unwrap(), 2);
    assert_eq!(h.run(|engine, tx| engine.provision(tx, declarations())).unwrap(), 0);

    // Same id, different configuration
    let conflicting = h.run(|engine, tx| {
        engine.ensure(tx, RuleDeclaration::new("stamp", RevisionStamp::new("customer", "name")))
    });
    assert!(matches!(conflicting, Err(RuleError::DuplicateId(_))));
}

#[test]
fn test_registry_survives_snapshot() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("db.json");

    let mut h = with_rules();
    h.insert("customer", Record::new().with("id", 1)).unwrap();
    h.db.save_snapshot(&path).unwrap();

    let mut db = Database::open(&path).unwrap();
    let engine = RuleEngine::new(reactive_rules::Registry::in_collection("rule_instances"))
        .attach(&mut db)
        .unwrap();
    assert_eq!(db.execute(|tx| engine.list(tx)).unwrap().len(), 2);

    // Reopened rules keep reacting
    db.execute(|tx| -> reactive_rules::Result<()> {
        tx.insert("invoice", invoice(1, 1, "FR", 5.5))?;
        Ok(())
    })
    .unwrap();
    let customer = db.rows("customer").unwrap().remove(0);
    assert_eq!(customer.value("invoice_count").as_i64(), Some(1));
}

#[test]
fn test_in_memory_registry_drives_rules() {
    let mut db = Database::new();
    db.execute(|tx| -> reactive_rules::Result<()> {
        tx.create_collection(customer_schema())?;
        tx.create_collection(invoice_schema())?;
        Ok(())
    })
    .unwrap();
    let engine = RuleEngine::in_memory().attach(&mut db).unwrap();

    db.execute(|tx| {
        engine.create(
            tx,
            RuleDeclaration::new("union", UnionSync::new("everything", &["customer"], SyncDirection::SubToBase)),
        )
    })
    .unwrap();
    db.execute(|tx| -> reactive_rules::Result<()> {
        tx.insert("customer", Record::new().with("id", 7))?;
        Ok(())
    })
    .unwrap();
    assert_eq!(db.rows("everything").unwrap().len(), 1);
    assert!(!db.collection_names().contains(&"rule_instances".to_string()));
}
