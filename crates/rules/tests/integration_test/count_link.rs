use reactive_core::{FieldValue, Record};
use reactive_rules::RuleError;

use crate::helpers::{customer_schema, invoice, invoice_schema, Harness};

fn counts(h: &Harness) -> Vec<(i64, i64)> {
    h.rows("customer")
        .iter()
        .map(|r| (r.value("id").as_i64().unwrap(), r.value("invoice_count").as_i64().unwrap()))
        .collect()
}

fn create_rule(h: &mut Harness) {
    h.run(|engine, tx| {
        engine.count_link_create(tx, "customer_invoices", "customer", "id", "invoice_count", "invoice", "customer_id")
    })
    .unwrap();
}

fn linked() -> Harness {
    let mut h = Harness::new(vec![customer_schema(), invoice_schema()]);
    h.insert("customer", Record::new().with("id", 1).with("name", "c1")).unwrap();
    h.insert("customer", Record::new().with("id", 2).with("name", "c2")).unwrap();
    create_rule(&mut h);
    h
}

#[test]
fn test_insert_delete_reassign() {
    let mut h = linked();

    h.run(|_, tx| {
        tx.insert("invoice", invoice(1, 1, "FR", 5.5))?;
        tx.insert("invoice", invoice(2, 1, "US", 6.6))?;
        tx.insert("invoice", invoice(3, 2, "FR", 2.2))?;
        Ok(())
    })
    .unwrap();
    assert_eq!(counts(&h), vec![(1, 2), (2, 1)]);

    h.delete("invoice", ("id", 1)).unwrap();
    h.delete("invoice", ("id", 3)).unwrap();
    assert_eq!(counts(&h), vec![(1, 1), (2, 0)]);

    h.set("invoice", ("id", 2), "customer_id", 2).unwrap();
    assert_eq!(counts(&h), vec![(1, 0), (2, 1)]);
}

#[test]
fn test_update_without_key_change_is_noop() {
    let mut h = linked();
    h.insert("invoice", invoice(1, 1, "FR", 5.5)).unwrap();

    h.set("invoice", ("id", 1), "amount", 9.9).unwrap();
    // Re-pointing at the same parent nets out
    h.set("invoice", ("id", 1), "customer_id", 1).unwrap();
    assert_eq!(counts(&h), vec![(1, 1), (2, 0)]);
}

#[test]
fn test_null_and_dangling_keys() {
    let mut h = linked();
    h.insert("invoice", Record::new().with("id", 1)).unwrap();
    h.insert("invoice", invoice(2, 99, "FR", 1.0)).unwrap();
    assert_eq!(counts(&h), vec![(1, 0), (2, 0)]);

    // Moving from a null key to a real parent counts once
    h.set("invoice", ("id", 1), "customer_id", 2).unwrap();
    assert_eq!(counts(&h), vec![(1, 0), (2, 1)]);

    h.set("invoice", ("id", 1), "customer_id", FieldValue::Null).unwrap();
    assert_eq!(counts(&h), vec![(1, 0), (2, 0)]);
}

#[test]
fn test_bulk_clear_zeroes_every_parent() {
    let mut h = linked();
    h.run(|_, tx| {
        tx.insert("invoice", invoice(1, 1, "FR", 5.5))?;
        tx.insert("invoice", invoice(2, 1, "US", 6.6))?;
        tx.insert("invoice", invoice(3, 2, "FR", 2.2))?;
        Ok(())
    })
    .unwrap();

    assert_eq!(h.clear("invoice").unwrap(), 3);
    assert_eq!(counts(&h), vec![(1, 0), (2, 0)]);

    // Counting resumes afterwards
    h.insert("invoice", invoice(4, 2, "FR", 1.0)).unwrap();
    assert_eq!(counts(&h), vec![(1, 0), (2, 1)]);
}

#[test]
fn test_delete_all_rows_one_by_one() {
    let mut h = linked();
    h.run(|_, tx| {
        tx.insert("invoice", invoice(1, 1, "FR", 5.5))?;
        tx.insert("invoice", invoice(2, 2, "US", 6.6))?;
        Ok(())
    })
    .unwrap();

    assert_eq!(h.run(|_, tx| Ok(tx.delete_where("invoice", |_| true)?)).unwrap(), 2);
    assert_eq!(counts(&h), vec![(1, 0), (2, 0)]);
}

#[test]
fn test_refresh_repairs_drift_and_backfills() {
    let mut h = Harness::new(vec![customer_schema(), invoice_schema()]);
    h.run(|_, tx| {
        tx.insert("customer", Record::new().with("id", 1))?;
        tx.insert("customer", Record::new().with("id", 2).with("invoice_count", 40))?;
        tx.insert("invoice", invoice(1, 1, "FR", 5.5))?;
        tx.insert("invoice", invoice(2, 1, "US", 6.6))?;
        Ok(())
    })
    .unwrap();

    // Attaching does not recount pre-existing rows
    create_rule(&mut h);
    assert_eq!(counts(&h), vec![(1, 0), (2, 40)]);

    h.run(|engine, tx| engine.count_link_refresh(tx, "customer_invoices")).unwrap();
    assert_eq!(counts(&h), vec![(1, 2), (2, 0)]);

    // Refresh does not change the enabled flag
    assert!(h.run(|engine, tx| engine.get(tx, "customer_invoices")).unwrap().enabled);
}

#[test]
fn test_rollback_discards_count_changes() {
    let mut h = linked();
    h.insert("invoice", invoice(1, 1, "FR", 5.5)).unwrap();

    let result: reactive_rules::Result<()> = h.run(|_, tx| {
        tx.insert("invoice", invoice(2, 1, "FR", 1.0))?;
        tx.delete_where("invoice", |r| r.value("id") == &FieldValue::Integer(1))?;
        Err(RuleError::InvariantViolation("abandon".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(counts(&h), vec![(1, 1), (2, 0)]);
}

#[test]
fn test_read_your_writes_within_transaction() {
    let mut h = linked();
    h.run(|_, tx| {
        tx.insert("invoice", invoice(1, 2, "FR", 5.5))?;
        let parent = tx.find_one("customer", |r| r.value("id") == &FieldValue::Integer(2))?.unwrap();
        assert_eq!(parent.value("invoice_count"), &FieldValue::Integer(1));
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_create_validation() {
    let mut h = linked();

    let duplicate = h.run(|engine, tx| {
        engine.count_link_create(tx, "customer_invoices", "customer", "id", "invoice_count", "invoice", "customer_id")
    });
    assert!(matches!(duplicate, Err(RuleError::DuplicateId(_))));

    let text_count = h.run(|engine, tx| {
        engine.count_link_create(tx, "other", "customer", "id", "name", "invoice", "customer_id")
    });
    assert!(matches!(text_count, Err(RuleError::SchemaMismatch(_))));

    let bad_fk = h.run(|engine, tx| {
        engine.count_link_create(tx, "other", "customer", "id", "invoice_count", "invoice", "country")
    });
    assert!(matches!(bad_fk, Err(RuleError::SchemaMismatch(_))));

    // No toggle for counts
    assert!(matches!(
        h.run(|engine, tx| engine.disable(tx, "customer_invoices")),
        Err(RuleError::Unsupported { .. })
    ));
}
