use chrono::{Duration, TimeZone, Utc};

use reactive_core::FieldValue;
use reactive_rules::RuleError;

use crate::helpers::{customer_schema, invoice, invoice_schema, Harness};

fn stamped() -> Harness {
    let mut h = Harness::new(vec![customer_schema(), invoice_schema()]);
    h.run(|engine, tx| engine.revision_stamp_create(tx, "invoice_stamp", "invoice", "last_modified"))
        .unwrap();
    h
}

#[test]
fn test_insert_and_update_are_stamped() {
    let mut h = stamped();

    let before = Utc::now();
    h.insert("invoice", invoice(1, 1, "FR", 5.5)).unwrap();
    let stamp = h.row("invoice", "id", 1).value("last_modified").as_timestamp().unwrap();
    assert!(stamp >= before);
    assert!(Utc::now() - stamp < Duration::seconds(5));

    h.set("invoice", ("id", 1), "amount", 6.0).unwrap();
    let restamped = h.row("invoice", "id", 1).value("last_modified").as_timestamp().unwrap();
    assert!(restamped >= stamp);
}

#[test]
fn test_stamp_is_the_transaction_time() {
    let mut h = stamped();
    let at = Utc.with_ymd_and_hms(2025, 6, 14, 10, 0, 0).unwrap();

    // A supplied value is overwritten
    let mut tx = h.db.begin_at(at);
    tx.insert(
        "invoice",
        invoice(1, 1, "FR", 5.5).with("last_modified", Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap()),
    )
    .unwrap();
    tx.insert("invoice", invoice(2, 1, "US", 1.0)).unwrap();
    tx.commit().unwrap();

    for row in h.rows("invoice") {
        assert_eq!(row.value("last_modified"), &FieldValue::Timestamp(at));
    }
}

#[test]
fn test_disable_then_enable() {
    let mut h = stamped();

    h.run(|engine, tx| engine.revision_stamp_disable(tx, "invoice_stamp")).unwrap();
    // Disabling twice is a no-op
    h.run(|engine, tx| engine.revision_stamp_disable(tx, "invoice_stamp")).unwrap();
    assert!(!h.run(|engine, tx| engine.get(tx, "invoice_stamp")).unwrap().enabled);

    h.insert("invoice", invoice(1, 1, "FR", 5.5)).unwrap();
    assert!(h.row("invoice", "id", 1).value("last_modified").is_null());

    h.run(|engine, tx| engine.revision_stamp_enable(tx, "invoice_stamp")).unwrap();
    // Enabling never touches existing rows
    assert!(h.row("invoice", "id", 1).value("last_modified").is_null());

    h.set("invoice", ("id", 1), "amount", 7.0).unwrap();
    assert!(!h.row("invoice", "id", 1).value("last_modified").is_null());
}

#[test]
fn test_disabled_rule_keeps_supplied_value() {
    let mut h = stamped();
    h.run(|engine, tx| engine.disable(tx, "invoice_stamp")).unwrap();

    let supplied = Utc.with_ymd_and_hms(2020, 2, 2, 2, 2, 2).unwrap();
    h.insert("invoice", invoice(1, 1, "FR", 5.5).with("last_modified", supplied)).unwrap();
    assert_eq!(h.row("invoice", "id", 1).value("last_modified"), &FieldValue::Timestamp(supplied));
}

#[test]
fn test_create_rejects_bad_field() {
    let mut h = Harness::new(vec![customer_schema(), invoice_schema()]);

    let missing = h.run(|engine, tx| engine.revision_stamp_create(tx, "s", "invoice", "nope"));
    assert!(matches!(missing, Err(RuleError::SchemaMismatch(_))));

    // Wrong type
    let text = h.run(|engine, tx| engine.revision_stamp_create(tx, "s", "invoice", "country"));
    assert!(matches!(text, Err(RuleError::SchemaMismatch(_))));

    let no_collection = h.run(|engine, tx| engine.revision_stamp_create(tx, "s", "ghost", "last_modified"));
    assert!(matches!(no_collection, Err(RuleError::SchemaMismatch(_))));

    // Nothing was registered by the failed calls
    assert!(h.run(|engine, tx| engine.list(tx)).unwrap().is_empty());
}

#[test]
fn test_unknown_id_on_toggle() {
    let mut h = stamped();
    assert!(matches!(
        h.run(|engine, tx| engine.revision_stamp_enable(tx, "nope")),
        Err(RuleError::UnknownId(_))
    ));
}
