use reactive_core::{FieldType, FieldValue, Record};
use reactive_rules::{RuleError, SyncDirection};
use reactive_storage::CollectionSchema;

use crate::helpers::Harness;

fn bike_schema() -> CollectionSchema {
    CollectionSchema::new("bike")
        .field("id", FieldType::Integer)
        .field("common_attribute1", FieldType::Text)
        .field("bike_attribute1", FieldType::Text)
        .primary_key("id")
}

fn car_schema() -> CollectionSchema {
    CollectionSchema::new("car")
        .field("id", FieldType::Integer)
        .field("common_attribute1", FieldType::Text)
        .field("car_attribute1", FieldType::Float)
        .primary_key("id")
}

fn bike(id: i64, common: &str, attr: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("common_attribute1", common)
        .with("bike_attribute1", attr)
}

fn car(id: i64, common: &str, attr: f64) -> Record {
    Record::new()
        .with("id", id)
        .with("common_attribute1", common)
        .with("car_attribute1", attr)
}

fn synced(direction: SyncDirection) -> Harness {
    let mut h = Harness::new(vec![bike_schema(), car_schema()]);
    h.run(|engine, tx| engine.union_sync_create(tx, "vehicles", "vehicle", &["bike", "car"], direction))
        .unwrap();
    h
}

fn ids(h: &Harness, collection: &str) -> Vec<i64> {
    h.rows(collection)
        .iter()
        .map(|r| r.value("id").as_i64().unwrap())
        .collect()
}

// ── SUB_TO_BASE ─────────────────────────────────────────────────

#[test]
fn test_sub_to_base_scenario() {
    let mut h = synced(SyncDirection::SubToBase);

    h.insert("bike", bike(1, "red", "bmx")).unwrap();
    let base = h.row("vehicle", "id", 1);
    assert_eq!(base.value("discriminator"), &FieldValue::from("bike"));
    assert_eq!(base.value("common_attribute1"), &FieldValue::from("red"));
    assert_eq!(base.value("bike_attribute1"), &FieldValue::from("bmx"));
    assert!(base.value("car_attribute1").is_null());

    h.insert("car", car(2, "blue", 1.6)).unwrap();
    let base = h.row("vehicle", "id", 2);
    assert_eq!(base.value("discriminator"), &FieldValue::from("car"));
    assert_eq!(base.value("car_attribute1"), &FieldValue::Float(1.6));
    assert!(base.value("bike_attribute1").is_null());

    h.delete("bike", ("id", 1)).unwrap();
    assert_eq!(ids(&h, "vehicle"), vec![2]);
    assert_eq!(ids(&h, "car"), vec![2]);
}

#[test]
fn test_sub_to_base_updates() {
    let mut h = synced(SyncDirection::SubToBase);
    h.insert("car", car(2, "blue", 1.6)).unwrap();

    h.set("car", ("id", 2), "common_attribute1", "green").unwrap();
    assert_eq!(h.row("vehicle", "id", 2).value("common_attribute1"), &FieldValue::from("green"));

    h.set("car", ("id", 2), "id", 20).unwrap();
    assert_eq!(ids(&h, "vehicle"), vec![20]);
    assert_eq!(h.row("vehicle", "id", 20).value("car_attribute1"), &FieldValue::Float(1.6));
}

#[test]
fn test_sub_to_base_rejects_shared_ids() {
    let mut h = synced(SyncDirection::SubToBase);
    h.insert("bike", bike(1, "red", "bmx")).unwrap();

    let clash = h.insert("car", car(1, "blue", 1.6));
    assert!(matches!(clash, Err(RuleError::InvariantViolation(_))));
    assert!(h.rows("car").is_empty());
    assert_eq!(ids(&h, "vehicle"), vec![1]);
}

#[test]
fn test_sub_to_base_base_is_read_only() {
    let mut h = synced(SyncDirection::SubToBase);
    h.insert("bike", bike(1, "red", "bmx")).unwrap();

    let insert = h.insert("vehicle", Record::new().with("discriminator", "bike").with("id", 5));
    assert!(matches!(insert, Err(RuleError::InvariantViolation(_))));
    let update = h.set("vehicle", ("id", 1), "common_attribute1", "x");
    assert!(matches!(update, Err(RuleError::InvariantViolation(_))));
    let delete = h.delete("vehicle", ("id", 1));
    assert!(matches!(delete, Err(RuleError::InvariantViolation(_))));

    assert_eq!(h.row("vehicle", "id", 1).value("common_attribute1"), &FieldValue::from("red"));
}

#[test]
fn test_sub_to_base_subtype_clear() {
    let mut h = synced(SyncDirection::SubToBase);
    h.run(|_, tx| {
        tx.insert("bike", bike(1, "red", "bmx"))?;
        tx.insert("bike", bike(3, "red", "road"))?;
        tx.insert("car", car(2, "blue", 1.6))?;
        Ok(())
    })
    .unwrap();

    h.clear("bike").unwrap();
    assert_eq!(ids(&h, "vehicle"), vec![2]);
}

#[test]
fn test_sub_to_base_populates_new_base() {
    let mut h = Harness::new(vec![bike_schema(), car_schema()]);
    h.run(|_, tx| {
        tx.insert("bike", bike(1, "red", "bmx"))?;
        tx.insert("car", car(2, "blue", 1.6))?;
        Ok(())
    })
    .unwrap();

    h.run(|engine, tx| {
        engine.union_sync_create(tx, "vehicles", "vehicle", &["bike", "car"], SyncDirection::SubToBase)
    })
    .unwrap();
    assert_eq!(ids(&h, "vehicle"), vec![1, 2]);
}

// ── BASE_TO_SUB ─────────────────────────────────────────────────

#[test]
fn test_base_to_sub_scenario() {
    let mut h = synced(SyncDirection::BaseToSub);

    h.insert(
        "vehicle",
        Record::new()
            .with("discriminator", "car")
            .with("id", 2)
            .with("common_attribute1", "blue")
            .with("car_attribute1", 1.6),
    )
    .unwrap();
    assert_eq!(ids(&h, "car"), vec![2]);
    assert!(h.rows("bike").is_empty());

    h.set("vehicle", ("id", 2), "common_attribute1", "green").unwrap();
    assert_eq!(h.row("car", "id", 2).value("common_attribute1"), &FieldValue::from("green"));

    h.delete("vehicle", ("id", 2)).unwrap();
    assert!(h.rows("car").is_empty());
}

#[test]
fn test_base_to_sub_discriminator_change_moves_row() {
    let mut h = synced(SyncDirection::BaseToSub);
    h.insert(
        "vehicle",
        Record::new()
            .with("discriminator", "bike")
            .with("id", 1)
            .with("common_attribute1", "red")
            .with("bike_attribute1", "bmx"),
    )
    .unwrap();

    h.set("vehicle", ("id", 1), "discriminator", "car").unwrap();
    assert!(h.rows("bike").is_empty());
    let moved = h.row("car", "id", 1);
    assert_eq!(moved.value("common_attribute1"), &FieldValue::from("red"));
    assert!(moved.value("car_attribute1").is_null());
}

#[test]
fn test_base_to_sub_rejects_bad_writes() {
    let mut h = synced(SyncDirection::BaseToSub);

    let unknown = h.insert("vehicle", Record::new().with("discriminator", "boat").with("id", 1));
    assert!(matches!(unknown, Err(RuleError::InvariantViolation(_))));

    let no_discriminator = h.insert("vehicle", Record::new().with("id", 1));
    assert!(matches!(no_discriminator, Err(RuleError::InvariantViolation(_))));

    let direct = h.insert("bike", bike(1, "red", "bmx"));
    assert!(matches!(direct, Err(RuleError::InvariantViolation(_))));

    h.insert("vehicle", Record::new().with("discriminator", "bike").with("id", 1)).unwrap();
    let shared_id = h.insert("vehicle", Record::new().with("discriminator", "car").with("id", 1));
    assert!(matches!(shared_id, Err(RuleError::InvariantViolation(_))));

    assert!(h.rows("car").is_empty());
    assert_eq!(ids(&h, "vehicle"), vec![1]);
    assert_eq!(ids(&h, "bike"), vec![1]);
}

#[test]
fn test_base_to_sub_bulk_clear() {
    let mut h = synced(SyncDirection::BaseToSub);
    h.run(|_, tx| {
        tx.insert("vehicle", Record::new().with("discriminator", "bike").with("id", 1))?;
        tx.insert("vehicle", Record::new().with("discriminator", "car").with("id", 2))?;
        Ok(())
    })
    .unwrap();

    h.clear("vehicle").unwrap();
    assert!(h.rows("bike").is_empty());
    assert!(h.rows("car").is_empty());
}

#[test]
fn test_create_validation() {
    let mut h = Harness::new(vec![bike_schema(), car_schema()]);

    let missing = h.run(|engine, tx| {
        engine.union_sync_create(tx, "u", "vehicle", &["bike", "boat"], SyncDirection::SubToBase)
    });
    assert!(matches!(missing, Err(RuleError::SchemaMismatch(_))));

    let empty = h.run(|engine, tx| engine.union_sync_create(tx, "u", "vehicle", &[], SyncDirection::SubToBase));
    assert!(matches!(empty, Err(RuleError::SchemaMismatch(_))));

    let twice = h.run(|engine, tx| {
        engine.union_sync_create(tx, "u", "vehicle", &["bike", "bike"], SyncDirection::SubToBase)
    });
    assert!(matches!(twice, Err(RuleError::SchemaMismatch(_))));

    // An existing base must carry every union field
    h.run(|_, tx| {
        tx.create_collection(CollectionSchema::new("vehicle").field("id", FieldType::Integer))?;
        Ok(())
    })
    .unwrap();
    let narrow = h.run(|engine, tx| {
        engine.union_sync_create(tx, "u", "vehicle", &["bike", "car"], SyncDirection::BaseToSub)
    });
    assert!(matches!(narrow, Err(RuleError::SchemaMismatch(_))));
}
