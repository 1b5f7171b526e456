use reactive_core::{FieldType, FieldValue, Record};
use reactive_rules::RuleError;
use reactive_storage::CollectionSchema;

use crate::helpers::Harness;

fn node_schema() -> CollectionSchema {
    CollectionSchema::new("node")
        .field("id", FieldType::Integer)
        .field("parent_id", FieldType::Integer)
        .field("level", FieldType::Integer)
        .primary_key("id")
}

fn node(id: i64, parent: Option<i64>) -> Record {
    Record::new().with("id", id).with("parent_id", parent)
}

fn levelled() -> Harness {
    let mut h = Harness::new(vec![node_schema()]);
    h.run(|engine, tx| engine.tree_level_create(tx, "node_levels", "node", "id", "parent_id", "level"))
        .unwrap();
    h
}

fn level(h: &Harness, id: i64) -> i64 {
    h.row("node", "id", id).value("level").as_i64().unwrap()
}

/// Parent hops to the root, walked over committed rows.
fn hops(h: &Harness, id: i64) -> i64 {
    let rows = h.rows("node");
    let mut current = FieldValue::Integer(id);
    let mut hops = -1;
    while !current.is_null() {
        let row = rows.iter().find(|r| r.value("id") == &current).unwrap();
        current = row.value("parent_id").clone();
        hops += 1;
    }
    hops
}

#[test]
fn test_reparenting_scenario() {
    let mut h = levelled();
    h.run(|_, tx| {
        tx.insert("node", node(1, None))?;
        tx.insert("node", node(2, Some(1)))?;
        tx.insert("node", node(3, Some(2)))?;
        Ok(())
    })
    .unwrap();
    assert_eq!((level(&h, 1), level(&h, 2), level(&h, 3)), (0, 1, 2));

    // Move 3 under a fresh root
    h.insert("node", node(4, None)).unwrap();
    h.set("node", ("id", 3), "parent_id", 4).unwrap();
    assert_eq!(level(&h, 4), 0);
    assert_eq!(level(&h, 3), 1);

    h.run(|_, tx| {
        tx.insert("node", node(5, Some(1)))?;
        tx.insert("node", node(6, Some(5)))?;
        tx.insert("node", node(7, Some(4)))?;
        Ok(())
    })
    .unwrap();
    assert_eq!((level(&h, 5), level(&h, 6), level(&h, 7)), (1, 2, 1));

    // Move 5 with its child under 7
    h.set("node", ("id", 5), "parent_id", 7).unwrap();
    assert_eq!(level(&h, 5), 2);
    assert_eq!(level(&h, 6), 3);

    // Detach 5 to make it a root
    h.set("node", ("id", 5), "parent_id", FieldValue::Null).unwrap();
    assert_eq!(level(&h, 5), 0);
    assert_eq!(level(&h, 6), 1);

    for row in h.rows("node") {
        let id = row.value("id").as_i64().unwrap();
        assert_eq!(level(&h, id), hops(&h, id));
    }
}

#[test]
fn test_deep_chain_relevels_iteratively() {
    let mut h = levelled();
    h.run(|_, tx| {
        tx.insert("node", node(0, None))?;
        for id in 1..300 {
            tx.insert("node", node(id, Some(id - 1)))?;
        }
        tx.insert("node", node(1000, None))?;
        tx.insert("node", node(1001, Some(1000)))?;
        Ok(())
    })
    .unwrap();
    assert_eq!(level(&h, 299), 299);

    // Hang the whole chain two levels down
    h.set("node", ("id", 0), "parent_id", 1001).unwrap();
    assert_eq!(level(&h, 0), 2);
    assert_eq!(level(&h, 299), 301);
}

#[test]
fn test_direct_level_writes_are_ignored() {
    let mut h = levelled();
    h.insert("node", node(1, None)).unwrap();
    h.insert("node", node(2, Some(1)).with("level", 42)).unwrap();
    assert_eq!(level(&h, 2), 1);

    h.set("node", ("id", 2), "level", 9).unwrap();
    assert_eq!(level(&h, 2), 1);
}

#[test]
fn test_cycles_are_rejected() {
    let mut h = levelled();
    h.run(|_, tx| {
        tx.insert("node", node(1, None))?;
        tx.insert("node", node(2, Some(1)))?;
        tx.insert("node", node(3, Some(2)))?;
        Ok(())
    })
    .unwrap();

    let cycle = h.set("node", ("id", 1), "parent_id", 3);
    assert!(matches!(cycle, Err(RuleError::InvariantViolation(_))));

    let own_parent = h.set("node", ("id", 2), "parent_id", 2);
    assert!(matches!(own_parent, Err(RuleError::InvariantViolation(_))));

    // The aborted transactions left nothing behind
    assert!(h.row("node", "id", 1).value("parent_id").is_null());
    assert_eq!((level(&h, 1), level(&h, 2), level(&h, 3)), (0, 1, 2));
}

#[test]
fn test_dangling_parent_is_rejected() {
    let mut h = levelled();
    let dangling = h.insert("node", node(1, Some(77)));
    assert!(matches!(dangling, Err(RuleError::InvariantViolation(_))));
    assert!(h.rows("node").is_empty());
}

#[test]
fn test_create_assigns_levels_to_existing_rows() {
    let mut h = Harness::new(vec![node_schema()]);
    h.run(|_, tx| {
        tx.insert("node", node(1, None))?;
        tx.insert("node", node(2, Some(1)))?;
        tx.insert("node", node(3, Some(2)).with("level", 17))?;
        tx.insert("node", node(4, None))?;
        Ok(())
    })
    .unwrap();
    assert!(h.row("node", "id", 2).value("level").is_null());

    h.run(|engine, tx| engine.tree_level_create(tx, "node_levels", "node", "id", "parent_id", "level"))
        .unwrap();
    assert_eq!((level(&h, 1), level(&h, 2), level(&h, 3), level(&h, 4)), (0, 1, 2, 0));

    // New children of pre-existing nodes are levelled from them
    h.insert("node", node(5, Some(3))).unwrap();
    assert_eq!(level(&h, 5), 3);
    h.set("node", ("id", 2), "parent_id", 4).unwrap();
    for row in h.rows("node") {
        let id = row.value("id").as_i64().unwrap();
        assert_eq!(level(&h, id), hops(&h, id));
    }
}

#[test]
fn test_create_rejects_unreachable_rows() {
    let mut h = Harness::new(vec![node_schema()]);
    h.run(|_, tx| {
        tx.insert("node", node(1, None))?;
        tx.insert("node", node(2, Some(3)))?;
        tx.insert("node", node(3, Some(2)))?;
        Ok(())
    })
    .unwrap();

    let cyclic = h.run(|engine, tx| engine.tree_level_create(tx, "node_levels", "node", "id", "parent_id", "level"));
    assert!(matches!(cyclic, Err(RuleError::InvariantViolation(_))));
    assert!(h.run(|engine, tx| engine.list(tx)).unwrap().is_empty());

    // A dangling parent is just as unreachable
    h.run(|_, tx| {
        tx.delete_where("node", |r| r.value("id") != &FieldValue::Integer(1))?;
        tx.insert("node", node(2, Some(99)))?;
        Ok(())
    })
    .unwrap();
    let dangling = h.run(|engine, tx| engine.tree_level_create(tx, "node_levels", "node", "id", "parent_id", "level"));
    assert!(matches!(dangling, Err(RuleError::InvariantViolation(_))));
}

#[test]
fn test_create_validation() {
    let mut h = Harness::new(vec![CollectionSchema::new("node")
        .field("id", FieldType::Integer)
        .field("parent_id", FieldType::Text)
        .field("level", FieldType::Integer)]);

    let mismatched = h.run(|engine, tx| engine.tree_level_create(tx, "t", "node", "id", "parent_id", "level"));
    assert!(matches!(mismatched, Err(RuleError::SchemaMismatch(_))));

    let no_refresh = {
        let mut h = levelled();
        h.run(|engine, tx| engine.refresh(tx, "node_levels"))
    };
    assert!(matches!(no_refresh, Err(RuleError::Unsupported { .. })));
}
