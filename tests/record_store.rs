use tempfile::tempdir;

use minirel::record::schema::encode_record;
use minirel::{
    Attribute, CompOp, DbError, Projection, RecordStore, Rid, Value,
};

fn two_attr_schema() -> Vec<Attribute> {
    vec![Attribute::int("a"), Attribute::varchar("b", 10)]
}

fn record(schema: &[Attribute], values: &[Option<Value>]) -> Vec<u8> {
    encode_record(schema, values).unwrap()
}

#[test]
fn single_insert_reads_back_the_exact_payload() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = two_attr_schema();

    let mut store = RecordStore::create(&path).unwrap();
    let data = record(
        &schema,
        &[Some(Value::Int(7)), Some(Value::VarChar(b"hi".to_vec()))],
    );
    // 1 bitmap byte + 4-byte int + 4-byte length + "hi".
    let expected: Vec<u8> = [
        &[0u8][..],
        &7i32.to_le_bytes(),
        &2u32.to_le_bytes(),
        b"hi",
    ]
    .concat();
    assert_eq!(data, expected);
    assert_eq!(data.len(), 13);

    let rid = store.insert(&schema, &data).unwrap();
    assert_eq!(rid, Rid::new(0, 0));
    assert_eq!(store.read(&schema, rid).unwrap(), expected);
    store.close().unwrap();
}

#[test]
fn deleted_slot_is_reused_with_the_same_rid() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = two_attr_schema();

    let mut store = RecordStore::create(&path).unwrap();
    let first = record(
        &schema,
        &[Some(Value::Int(7)), Some(Value::VarChar(b"hi".to_vec()))],
    );
    let rid = store.insert(&schema, &first).unwrap();
    assert_eq!(rid, Rid::new(0, 0));

    store.delete(&schema, rid).unwrap();
    assert!(matches!(
        store.read(&schema, rid).unwrap_err(),
        DbError::NotFound(_)
    ));
    assert!(matches!(
        store.delete(&schema, rid).unwrap_err(),
        DbError::NotFound(_)
    ));

    // A smaller record lands back in slot (0, 0).
    let second = record(
        &schema,
        &[Some(Value::Int(9)), Some(Value::VarChar(b"x".to_vec()))],
    );
    assert!(second.len() <= first.len());
    let reused = store.insert(&schema, &second).unwrap();
    assert_eq!(reused, Rid::new(0, 0));
    assert_eq!(store.read(&schema, reused).unwrap(), second);
    store.close().unwrap();
}

#[test]
fn surviving_rids_stay_valid_across_deletes() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = two_attr_schema();

    let mut store = RecordStore::create(&path).unwrap();
    let mk = |i: i32| {
        record(
            &schema,
            &[
                Some(Value::Int(i)),
                Some(Value::VarChar(format!("r{i}").into_bytes())),
            ],
        )
    };
    let r0 = store.insert(&schema, &mk(0)).unwrap();
    let r1 = store.insert(&schema, &mk(1)).unwrap();
    let r2 = store.insert(&schema, &mk(2)).unwrap();

    store.delete(&schema, r1).unwrap();
    assert_eq!(store.read(&schema, r0).unwrap(), mk(0));
    assert_eq!(store.read(&schema, r2).unwrap(), mk(2));
    store.close().unwrap();
}

#[test]
fn null_attributes_roundtrip() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = vec![
        Attribute::int("id"),
        Attribute::varchar("name", 20),
        Attribute::real("score"),
    ];

    let mut store = RecordStore::create(&path).unwrap();
    let data = record(&schema, &[Some(Value::Int(1)), None, Some(Value::Real(0.5))]);
    let rid = store.insert(&schema, &data).unwrap();
    assert_eq!(store.read(&schema, rid).unwrap(), data);
    store.close().unwrap();
}

#[test]
fn store_grows_to_multiple_pages_and_scans_completely() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = vec![Attribute::int("id"), Attribute::varchar("pad", 512)];

    let mut store = RecordStore::create(&path).unwrap();
    let mut rids = Vec::new();
    for i in 0..40 {
        let data = record(
            &schema,
            &[
                Some(Value::Int(i)),
                Some(Value::VarChar(vec![b'p'; 500])),
            ],
        );
        rids.push(store.insert(&schema, &data).unwrap());
    }
    assert!(store.page_count() >= 2);

    for (i, rid) in rids.iter().enumerate() {
        let data = store.read(&schema, *rid).unwrap();
        let id = Value::decode(minirel::AttrType::Int, &data[1..5]).unwrap();
        assert_eq!(id, Value::Int(i as i32));
    }

    // A predicate-free scan yields exactly the live records.
    store.delete(&schema, rids[3]).unwrap();
    store.delete(&schema, rids[17]).unwrap();
    let projection = Projection::all(&schema);
    let seen: Vec<Rid> = store
        .scan(&schema, None, CompOp::No, None, projection)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(seen.len(), 38);
    assert!(!seen.contains(&rids[3]));
    assert!(!seen.contains(&rids[17]));
    store.close().unwrap();
}

#[test]
fn scan_applies_comparison_operators() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = two_attr_schema();

    let mut store = RecordStore::create(&path).unwrap();
    for i in 0..10 {
        let data = record(
            &schema,
            &[
                Some(Value::Int(i)),
                Some(Value::VarChar(format!("v{i}").into_bytes())),
            ],
        );
        store.insert(&schema, &data).unwrap();
    }

    let count = |store: &mut RecordStore, op: CompOp, v: i32| {
        let value = v.to_le_bytes();
        store
            .scan(
                &schema,
                Some("a"),
                op,
                Some(&value),
                Projection::all(&schema),
            )
            .unwrap()
            .count()
    };

    assert_eq!(count(&mut store, CompOp::Eq, 4), 1);
    assert_eq!(count(&mut store, CompOp::Lt, 4), 4);
    assert_eq!(count(&mut store, CompOp::Le, 4), 5);
    assert_eq!(count(&mut store, CompOp::Gt, 4), 5);
    assert_eq!(count(&mut store, CompOp::Ge, 4), 6);
    assert_eq!(count(&mut store, CompOp::Ne, 4), 9);
    store.close().unwrap();
}

#[test]
fn scan_null_condition_attribute_never_matches() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = two_attr_schema();

    let mut store = RecordStore::create(&path).unwrap();
    let with_null = record(&schema, &[None, Some(Value::VarChar(b"n".to_vec()))]);
    let with_value = record(
        &schema,
        &[Some(Value::Int(1)), Some(Value::VarChar(b"v".to_vec()))],
    );
    store.insert(&schema, &with_null).unwrap();
    store.insert(&schema, &with_value).unwrap();

    let value = 1i32.to_le_bytes();
    let matches: Vec<_> = store
        .scan(
            &schema,
            Some("a"),
            CompOp::Ne,
            Some(&0i32.to_le_bytes()),
            Projection::all(&schema),
        )
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(matches.len(), 1);

    let eq_matches = store
        .scan(
            &schema,
            Some("a"),
            CompOp::Eq,
            Some(&value),
            Projection::all(&schema),
        )
        .unwrap()
        .count();
    assert_eq!(eq_matches, 1);
    store.close().unwrap();
}

#[test]
fn scan_projects_in_both_shapes() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = vec![
        Attribute::int("id"),
        Attribute::varchar("name", 20),
        Attribute::real("score"),
    ];

    let mut store = RecordStore::create(&path).unwrap();
    let data = record(
        &schema,
        &[
            Some(Value::Int(7)),
            Some(Value::VarChar(b"ann".to_vec())),
            Some(Value::Real(9.5)),
        ],
    );
    store.insert(&schema, &data).unwrap();

    // Preserving: same bitmap width, dropped attributes read as NULL.
    let (_, preserved) = store
        .scan(
            &schema,
            None,
            CompOp::No,
            None,
            Projection::preserving(&["id"]),
        )
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(preserved[0], 0b0110_0000);
    assert_eq!(preserved.len(), 1 + 4);

    // Compressed: bitmap recomputed for the output width.
    let (_, compressed) = store
        .scan(
            &schema,
            None,
            CompOp::No,
            None,
            Projection::compressed(&["name", "id"]),
        )
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(compressed[0], 0);
    assert_eq!(&compressed[1..5], 3u32.to_le_bytes().as_slice());
    assert_eq!(&compressed[5..8], b"ann");
    assert_eq!(&compressed[8..12], 7i32.to_le_bytes().as_slice());
    store.close().unwrap();
}

#[test]
fn read_attribute_prepends_a_null_indicator() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = two_attr_schema();

    let mut store = RecordStore::create(&path).unwrap();
    let data = record(
        &schema,
        &[Some(Value::Int(3)), None],
    );
    let rid = store.insert(&schema, &data).unwrap();

    let a = store.read_attribute(&schema, rid, "a").unwrap();
    assert_eq!(a[0], 0);
    assert_eq!(&a[1..], 3i32.to_le_bytes().as_slice());

    let b = store.read_attribute(&schema, rid, "b").unwrap();
    assert_eq!(b, vec![0x80]);

    assert!(matches!(
        store.read_attribute(&schema, rid, "zzz").unwrap_err(),
        DbError::BadArgument(_)
    ));
    store.close().unwrap();
}

#[test]
fn update_rewrites_in_place_or_relocates() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = vec![Attribute::int("id"), Attribute::varchar("pad", 4000)];

    let mut store = RecordStore::create(&path).unwrap();
    let small = record(
        &schema,
        &[Some(Value::Int(1)), Some(Value::VarChar(vec![b'a'; 10]))],
    );
    let big = record(
        &schema,
        &[Some(Value::Int(1)), Some(Value::VarChar(vec![b'b'; 2000]))],
    );
    let rid = store.insert(&schema, &small).unwrap();
    // Fill the rest of the page so the grown record cannot stay.
    let filler = record(
        &schema,
        &[Some(Value::Int(2)), Some(Value::VarChar(vec![b'f'; 3900]))],
    );
    store.insert(&schema, &filler).unwrap();

    let same = store.update(&schema, &small, rid).unwrap();
    assert_eq!(same, rid);

    let moved = store.update(&schema, &big, same).unwrap();
    assert_ne!(moved.page, rid.page);
    assert_eq!(store.read(&schema, moved).unwrap(), big);
    assert!(matches!(
        store.read(&schema, rid).unwrap_err(),
        DbError::NotFound(_)
    ));
    store.close().unwrap();
}

#[test]
fn oversized_record_is_rejected() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = vec![Attribute::varchar("blob", 8000)];

    let mut store = RecordStore::create(&path).unwrap();
    let data = record(&schema, &[Some(Value::VarChar(vec![b'x'; 5000]))]);
    assert!(matches!(
        store.insert(&schema, &data).unwrap_err(),
        DbError::OutOfSpace(_)
    ));
    store.close().unwrap();
}

#[test]
fn print_record_renders_schema_order_json() {
    let schema = vec![
        Attribute::int("id"),
        Attribute::varchar("name", 20),
        Attribute::real("score"),
    ];
    let data = record(
        &schema,
        &[Some(Value::Int(7)), Some(Value::VarChar(b"ann".to_vec())), None],
    );
    let text = RecordStore::print_record(&schema, &data).unwrap();
    assert_eq!(text, r#"{"id":7,"name":"ann","score":null}"#);
}

#[test]
fn store_reopens_with_its_contents() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("records.db");
    let schema = two_attr_schema();

    let data = record(
        &schema,
        &[Some(Value::Int(5)), Some(Value::VarChar(b"keep".to_vec()))],
    );
    let rid;
    {
        let mut store = RecordStore::create(&path).unwrap();
        rid = store.insert(&schema, &data).unwrap();
        store.close().unwrap();
    }
    let mut store = RecordStore::open(&path).unwrap();
    assert_eq!(store.read(&schema, rid).unwrap(), data);
    store.close().unwrap();
}
