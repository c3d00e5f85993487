mod common;

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use treeplex::datatype::{ColumnType, ColumnValue, RawValue};
use treeplex::error::TreeplexError;
use treeplex::sanitize::{
    Constraint, FieldRule, ObjectData, is_genealogical_date, rules, sanitize_record, sanitize_value,
};
use treeplex::tables::ObjectKind;

fn rejected_field(result: treeplex::error::Result<impl std::fmt::Debug>) -> (ObjectKind, String) {
    match result {
        Err(TreeplexError::SanitizationRejected { kind, field, .. }) => (kind, field),
        other => panic!("expected a rejection, got {:?}", other),
    }
}

// A value every field with this rule must accept.
fn acceptable(rule: &FieldRule) -> RawValue {
    match (rule.target, rule.constraint) {
        (ColumnType::Text, Constraint::HexColor) => "#00ff00".into(),
        (ColumnType::Text, _) => "H1".into(),
        (ColumnType::Integer, Constraint::Range(lo, _)) => RawValue::Int(lo),
        (ColumnType::Integer, _) => RawValue::Int(1),
        (ColumnType::Float, Constraint::FloatRange(lo, hi)) => RawValue::Float((lo + hi) / 2.0),
        (ColumnType::Float, _) => RawValue::Float(0.5),
        (ColumnType::Boolean, _) => RawValue::Bool(true),
        (ColumnType::Date, _) => "abt 1850".into(),
        (ColumnType::Timestamp, _) => RawValue::Int(1_700_000_000),
        (ColumnType::Document, _) => json!({"note_list": []}).into(),
    }
}

#[test]
fn every_field_of_every_kind_accepts_a_valid_value() {
    let manager = common::memory_manager();
    let database = manager.create_tenant("Sweep", None).expect("tenant");
    for kind in ObjectKind::ALL {
        let mut record = ObjectData::new(kind, "H1");
        for rule in rules(kind) {
            let raw = acceptable(rule);
            assert!(
                sanitize_value(kind, rule.field, &raw).is_ok(),
                "{}.{} rejected {:?}",
                kind,
                rule.field,
                raw
            );
            if rule.field != "handle" {
                record = record.with(rule.field, raw);
            }
        }
        let sanitized = sanitize_record(&record).expect("complete record");
        assert_eq!(sanitized.columns().len(), rules(kind).len(), "{}", kind);
        database.connection().save(&record).expect("save");
        let stored = database
            .connection()
            .query_optional(&format!("select count(*) from {}", kind.name()), [], |row| {
                row.get::<_, i64>(0)
            })
            .expect("count");
        assert_eq!(stored, Some(1), "{}", kind);
    }
}

#[test]
fn unsupported_shapes_are_rejected_for_every_field_of_every_kind() {
    let mut map = BTreeMap::new();
    map.insert("year".to_string(), RawValue::Int(1850));
    let bytes = RawValue::Bytes(vec![0x41]);
    let map = RawValue::Map(map);
    for kind in ObjectKind::ALL {
        for rule in rules(kind) {
            let expected = (kind, rule.field.to_string());
            assert_eq!(rejected_field(sanitize_value(kind, rule.field, &bytes)), expected);
            match sanitize_value(kind, rule.field, &map) {
                // maps are documents, so only document fields take them
                Ok(value) if rule.target == ColumnType::Document => {
                    assert_eq!(value, ColumnValue::Text("{\"year\":1850}".into()))
                }
                Err(TreeplexError::SanitizationRejected { kind: k, field, value_type, .. }) => {
                    assert_ne!(rule.target, ColumnType::Document);
                    assert_eq!((k, field), expected);
                    assert_eq!(value_type, "map");
                }
                other => panic!("{}.{} took a map: {:?}", kind, rule.field, other),
            }
        }
    }
}

#[test]
fn composite_birth_date_is_rejected_with_kind_and_field() {
    let mut composite = BTreeMap::new();
    composite.insert("year".to_string(), RawValue::Int(1850));
    composite.insert("quality".to_string(), RawValue::Text("about".into()));
    let result = sanitize_value(ObjectKind::Person, "birth_date", &RawValue::Map(composite));
    assert_eq!(rejected_field(result), (ObjectKind::Person, "birth_date".to_string()));
}

#[test]
fn dates_are_normalized_or_rejected() {
    let date = |raw: RawValue| sanitize_value(ObjectKind::Person, "birth_date", &raw);
    assert_eq!(
        date(NaiveDate::from_ymd_opt(1850, 3, 1).expect("date").into()).expect("date"),
        ColumnValue::Text("1850-03-01".into())
    );
    assert_eq!(date("abt 1850".into()).expect("approximate"), ColumnValue::Text("abt 1850".into()));
    assert_eq!(
        date("between 1850 and 1855".into()).expect("range"),
        ColumnValue::Text("between 1850 and 1855".into())
    );
    assert!(date("1850-02-30".into()).is_err());
    assert!(date("sometime".into()).is_err());
    assert!(date(RawValue::Int(1850)).is_err());
    assert_eq!(date(RawValue::Null).expect("nullable"), ColumnValue::Null);
}

#[test]
fn genealogical_date_forms() {
    for ok in ["1850", "1850-03", "1850-03-01", "bef. 1900", "ABT 1850", "between 1850-01 and 1851"] {
        assert!(is_genealogical_date(ok), "{} should be accepted", ok);
    }
    for bad in ["", "18500", "1850-13", "1850-02-31", "around 1850", "1850 or so"] {
        assert!(!is_genealogical_date(bad), "{} should be rejected", bad);
    }
}

#[test]
fn integers_only_accept_lossless_inputs() {
    let gender = |raw: RawValue| sanitize_value(ObjectKind::Person, "gender", &raw);
    assert_eq!(gender(RawValue::Int(1)).expect("int"), ColumnValue::Integer(1));
    assert_eq!(gender(RawValue::Float(2.0)).expect("integral float"), ColumnValue::Integer(2));
    assert_eq!(gender(" 2".into()).ok(), None);
    assert_eq!(gender("2".into()).expect("numeric text"), ColumnValue::Integer(2));
    assert_eq!(gender(RawValue::Bool(true)).expect("bool"), ColumnValue::Integer(1));
    // lossy or out of range
    assert!(gender(RawValue::Float(1.5)).is_err());
    assert!(gender(RawValue::Int(3)).is_err());
    assert!(gender(RawValue::Float(f64::NAN)).is_err());
}

#[test]
fn floats_and_coordinates() {
    let latitude = |raw: RawValue| sanitize_value(ObjectKind::Place, "latitude", &raw);
    assert_eq!(latitude(RawValue::Int(45)).expect("int"), ColumnValue::Real(45.0));
    assert_eq!(latitude("-33.86".into()).expect("text"), ColumnValue::Real(-33.86));
    assert!(latitude(RawValue::Float(91.0)).is_err());
    assert!(latitude(RawValue::Float(f64::INFINITY)).is_err());
    assert!(latitude("north".into()).is_err());
    assert!(latitude(RawValue::Int((1 << 53) + 1)).is_err());
}

#[test]
fn booleans_timestamps_and_documents() {
    let private = |raw: RawValue| sanitize_value(ObjectKind::Note, "private", &raw);
    assert_eq!(private("TRUE".into()).expect("text"), ColumnValue::Boolean(true));
    assert_eq!(private(RawValue::Int(0)).expect("int"), ColumnValue::Boolean(false));
    assert!(private(RawValue::Int(2)).is_err());
    assert!(private("yes".into()).is_err());

    let change = |raw: RawValue| sanitize_value(ObjectKind::Event, "change", &raw);
    let moment = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().expect("time");
    assert_eq!(change(moment.into()).expect("timestamp"), ColumnValue::Integer(moment.timestamp()));
    assert_eq!(
        change("2024-01-02T03:04:05Z".into()).expect("rfc3339"),
        ColumnValue::Integer(moment.timestamp())
    );
    assert!(change(RawValue::Int(-1)).is_err());
    assert!(change("yesterday".into()).is_err());

    let document = |raw: RawValue| sanitize_value(ObjectKind::Family, "json_data", &raw);
    assert_eq!(
        document(json!({"child_ref_list": []}).into()).expect("json"),
        ColumnValue::Text("{\"child_ref_list\":[]}".into())
    );
    assert_eq!(
        document(RawValue::List(vec![RawValue::Int(1), RawValue::Text("a".into())])).expect("list"),
        ColumnValue::Text("[1,\"a\"]".into())
    );
    assert!(document("not json".into()).is_err());
    assert!(document(json!(42).into()).is_err());
    assert!(document(RawValue::List(vec![RawValue::Bytes(vec![1])])).is_err());
}

#[test]
fn text_constraints() {
    assert!(sanitize_value(ObjectKind::Person, "surname", &RawValue::Bytes(vec![0x41])).is_err());
    assert!(sanitize_value(ObjectKind::Person, "surname", &"Sm\0ith".into()).is_err());
    assert_eq!(
        sanitize_value(ObjectKind::Media, "checksum", &RawValue::Int(42)).expect("int as text"),
        ColumnValue::Text("42".into())
    );
    assert!(sanitize_value(ObjectKind::Tag, "color", &"#00ff00".into()).is_ok());
    assert!(sanitize_value(ObjectKind::Tag, "color", &"green".into()).is_err());
    assert!(sanitize_value(ObjectKind::Tag, "priority", &RawValue::Int(-1)).is_err());
}

#[test]
fn unknown_fields_are_rejected_not_ignored() {
    let result = sanitize_value(ObjectKind::Person, "nickname", &"Bob".into());
    assert_eq!(rejected_field(result), (ObjectKind::Person, "nickname".to_string()));
    // tags have no gramps id
    assert!(sanitize_value(ObjectKind::Tag, "gramps_id", &"T0001".into()).is_err());
}

#[test]
fn every_kind_has_a_non_nullable_handle_first() {
    for kind in ObjectKind::ALL {
        let first = rules(kind).first().expect("rules");
        assert_eq!(first.field, "handle");
        assert!(!first.nullable);
        assert!(sanitize_value(kind, "handle", &RawValue::Null).is_err());
        assert!(sanitize_value(kind, "handle", &"  ".into()).is_err());
    }
}

#[test]
fn records_are_all_or_nothing() {
    let person = ObjectData::new(ObjectKind::Person, "H1")
        .with("given_name", "Anna")
        .with("surname", "Smith")
        .with("gender", 1)
        .with("birth_date", "abt 1850");
    let sanitized = sanitize_record(&person).expect("valid person");
    assert_eq!(sanitized.columns().len(), 5);
    assert_eq!(sanitized.get("handle"), Some(&ColumnValue::Text("H1".into())));
    assert_eq!(sanitized.params().len(), 5);
    assert_eq!(
        sanitized.upsert_sql(),
        "INSERT INTO person (handle, given_name, surname, gender, birth_date) \
         VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(handle) DO UPDATE SET \
         given_name = excluded.given_name, surname = excluded.surname, \
         gender = excluded.gender, birth_date = excluded.birth_date"
    );

    let bad = person.clone().with("death_date", RawValue::Float(1900.5));
    assert_eq!(
        rejected_field(sanitize_record(&bad)),
        (ObjectKind::Person, "death_date".to_string())
    );

    let twice = person.with("surname", "Smyth");
    assert!(sanitize_record(&twice).is_err());

    let handle_only = sanitize_record(&ObjectData::new(ObjectKind::Tag, "T1")).expect("handle only");
    assert!(handle_only.upsert_sql().ends_with("ON CONFLICT(handle) DO NOTHING"));

    assert!(sanitize_record(&ObjectData::new(ObjectKind::Place, "")).is_err());
}

#[test]
fn set_replaces_a_field() {
    let mut person = ObjectData::new(ObjectKind::Person, "H2").with("surname", "Smyth");
    person.set("surname", "Smith");
    let sanitized = sanitize_record(&person).expect("valid");
    assert_eq!(sanitized.get("surname"), Some(&ColumnValue::Text("Smith".into())));
}
