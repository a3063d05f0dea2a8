//! End-to-end behaviour of `BinaryTable` through the public API.

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;
use serde_json::json;

use vtab_core::{
    BinaryTable, ColumnDataType, ColumnInfo, FieldCodec, OffsetCache, PinState, RowData,
    RowIndexCatalog, Value,
};

fn columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("Label", 0, ColumnDataType::Text),
        ColumnInfo::new("State", 1, ColumnDataType::PinStateId),
        ColumnInfo::new("Count", 2, ColumnDataType::Integer),
    ]
}

fn open(dir: &TempDir, columns: Vec<ColumnInfo>) -> BinaryTable {
    BinaryTable::new(
        dir.path().join("pattern.vbin"),
        1,
        columns,
        1,
        RowIndexCatalog::open(dir.path().join("catalog.db")).unwrap(),
        Arc::new(OffsetCache::default()),
    )
    .unwrap()
}

fn label_state_count(label: &str, state: &str, count: i64) -> RowData {
    vec![Value::from(label), Value::from(state), Value::Integer(count)]
}

/// Two rows written, one cell updated, one row deleted.
#[test]
fn write_update_delete_scenario() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir, columns());

    table
        .write_all(&[
            label_state_count("A", "1", 5),
            label_state_count("BB", "X", -3),
        ])
        .unwrap();

    let rows = table.read_all().unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::from("A"), Value::Pin(PinState::One), Value::Integer(5)],
            vec![Value::from("BB"), Value::Pin(PinState::X), Value::Integer(-3)],
        ]
    );

    table.update_one(0, "Count", Value::Integer(999)).unwrap();
    assert_eq!(table.read_one(0).unwrap()[2], Value::Integer(999));
    assert_eq!(table.read_one(1).unwrap()[2], Value::Integer(-3));

    let size = std::fs::metadata(table.path()).unwrap().len();
    let report = table.delete_rows(&[1]).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(std::fs::metadata(table.path()).unwrap().len(), size);
    assert_eq!(table.row_count().unwrap(), 1);
    assert_eq!(
        table.read_all().unwrap(),
        vec![vec![Value::from("A"), Value::Pin(PinState::One), Value::Integer(999)]]
    );
}

/// Reading back what was written gives the normalized values, for empty, single and
/// larger row sets.
#[test]
fn write_then_read_returns_normalized_rows() {
    let wide = vec![
        ColumnInfo::new("Label", 0, ColumnDataType::Text),
        ColumnInfo::new("Comment", 1, ColumnDataType::Text),
        ColumnInfo::new("Instruction", 2, ColumnDataType::InstructionId),
        ColumnInfo::new("Timeset", 3, ColumnDataType::TimesetId),
        ColumnInfo::new("Voltage", 4, ColumnDataType::Real),
        ColumnInfo::new("Enabled", 5, ColumnDataType::Boolean),
        ColumnInfo::new("CLK", 6, ColumnDataType::PinStateId),
        ColumnInfo::new("Props", 7, ColumnDataType::JsonProperties).hidden(),
    ];

    let sample = |i: i64| -> RowData {
        vec![
            Value::from(format!("label-{i}-exceeds-fifteen-bytes")),
            Value::from("ok"),
            Value::Integer(i),
            Value::from("7"),
            Value::Real(1.25 * i as f64),
            Value::Bool(i % 2 == 0),
            Value::from("h"),
            Value::Json(json!({ "row": i })),
        ]
    };

    for count in [0i64, 1, 40] {
        let dir = TempDir::new().unwrap();
        let table = open(&dir, wide.clone());
        let rows: Vec<RowData> = (0..count).map(sample).collect();
        let report = table.write_all(&rows).unwrap();
        assert_eq!(report.rows_written, count as u64);

        let expected: Vec<RowData> = rows
            .iter()
            .map(|row| {
                table
                    .layout()
                    .columns()
                    .iter()
                    .zip(row)
                    .map(|(column, value)| FieldCodec::normalize(column, value).unwrap())
                    .collect()
            })
            .collect();
        assert_eq!(table.read_all().unwrap(), expected);
        assert_eq!(table.row_count().unwrap(), count as u64);
    }
}

/// After updates every active index entry still decodes to the row it names.
#[test]
fn index_stays_consistent_across_updates() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir, columns());
    let rows: Vec<RowData> = (0..20)
        .map(|i| label_state_count(&format!("L{i}"), "0", i))
        .collect();
    table.write_all(&rows).unwrap();

    let updates: BTreeMap<u64, Value> = (0..20)
        .step_by(3)
        .map(|i| (i, Value::from(format!("U{i}"))))
        .collect();
    let report = table.update_many("Label", &updates).unwrap();
    assert_eq!(report.in_place, updates.len() as u64);

    for (position, row) in table.read_all().unwrap().iter().enumerate() {
        let expected = updates
            .get(&(position as u64))
            .cloned()
            .unwrap_or_else(|| Value::from(format!("L{position}")));
        assert_eq!(row[0], expected);
        assert_eq!(table.read_one(position as u64).unwrap(), *row);
    }
    assert!(table.inspect().unwrap().is_clean());
}

/// Tombstoned rows keep their bytes until compaction reclaims them.
#[test]
fn compaction_reclaims_deleted_rows() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir, columns());
    let rows: Vec<RowData> = (0..12)
        .map(|i| label_state_count(&format!("L{i}"), "L", i))
        .collect();
    table.write_all(&rows).unwrap();
    table.delete_range(0, 5).unwrap();

    let stats = table.garbage_stats().unwrap();
    assert!(stats.garbage_ratio() > 0.25);

    let report = table.compact(false).unwrap();
    assert!(report.performed);
    assert_eq!(report.rows, 6);
    assert!(report.bytes_reclaimed() > 0);
    assert_eq!(table.read_all().unwrap(), rows[6..].to_vec());
    assert_eq!(table.garbage_stats().unwrap().garbage_bytes, 0);
}

/// Inserting in the middle shifts later rows down by position.
#[test]
fn insert_shifts_positions() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir, columns());
    table
        .write_all(&[label_state_count("A", "0", 1), label_state_count("C", "0", 3)])
        .unwrap();
    table
        .insert_rows(1, &[label_state_count("B", "1", 2)])
        .unwrap();

    let labels: Vec<_> = table
        .read_all()
        .unwrap()
        .iter()
        .map(|row| row[0].to_display_string())
        .collect();
    assert_eq!(labels, ["A", "B", "C"]);
    assert_eq!(table.read_one(2).unwrap()[2], Value::Integer(3));
}

/// A second handle built from the same catalog and file sees the same rows.
#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let table = open(&dir, columns());
        table
            .write_all(&[label_state_count("A", "H", 1), label_state_count("B", "L", 2)])
            .unwrap();
        table.update_one(1, "State", Value::from("m")).unwrap();
    }
    let table = open(&dir, columns());
    assert_eq!(table.read_one(1).unwrap()[1], Value::Pin(PinState::M));
    assert_eq!(table.read_all().unwrap().len(), 2);
}
