//! Integration tests for xmltables
//!
//! These tests verify end-to-end behavior with realistic scenarios including
//! file-based schemas, file-based XML input, and large documents.

use std::fs::File;
use std::io::{BufReader, Write};

use arrow::array::{Array, Float64Array, StringArray, UInt32Array};
use tempfile::NamedTempFile;
use xmltables::{Schema, parse_xml};

/// Helper macro for asserting array values
macro_rules! assert_array_values {
    ($batch:expr, $column_name:expr, $expected_values:expr, $array_type:ty) => {
        let array = $batch
            .column_by_name($column_name)
            .unwrap()
            .as_any()
            .downcast_ref::<$array_type>()
            .unwrap();
        assert_eq!(
            array.len(),
            $expected_values.len(),
            "Array length mismatch for column '{}'",
            $column_name
        );
        for (i, expected) in $expected_values.iter().enumerate() {
            assert_eq!(
                array.value(i),
                *expected,
                "Value at index {} mismatch for column '{}'",
                i,
                $column_name
            );
        }
    };
}

const ITEMS_SCHEMA_YAML: &str = r#"
tables:
  - name: items
    row_path: item
    columns:
      - name: id
        source: id
        data_type: UInt32
      - name: name
        source: name
        data_type: Utf8
"#;

#[test]
fn test_parse_from_files() {
    let mut xml_file = NamedTempFile::new().unwrap();
    write!(
        xml_file,
        r#"<?xml version="1.0" encoding="UTF-8"?>
        <data>
            <item><id>1</id><name>First</name></item>
            <item><id>2</id><name>Second</name></item>
            <item><id>3</id><name>Third</name></item>
        </data>"#
    )
    .unwrap();

    let mut schema_file = NamedTempFile::new().unwrap();
    write!(schema_file, "{}", ITEMS_SCHEMA_YAML).unwrap();
    let schema = Schema::from_yaml_file(schema_file.path()).unwrap();

    let file = File::open(xml_file.path()).unwrap();
    let batches = parse_xml(BufReader::new(file), &schema).unwrap();
    let batch = batches.get("items").unwrap();

    assert_eq!(batch.num_rows(), 3);
    assert_array_values!(batch, "<item>", &[0, 1, 2], UInt32Array);
    assert_array_values!(batch, "id", &[1, 2, 3], UInt32Array);
    assert_array_values!(batch, "name", &["First", "Second", "Third"], StringArray);
}

#[test]
fn test_large_xml_file_1000_rows() {
    let mut xml_file = NamedTempFile::new().unwrap();
    writeln!(xml_file, r#"<?xml version="1.0"?><data>"#).unwrap();
    for i in 0..1000 {
        writeln!(
            xml_file,
            r#"<item><id>{}</id><value>{:.2}</value><name>Item{}</name></item>"#,
            i,
            i as f64 * 0.01,
            i
        )
        .unwrap();
    }
    writeln!(xml_file, "</data>").unwrap();

    let schema = Schema::from_yaml_str(
        r#"
        tables:
          - name: items
            row_path: item
            columns:
              - name: id
                source: id
                data_type: UInt32
              - name: value
                source: value
                data_type: Float64
              - name: name
                source: name
                data_type: Utf8
        "#,
    )
    .unwrap();

    let file = File::open(xml_file.path()).unwrap();
    let batches = parse_xml(BufReader::new(file), &schema).unwrap();
    let batch = batches.get("items").unwrap();

    assert_eq!(batch.num_rows(), 1000);
    let ids = batch
        .column_by_name("id")
        .unwrap()
        .as_any()
        .downcast_ref::<UInt32Array>()
        .unwrap();
    let indices = batch
        .column_by_name("<item>")
        .unwrap()
        .as_any()
        .downcast_ref::<UInt32Array>()
        .unwrap();
    let values = batch
        .column_by_name("value")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    for i in 0..1000usize {
        assert_eq!(ids.value(i), i as u32);
        assert_eq!(indices.value(i), i as u32);
        assert!((values.value(i) - i as f64 * 0.01).abs() < 1e-9);
    }
}

#[test]
fn test_schema_written_then_reloaded_parses_identically() {
    let schema = Schema::from_yaml_str(ITEMS_SCHEMA_YAML).unwrap();
    let temp = NamedTempFile::new().unwrap();
    schema.to_yaml_file(temp.path()).unwrap();
    let reloaded = Schema::from_yaml_file(temp.path()).unwrap();

    let xml = r#"<data><item><id>7</id><name>Only</name></item></data>"#;
    let a = parse_xml(xml.as_bytes(), &schema).unwrap();
    let b = parse_xml(xml.as_bytes(), &reloaded).unwrap();
    assert_eq!(a, b);
}
