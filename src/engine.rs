use std::io::BufRead;

use arrow::array::RecordBatch;
use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use string_cache::DefaultAtom as Atom;

use crate::builders::TableBuilder;
use crate::document::{XmlDocument, XmlElement};
use crate::errors::{Error, Result};
use crate::schema::{Schema, TableSpec};

/// Parses XML data from a reader into Arrow record batches according to a schema.
///
/// The schema is re-validated defensively before traversal begins, the
/// document is materialized as an element tree, and the tree is walked
/// depth-first driven by the schema's table specs. The result maps each
/// declared table name to its finalized batch, in schema declaration order.
///
/// Any failure (malformed XML, a value that does not parse as its declared
/// type, an absent required value) aborts the whole parse; no partial tables
/// are ever returned.
///
/// # Example
///
/// ```rust
/// use xmltables::{parse_xml, schema_from_yaml};
///
/// let xml = r#"<data><item><value>123</value></item></data>"#;
/// let schema = schema_from_yaml!(
///     r#"
///     tables:
///       - name: items
///         row_path: item
///         columns:
///           - name: value
///             source: value
///             data_type: UInt32
///     "#
/// );
/// let batches = parse_xml(xml.as_bytes(), &schema).unwrap();
/// assert_eq!(batches.get("items").unwrap().num_rows(), 1);
/// ```
pub fn parse_xml(reader: impl BufRead, schema: &Schema) -> Result<IndexMap<String, RecordBatch>> {
    // The loader normally validated already; re-assert name uniqueness rather
    // than trusting a structurally inconsistent schema.
    schema.validate()?;
    let document = XmlDocument::from_reader(reader, &schema.parser_options)?;
    let mut engine = TraversalEngine::new(schema);
    match document.root() {
        Some(root) => {
            for table in &schema.tables {
                engine.build_table(table, root, &[])?;
            }
        }
        None if schema.tables.is_empty() => {}
        None => return Err(Error::EmptyDocument),
    }
    engine.finish()
}

/// Schema-directed recursive descent over the element tree.
///
/// Owns every table builder for the duration of one parse. Rows are appended
/// in document order; a table's own ordinal is its builder's running row
/// count, so index columns increase monotonically across the whole document
/// and ancestor ordinals correlate child rows to the parent row that opened
/// their scope.
struct TraversalEngine {
    table_builders: IndexMap<String, TableBuilder, FxBuildHasher>,
}

impl TraversalEngine {
    fn new(schema: &Schema) -> Self {
        let mut table_builders = IndexMap::default();
        for table in &schema.tables {
            Self::add_builders(&mut table_builders, table, &[]);
        }
        Self { table_builders }
    }

    fn add_builders(
        table_builders: &mut IndexMap<String, TableBuilder, FxBuildHasher>,
        spec: &TableSpec,
        ancestor_tags: &[Atom],
    ) {
        table_builders.insert(spec.name.clone(), TableBuilder::new(spec, ancestor_tags));
        let mut level_tags = ancestor_tags.to_vec();
        if let Some(tag) = spec.level_tag() {
            level_tags.push(tag);
        }
        for child in &spec.children {
            Self::add_builders(table_builders, child, &level_tags);
        }
    }

    fn builder_mut(&mut self, name: &str) -> Result<&mut TableBuilder> {
        self.table_builders
            .get_mut(name)
            .ok_or_else(|| Error::SchemaInconsistency(format!("No builder for table '{}'", name)))
    }

    /// Builds all rows of `spec` found within `scope`, then recurses into its
    /// child tables with each row's element as the new scope.
    fn build_table(&mut self, spec: &TableSpec, scope: &XmlElement, ancestors: &[u32]) -> Result<()> {
        let steps = spec.row_steps();
        if steps.is_empty() {
            // Singleton table: one row resolved against the scope itself.
            self.append_row(spec, scope, ancestors)?;
            for child in &spec.children {
                self.build_table(child, scope, ancestors)?;
            }
            return Ok(());
        }

        let mut matches = Vec::new();
        scope.select_all(&steps, &mut matches);
        for element in matches {
            let ordinal = self.builder_mut(&spec.name)?.rows() as u32;
            let mut indices = ancestors.to_vec();
            indices.push(ordinal);
            self.append_row(spec, element, &indices)?;
            for child in &spec.children {
                self.build_table(child, element, &indices)?;
            }
        }
        Ok(())
    }

    fn append_row(&mut self, spec: &TableSpec, element: &XmlElement, indices: &[u32]) -> Result<()> {
        let builder = self.builder_mut(&spec.name)?;
        builder.begin_row(indices)?;
        for (i, column) in spec.columns.iter().enumerate() {
            let mut value = element.resolve(&column.source);
            // An element present with empty text counts as absent; an empty
            // attribute is a present, empty value.
            if !column.source.is_attribute() {
                value = value.filter(|v| !v.is_empty());
            }
            builder.set(i, value)?;
        }
        builder.end_row()
    }

    /// Finalizes every table builder, schema declaration order, into the
    /// returned name-to-batch mapping.
    fn finish(mut self) -> Result<IndexMap<String, RecordBatch>> {
        let mut record_batches = IndexMap::new();
        for (name, table_builder) in self.table_builders.iter_mut() {
            record_batches.insert(name.clone(), table_builder.finish()?);
        }
        Ok(record_batches)
    }
}
