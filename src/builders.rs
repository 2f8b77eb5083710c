use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{
    ArrayBuilder, ArrayRef, ArrowNumericType, AsArray, BooleanBuilder, Float32Array,
    Float32Builder, Float64Array, Float64Builder, PrimitiveBuilder, RecordBatch,
    RecordBatchOptions, StringBuilder, UInt32Builder,
};
use arrow::compute::kernels::numeric;
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Schema as ArrowSchema, UInt32Type,
};
use string_cache::DefaultAtom as Atom;

use crate::errors::{Error, Result};
use crate::schema::{ColumnSpec, ScalarType, TableSpec};

/// Accumulates values for one declared column and finalizes them into an
/// immutable Arrow array.
///
/// The underlying builder is chosen once from the declared [`ScalarType`] and
/// never changes. All values arrive as text; conversion failures and
/// nullability violations carry the table, column, and row they occurred at.
pub(crate) struct ColumnBuilder {
    table: String,
    spec: ColumnSpec,
    field: Field,
    array_builder: Box<dyn ArrayBuilder>,
}

/// Parses text into a numeric builder. Returns the target type name on failure
/// so the caller can attach row context.
fn append_numeric<T>(
    builder: &mut Box<dyn ArrayBuilder>,
    text: &str,
) -> core::result::Result<(), &'static str>
where
    T: ArrowNumericType,
    T::Native: FromStr,
{
    let builder = builder
        .as_any_mut()
        .downcast_mut::<PrimitiveBuilder<T>>()
        .expect("Builder type mismatch. This is a bug in ColumnBuilder::new.");
    match text.parse::<T::Native>() {
        Ok(value) => {
            builder.append_value(value);
            Ok(())
        }
        Err(_) => Err(std::any::type_name::<T::Native>()),
    }
}

impl ColumnBuilder {
    pub fn new(table: &str, spec: &ColumnSpec) -> Self {
        let array_builder: Box<dyn ArrayBuilder> = match spec.data_type {
            ScalarType::Boolean => Box::new(BooleanBuilder::default()),
            ScalarType::Float32 => Box::new(Float32Builder::default()),
            ScalarType::Float64 => Box::new(Float64Builder::default()),
            ScalarType::UInt32 => Box::new(UInt32Builder::default()),
            ScalarType::Timestamp | ScalarType::Utf8 => Box::new(StringBuilder::default()),
        };
        let field = Field::new(&spec.name, spec.data_type.as_arrow_type(), spec.nullable);
        Self {
            table: table.to_string(),
            spec: spec.clone(),
            field,
            array_builder,
        }
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn len(&self) -> usize {
        self.array_builder.len()
    }

    /// Appends one cell. `None` means the source was absent: nullable columns
    /// get a null, non-nullable columns fail the parse. `Some("")` is a
    /// present value (empty attributes occur in the wild); it stores an empty
    /// string for text columns and fails conversion for typed ones.
    pub fn append(&mut self, row: usize, value: Option<&str>) -> Result<()> {
        let Some(text) = value else {
            if !self.spec.nullable {
                return Err(Error::MissingRequiredValue {
                    table: self.table.clone(),
                    column: self.spec.name.clone(),
                    row,
                });
            }
            self.append_null();
            return Ok(());
        };

        let parsed = match self.spec.data_type {
            ScalarType::Timestamp | ScalarType::Utf8 => {
                self.array_builder
                    .as_any_mut()
                    .downcast_mut::<StringBuilder>()
                    .expect("StringBuilder")
                    .append_value(text);
                Ok(())
            }
            ScalarType::UInt32 => append_numeric::<UInt32Type>(&mut self.array_builder, text),
            ScalarType::Float32 => append_numeric::<Float32Type>(&mut self.array_builder, text),
            ScalarType::Float64 => append_numeric::<Float64Type>(&mut self.array_builder, text),
            ScalarType::Boolean => {
                let builder = self
                    .array_builder
                    .as_any_mut()
                    .downcast_mut::<BooleanBuilder>()
                    .expect("BooleanBuilder");
                match text {
                    "true" | "1" => {
                        builder.append_value(true);
                        Ok(())
                    }
                    "false" | "0" => {
                        builder.append_value(false);
                        Ok(())
                    }
                    _ => Err("bool"),
                }
            }
        };
        parsed.map_err(|target| Error::Conversion {
            table: self.table.clone(),
            column: self.spec.name.clone(),
            row,
            value: text.to_string(),
            target,
        })
    }

    fn append_null(&mut self) {
        match self.spec.data_type {
            ScalarType::Boolean => self
                .array_builder
                .as_any_mut()
                .downcast_mut::<BooleanBuilder>()
                .expect("BooleanBuilder")
                .append_null(),
            ScalarType::Float32 => self
                .array_builder
                .as_any_mut()
                .downcast_mut::<Float32Builder>()
                .expect("Float32Builder")
                .append_null(),
            ScalarType::Float64 => self
                .array_builder
                .as_any_mut()
                .downcast_mut::<Float64Builder>()
                .expect("Float64Builder")
                .append_null(),
            ScalarType::UInt32 => self
                .array_builder
                .as_any_mut()
                .downcast_mut::<UInt32Builder>()
                .expect("UInt32Builder")
                .append_null(),
            ScalarType::Timestamp | ScalarType::Utf8 => self
                .array_builder
                .as_any_mut()
                .downcast_mut::<StringBuilder>()
                .expect("StringBuilder")
                .append_null(),
        }
    }

    /// Finalizes the column, applying scale then offset for float columns.
    pub fn finish(&mut self) -> Result<ArrayRef> {
        let mut array = self.array_builder.finish();
        if let Some(scale) = self.spec.scale {
            array = match self.field.data_type() {
                DataType::Float32 => numeric::mul(
                    array.as_primitive::<Float32Type>(),
                    &Float32Array::new_scalar(scale as f32),
                )?,
                DataType::Float64 => numeric::mul(
                    array.as_primitive::<Float64Type>(),
                    &Float64Array::new_scalar(scale),
                )?,
                other => {
                    return Err(Error::UnsupportedConversion(format!(
                        "Scaling is only supported for Float32 and Float64, but found {:?}",
                        other
                    )));
                }
            };
        }
        if let Some(offset) = self.spec.offset {
            array = match self.field.data_type() {
                DataType::Float32 => numeric::add(
                    array.as_primitive::<Float32Type>(),
                    &Float32Array::new_scalar(offset as f32),
                )?,
                DataType::Float64 => numeric::add(
                    array.as_primitive::<Float64Type>(),
                    &Float64Array::new_scalar(offset),
                )?,
                other => {
                    return Err(Error::UnsupportedConversion(format!(
                        "Offset is only supported for Float32 and Float64, but found {:?}",
                        other
                    )));
                }
            };
        }
        Ok(array)
    }
}

/// Builds the record batch for one declared table: the synthesized index
/// columns followed by the declared columns, appended one whole row at a time.
pub(crate) struct TableBuilder {
    name: String,
    level_tags: Vec<Atom>,
    index_builders: Vec<UInt32Builder>,
    columns: Vec<ColumnBuilder>,
    rows: usize,
}

impl TableBuilder {
    /// Creates a builder for `spec`, nested under the given ancestor levels.
    /// One index column is created per ancestor level plus one for the table's
    /// own repeating element, ancestor-to-self order.
    pub fn new(spec: &TableSpec, ancestor_tags: &[Atom]) -> Self {
        let mut level_tags = ancestor_tags.to_vec();
        if let Some(tag) = spec.level_tag() {
            level_tags.push(tag);
        }
        let mut index_builders = Vec::with_capacity(level_tags.len());
        index_builders.resize_with(level_tags.len(), UInt32Builder::default);
        let columns = spec
            .columns
            .iter()
            .map(|c| ColumnBuilder::new(&spec.name, c))
            .collect();
        Self {
            name: spec.name.clone(),
            level_tags,
            index_builders,
            columns,
            rows: 0,
        }
    }

    /// Number of rows appended so far. Doubles as the next row's own ordinal.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Opens a new row by writing the index columns eagerly.
    pub fn begin_row(&mut self, indices: &[u32]) -> Result<()> {
        if indices.len() != self.index_builders.len() {
            return Err(Error::StructuralMismatch {
                table: self.name.clone(),
                detail: format!(
                    "Row opened with {} index values but table has {} nesting levels",
                    indices.len(),
                    self.index_builders.len()
                ),
            });
        }
        for (index, index_builder) in indices.iter().zip(&mut self.index_builders) {
            index_builder.append_value(*index);
        }
        Ok(())
    }

    /// Supplies the value (or absence) for one declared column of the open row.
    pub fn set(&mut self, column: usize, value: Option<&str>) -> Result<()> {
        let row = self.rows;
        self.columns[column].append(row, value)
    }

    /// Closes the open row, asserting that every column received exactly one
    /// value. Row-count parity across all columns is the rectangularity
    /// guarantee for the finished batch.
    pub fn end_row(&mut self) -> Result<()> {
        let expected = self.rows + 1;
        for index_builder in &self.index_builders {
            if index_builder.len() != expected {
                return Err(Error::StructuralMismatch {
                    table: self.name.clone(),
                    detail: format!(
                        "Index column has {} values after row {}",
                        index_builder.len(),
                        self.rows
                    ),
                });
            }
        }
        for column in &self.columns {
            if column.len() != expected {
                return Err(Error::StructuralMismatch {
                    table: self.name.clone(),
                    detail: format!(
                        "Column '{}' has {} values after row {}",
                        column.field().name(),
                        column.len(),
                        self.rows
                    ),
                });
            }
        }
        self.rows = expected;
        Ok(())
    }

    /// Finalizes all columns into a record batch.
    pub fn finish(&mut self) -> Result<RecordBatch> {
        let num_arrays = self.index_builders.len() + self.columns.len();
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(num_arrays);
        let mut fields: Vec<Field> = Vec::with_capacity(num_arrays);
        for (tag, index_builder) in self.level_tags.iter().zip(&mut self.index_builders) {
            arrays.push(Arc::new(index_builder.finish()));
            fields.push(Field::new(format!("<{}>", tag), DataType::UInt32, false));
        }
        for column in &mut self.columns {
            let array = column.finish()?;
            arrays.push(array);
            fields.push(column.field().clone());
        }
        let schema = Arc::new(ArrowSchema::new(fields));
        let options = RecordBatchOptions::new().with_row_count(Some(self.rows));
        let batch = RecordBatch::try_new_with_options(schema, arrays, &options).map_err(|e| {
            arrow::error::ArrowError::InvalidArgumentError(format!(
                "Failed to create record batch for table '{}': {}",
                self.name, e
            ))
        })?;
        Ok(batch)
    }
}
