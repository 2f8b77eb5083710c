use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use arrow::datatypes::DataType;
use fxhash::FxBuildHasher;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use string_cache::DefaultAtom as Atom;

use crate::errors::{Error, Result};

/// Options controlling how the XML document tree is materialized.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ParserOptions {
    /// Whether to trim whitespace from text nodes. Defaults to false.
    #[serde(default)]
    pub trim_text: bool,
}

/// Top-level schema describing how an XML document decomposes into tables.
///
/// A schema holds a tree of [`TableSpec`]s. Each top-level spec is rooted at the
/// document element; nested specs are rooted at their parent's repeating
/// element. Parsing a document against a schema yields one Arrow record batch
/// per declared table, keyed by table name.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Schema {
    /// The top-level tables to extract from the document.
    pub tables: Vec<TableSpec>,
    /// Options for the XML tokenizer.
    #[serde(default)]
    pub parser_options: ParserOptions,
}

impl Schema {
    /// Validates the schema: unique table names, unique column names per table
    /// (including the synthesized index columns), well-formed row paths, and
    /// scale/offset restricted to float columns.
    pub fn validate(&self) -> Result<()> {
        let mut table_names: HashSet<&str, FxBuildHasher> = HashSet::default();
        for table in &self.tables {
            table.validate(&[], &mut table_names, false)?;
        }
        Ok(())
    }

    /// Reads a schema from a YAML file and validates it.
    ///
    /// # Errors
    ///
    /// * `Error::Io` if the file cannot be opened or read.
    /// * `Error::Yaml` if the YAML does not describe a schema.
    /// * Validation errors such as `Error::SchemaInconsistency`.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let schema: Schema = serde_yaml::from_reader(reader).map_err(Error::Yaml)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Parses a schema from a YAML string and validates it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let schema: Schema = serde_yaml::from_str(yaml).map_err(Error::Yaml)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Serializes the schema to a YAML file.
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self).map_err(Error::Yaml)
    }
}

/// Declares one output table: where its rows come from and what its columns are.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TableSpec {
    /// The table name, unique across the whole schema.
    pub name: String,
    /// Path of the repeating element that produces one row, relative to the
    /// enclosing scope (the document root for top-level tables, the parent's
    /// repeating element for nested tables). For example `stations/station`.
    ///
    /// A top-level table may omit this to declare a singleton table: exactly
    /// one row, resolved against the document root itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_path: Option<String>,
    /// The declared columns, in output order. Index columns are synthesized in
    /// front of these, one per nesting level.
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    /// Tables nested inside this one, scoped to each repeating element.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TableSpec>,
}

impl TableSpec {
    pub fn new(name: &str, row_path: Option<&str>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.to_string(),
            row_path: row_path.map(str::to_string),
            columns,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TableSpec>) -> Self {
        self.children = children;
        self
    }

    /// The element steps of `row_path`, or an empty slice for singleton tables.
    pub fn row_steps(&self) -> Vec<Atom> {
        self.row_path
            .as_deref()
            .map(|p| {
                p.trim_matches('/')
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(Atom::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The tag of the repeating element, used to name this level's index column.
    pub fn level_tag(&self) -> Option<Atom> {
        self.row_steps().last().cloned()
    }

    fn validate<'a>(
        &'a self,
        ancestor_tags: &[Atom],
        table_names: &mut HashSet<&'a str, FxBuildHasher>,
        nested: bool,
    ) -> Result<()> {
        if !table_names.insert(&self.name) {
            return Err(Error::SchemaInconsistency(format!(
                "Duplicate table name '{}'",
                self.name
            )));
        }
        if let Some(path) = &self.row_path {
            if path.trim_matches('/').split('/').any(|s| s.is_empty()) || self.row_steps().is_empty()
            {
                return Err(Error::InvalidLocator(format!(
                    "Row path '{}' of table '{}' is empty or has empty steps",
                    path, self.name
                )));
            }
            if self.row_steps().iter().any(|s| s.starts_with('@')) {
                return Err(Error::InvalidLocator(format!(
                    "Row path '{}' of table '{}' must address elements, not attributes",
                    path, self.name
                )));
            }
        } else if nested {
            return Err(Error::SchemaInconsistency(format!(
                "Nested table '{}' must declare a row_path",
                self.name
            )));
        }

        let mut level_tags = ancestor_tags.to_vec();
        if let Some(tag) = self.level_tag() {
            level_tags.push(tag);
        }

        let mut column_names: HashSet<String, FxBuildHasher> = HashSet::default();
        for tag in &level_tags {
            column_names.insert(format!("<{}>", tag));
        }
        for column in &self.columns {
            column.validate()?;
            if !column_names.insert(column.name.clone()) {
                return Err(Error::SchemaInconsistency(format!(
                    "Duplicate column name '{}' in table '{}'",
                    column.name, self.name
                )));
            }
        }

        for child in &self.children {
            child.validate(&level_tags, table_names, true)?;
        }
        Ok(())
    }
}

/// Declares a single output column and where its value is found in the XML.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ColumnSpec {
    /// The column name in the resulting record batch.
    pub name: String,
    /// Where the value lives, relative to the table's repeating element.
    pub source: Locator,
    /// The declared scalar type of the column.
    pub data_type: ScalarType,
    /// Whether an absent source yields a null instead of an error. Defaults to false.
    #[serde(default)]
    pub nullable: bool,
    /// Multiplier applied after parsing. Float columns only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Addend applied after parsing and scaling. Float columns only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
}

impl ColumnSpec {
    fn validate(&self) -> Result<()> {
        match self.data_type {
            ScalarType::Float32 | ScalarType::Float64 => Ok(()),
            _ => {
                if self.scale.is_some() {
                    return Err(Error::UnsupportedConversion(format!(
                        "Scaling on column '{}' is only supported for Float32 and Float64, not {:?}",
                        self.name, self.data_type
                    )));
                }
                if self.offset.is_some() {
                    return Err(Error::UnsupportedConversion(format!(
                        "Offset on column '{}' is only supported for Float32 and Float64, not {:?}",
                        self.name, self.data_type
                    )));
                }
                Ok(())
            }
        }
    }
}

/// A builder for [`ColumnSpec`], convenient when assembling schemas in code.
#[derive(Default)]
pub struct ColumnSpecBuilder {
    name: String,
    source: String,
    data_type: ScalarType,
    nullable: bool,
    scale: Option<f64>,
    offset: Option<f64>,
}

impl ColumnSpecBuilder {
    pub fn new(name: &str, source: &str, data_type: ScalarType) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            data_type,
            ..Default::default()
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn build(self) -> Result<ColumnSpec> {
        let spec = ColumnSpec {
            name: self.name,
            source: self.source.parse()?,
            data_type: self.data_type,
            nullable: self.nullable,
            scale: self.scale,
            offset: self.offset,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// A rule for finding a value relative to a table's repeating element.
///
/// Written as a string in the YAML schema:
///
/// * `.` — the element's own text content
/// * `@code` — an attribute of the element
/// * `location/lat` — the text of a nested single-occurrence child
/// * `location/@lat` — an attribute of a nested child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// The scope element's own concatenated text.
    OwnText,
    /// A child element path, optionally ending in an attribute.
    Path {
        steps: Vec<Atom>,
        attribute: Option<Atom>,
    },
}

impl Locator {
    /// Whether this locator addresses an attribute rather than element text.
    /// Attributes can legitimately carry an empty value; element text cannot.
    pub fn is_attribute(&self) -> bool {
        matches!(
            self,
            Locator::Path {
                attribute: Some(_),
                ..
            }
        )
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidLocator("Locator must not be empty".into()));
        }
        if s == "." {
            return Ok(Locator::OwnText);
        }
        let mut steps: Vec<Atom> = Vec::new();
        let mut attribute = None;
        let parts: Vec<&str> = s.split('/').collect();
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                return Err(Error::InvalidLocator(format!(
                    "Locator '{}' contains an empty step",
                    s
                )));
            }
            if let Some(name) = part.strip_prefix('@') {
                if i != parts.len() - 1 || name.is_empty() {
                    return Err(Error::InvalidLocator(format!(
                        "Attribute step must be last and non-empty in locator '{}'",
                        s
                    )));
                }
                attribute = Some(Atom::from(name));
            } else {
                steps.push(Atom::from(*part));
            }
        }
        Ok(Locator::Path { steps, attribute })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::OwnText => write!(f, "."),
            Locator::Path { steps, attribute } => {
                let mut parts: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
                if let Some(attr) = attribute {
                    parts.push(format!("@{}", attr));
                }
                write!(f, "{}", parts.join("/"))
            }
        }
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e| {
            serde::de::Error::custom(format!("invalid locator '{}': {:?}", s, e))
        })
    }
}

/// The closed set of scalar column types the engine supports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScalarType {
    Boolean,
    Float32,
    Float64,
    UInt32,
    /// A date/time passed through as its raw text. No calendar validation.
    Timestamp,
    #[default]
    Utf8,
}

impl ScalarType {
    pub(crate) fn as_arrow_type(&self) -> DataType {
        match self {
            ScalarType::Boolean => DataType::Boolean,
            ScalarType::Float32 => DataType::Float32,
            ScalarType::Float64 => DataType::Float64,
            ScalarType::UInt32 => DataType::UInt32,
            ScalarType::Timestamp | ScalarType::Utf8 => DataType::Utf8,
        }
    }
}

/// Creates a [`Schema`] from a YAML string literal, panicking on invalid input.
///
/// Intended for tests and examples where the schema is a trusted literal.
#[macro_export]
macro_rules! schema_from_yaml {
    ($yaml:expr) => {{
        match $crate::schema::Schema::from_yaml_str($yaml) {
            Ok(schema) => schema,
            Err(e) => panic!("Invalid schema: {:?}", e),
        }
    }};
}
