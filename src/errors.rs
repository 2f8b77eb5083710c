use std::str::Utf8Error;

use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    /// Errors from the QuickXML crate during XML tokenization
    #[from]
    XmlParsing(quick_xml::Error),
    /// Errors from QuickXML attribute decoding
    #[from]
    XmlAttr(quick_xml::events::attributes::AttrError),
    /// Errors from the Serde YAML crate during schema parsing
    #[from]
    Yaml(serde_yaml::Error),
    /// Standard I/O errors
    #[from]
    Io(std::io::Error),
    /// Errors from the arrow crate during batch assembly
    #[from]
    Arrow(arrow::error::ArrowError),
    /// Errors during UTF-8 string conversion
    #[from]
    Utf8(Utf8Error),
    /// Duplicate table or column names detected before traversal starts
    SchemaInconsistency(String),
    /// A source locator string could not be parsed
    InvalidLocator(String),
    /// Scale/offset requested for a column type that does not support it
    UnsupportedConversion(String),
    /// A non-nullable column's source location was absent for a row
    MissingRequiredValue {
        table: String,
        column: String,
        row: usize,
    },
    /// Text at a source location failed to parse as the declared type
    Conversion {
        table: String,
        column: String,
        row: usize,
        value: String,
        target: &'static str,
    },
    /// A row did not line up across every column of a table
    StructuralMismatch { table: String, detail: String },
    /// The input contained no root element but the schema declares tables
    EmptyDocument,
}
