//! The `xmltables` crate flattens hierarchical XML documents into Apache Arrow
//! record batches according to a declarative schema.
//!
//! A schema declares one or more tables, each rooted at a repeating XML
//! element. Repeated nested elements decompose into separate child tables
//! linked back to their parent rows by synthesized index columns, so deeply
//! nested documents come out as a set of flat, strongly typed, joinable
//! tables.
///
/// ## Key Features
///
/// * Declarative YAML schemas mapping elements and attributes to typed columns.
/// * Nested repeated elements become correlated child tables, to any depth.
/// * Strict typing with fail-fast conversion and nullability errors; a
///   malformed document never yields a partial table.
/// * Leverages the `arrow` crate for efficient in-memory data representation.
pub mod schema;

mod errors;
pub use errors::{Error, Result};

mod document;
pub use document::{XmlDocument, XmlElement};

mod builders;

mod engine;
pub use engine::parse_xml;

pub use schema::Schema;
