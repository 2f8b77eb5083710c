use std::io::BufRead;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::escape;
use quick_xml::events::Event;
use string_cache::DefaultAtom as Atom;

use crate::errors::Result;
use crate::schema::{Locator, ParserOptions};

/// A materialized XML element: tag, attributes in document order, direct
/// children in document order, and the concatenation of its own text nodes.
///
/// This is the read-only view the traversal engine walks. It deliberately
/// exposes nothing of the underlying tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    tag: Atom,
    attributes: IndexMap<Atom, String, FxBuildHasher>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    /// The element's local tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The value of an attribute, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(&Atom::from(name)).map(String::as_str)
    }

    /// Direct child elements in document order.
    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// The concatenated text content of this element's own text nodes.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resolves a locator against this element as the scope.
    ///
    /// Child path steps follow the first matching child at each level, which
    /// is the single-occurrence contract of column locators. Returns `None`
    /// when any step or the final attribute is absent.
    pub(crate) fn resolve(&self, locator: &Locator) -> Option<&str> {
        match locator {
            Locator::OwnText => Some(self.text.as_str()),
            Locator::Path { steps, attribute } => {
                let mut scope = self;
                for step in steps {
                    scope = scope.children.iter().find(|c| c.tag == *step)?;
                }
                match attribute {
                    Some(name) => scope.attributes.get(name).map(String::as_str),
                    None => Some(scope.text.as_str()),
                }
            }
        }
    }

    /// Collects every descendant reached by following `steps`, in document
    /// order. Intermediate steps may match repeatedly; all matches are walked.
    pub(crate) fn select_all<'a>(&'a self, steps: &[Atom], out: &mut Vec<&'a XmlElement>) {
        match steps.split_first() {
            None => out.push(self),
            Some((first, rest)) => {
                for child in self.children.iter().filter(|c| c.tag == *first) {
                    child.select_all(rest, out);
                }
            }
        }
    }
}

/// A whole XML document materialized as an element tree.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    root: Option<XmlElement>,
}

impl XmlDocument {
    /// Reads a document tree from a reader.
    ///
    /// Empty elements (`<tag/>`) are expanded so they appear as ordinary
    /// childless elements. Text is decoded lossily; predefined entities are
    /// resolved. With `trim_text` set, whitespace-only text nodes are dropped
    /// and surrounding whitespace is stripped.
    pub fn from_reader(reader: impl BufRead, options: &ParserOptions) -> Result<Self> {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().expand_empty_elements = true;
        if options.trim_text {
            reader.config_mut().trim_text(true);
        }

        let mut buf = Vec::with_capacity(4096);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let tag = Atom::from(std::str::from_utf8(e.local_name().into_inner())?);
                    let mut attributes: IndexMap<Atom, String, FxBuildHasher> = IndexMap::default();
                    for attribute in e.attributes() {
                        let attribute = attribute?;
                        let key =
                            Atom::from(std::str::from_utf8(attribute.key.local_name().into_inner())?);
                        let value = std::str::from_utf8(attribute.value.as_ref())?.to_string();
                        attributes.insert(key, value);
                    }
                    stack.push(XmlElement {
                        tag,
                        attributes,
                        children: Vec::new(),
                        text: String::new(),
                    });
                }
                Event::Text(e) => {
                    if let Some(current) = stack.last_mut() {
                        let text = e.into_inner();
                        current.text.push_str(&String::from_utf8_lossy(&text));
                    }
                }
                Event::GeneralRef(e) => {
                    if let Some(current) = stack.last_mut() {
                        let text = e.into_inner();
                        let text = String::from_utf8_lossy(&text);
                        current
                            .text
                            .push_str(escape::resolve_predefined_entity(&text).unwrap_or_default());
                    }
                }
                Event::End(_) => {
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => {
                                if root.is_none() {
                                    root = Some(element);
                                }
                            }
                        }
                    }
                }
                Event::Eof => break,
                _ => (),
            }
            buf.clear();
        }
        Ok(Self { root })
    }

    /// The document's root element, or `None` for input with no elements.
    pub fn root(&self) -> Option<&XmlElement> {
        self.root.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use rstest::rstest;

    fn parse(xml: &str) -> XmlDocument {
        XmlDocument::from_reader(xml.as_bytes(), &ParserOptions::default()).unwrap()
    }

    #[test]
    fn test_tree_shape() {
        let doc = parse(
            r#"<report code="r1">
                <title>Weather</title>
                <stations>
                    <station id="MS001"/>
                    <station id="MS002"/>
                </stations>
            </report>"#,
        );
        let root = doc.root().unwrap();
        assert_eq!(root.tag(), "report");
        assert_eq!(root.attribute("code"), Some("r1"));
        assert_eq!(root.attribute("missing"), None);
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.children()[0].tag(), "title");
        assert_eq!(root.children()[0].text(), "Weather");

        let stations = &root.children()[1];
        assert_eq!(stations.children().len(), 2);
        assert_eq!(stations.children()[0].attribute("id"), Some("MS001"));
        assert_eq!(stations.children()[1].attribute("id"), Some("MS002"));
    }

    #[test]
    fn test_text_with_entities() {
        let doc = parse(r#"<data><text>&lt; &gt; &amp; &quot; &apos;</text></data>"#);
        let text = doc.root().unwrap().children()[0].text().to_string();
        assert_eq!(text, "< > & \" '");
    }

    #[test]
    fn test_empty_input_has_no_root() {
        let doc = parse("");
        assert!(doc.root().is_none());
    }

    #[test]
    fn test_trim_text() {
        let xml = "<data><value>  42  </value></data>";
        let untrimmed = parse(xml);
        assert_eq!(untrimmed.root().unwrap().children()[0].text(), "  42  ");

        let trimmed = XmlDocument::from_reader(
            xml.as_bytes(),
            &ParserOptions { trim_text: true },
        )
        .unwrap();
        assert_eq!(trimmed.root().unwrap().children()[0].text(), "42");
    }

    #[test]
    fn test_malformed_input() {
        let result = XmlDocument::from_reader(
            "<data><value>123</data>".as_bytes(),
            &ParserOptions::default(),
        );
        assert!(matches!(result.unwrap_err(), Error::XmlParsing(_)));
    }

    #[rstest]
    #[case(".", Some("scope text"))]
    #[case("@id", Some("e1"))]
    #[case("@missing", None)]
    #[case("child", Some("child text"))]
    #[case("child/@attr", Some("a1"))]
    #[case("child/grand", Some("grand text"))]
    #[case("absent", None)]
    #[case("child/absent", None)]
    fn test_resolve(#[case] locator: &str, #[case] expected: Option<&str>) {
        let doc = parse(
            r#"<scope id="e1">scope text<child attr="a1">child text<grand>grand text</grand></child></scope>"#,
        );
        let locator: Locator = locator.parse().unwrap();
        assert_eq!(doc.root().unwrap().resolve(&locator), expected);
    }

    #[test]
    fn test_resolve_takes_first_matching_child() {
        let doc = parse(r#"<scope><v>first</v><v>second</v></scope>"#);
        let locator: Locator = "v".parse().unwrap();
        assert_eq!(doc.root().unwrap().resolve(&locator), Some("first"));
    }

    #[test]
    fn test_select_all_document_order() {
        let doc = parse(
            r#"<root>
                <group><item>a</item><item>b</item></group>
                <group><item>c</item></group>
            </root>"#,
        );
        let steps = vec![Atom::from("group"), Atom::from("item")];
        let mut matches = Vec::new();
        doc.root().unwrap().select_all(&steps, &mut matches);
        let texts: Vec<&str> = matches.iter().map(|e| e.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_non_utf8_text_is_lossy() {
        let xml_bytes = b"<data><value>\xC2\xC2\xFE</value></data>";
        let doc = XmlDocument::from_reader(&xml_bytes[..], &ParserOptions::default()).unwrap();
        assert_eq!(doc.root().unwrap().children()[0].text(), "\u{fffd}\u{fffd}\u{fffd}");
    }
}
