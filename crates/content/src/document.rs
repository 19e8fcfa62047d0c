//! Navigable document trees for benchmark and tailoring content.
//!
//! Content is parsed once with `roxmltree` and copied into an owned tree so
//! that loaded documents can outlive their source text. Queries walk the tree
//! in document order, which the profile and rule lookups depend on.

use apicollect_common::{Error, Result};
use std::path::{Path, PathBuf};

/// XCCDF 1.2 namespace.
pub const XCCDF_NS: &str = "http://checklists.nist.gov/xccdf/1.2";

/// An element with its attributes, child elements and inner text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    /// Local (unprefixed) tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this element is `local` in namespace `ns`.
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.name == local && self.namespace.as_deref() == Some(ns)
    }

    /// Value of the first attribute with this local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attribute value, or the empty string when absent.
    pub fn attr_or_empty(&self, name: &str) -> &str {
        self.attr(name).unwrap_or("")
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Concatenated text of all descendant text nodes, entities resolved.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// All descendant elements (excluding `self`) in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// Descendants matching `local` in namespace `ns`, in document order.
    pub fn find_all<'a>(&'a self, ns: &'a str, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.descendants().filter(move |e| e.is(ns, local))
    }

    /// First descendant whose `id` attribute equals `id`.
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        self.descendants().find(|e| e.attr("id") == Some(id))
    }

    fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        let attributes = node
            .attributes()
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect();

        let mut children = Vec::new();
        let mut text = String::new();
        for child in node.children() {
            if child.is_element() {
                let element = Element::from_node(child);
                text.push_str(&element.text);
                children.push(element);
            } else if child.is_text() {
                if let Some(t) = child.text() {
                    text.push_str(t);
                }
            }
        }

        Self {
            name: node.tag_name().name().to_string(),
            namespace: node.tag_name().namespace().map(str::to_string),
            attributes,
            children,
            text,
        }
    }
}

/// Pre-order iterator over an element's descendants.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// A parsed benchmark or tailoring document.
#[derive(Debug, Clone)]
pub struct ContentDocument {
    origin: PathBuf,
    root: Element,
}

impl ContentDocument {
    /// Parse XML content. `origin` is only used for error messages.
    pub fn parse(text: &str, origin: impl AsRef<Path>) -> Result<Self> {
        let origin = origin.as_ref().to_path_buf();
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options).map_err(|e| {
            Error::ContentParse {
                path: origin.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            root: Element::from_node(doc.root_element()),
            origin,
        })
    }

    /// Parse raw bytes, which must be UTF-8.
    pub fn from_bytes(bytes: &[u8], origin: impl AsRef<Path>) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::ContentParse {
            path: origin.as_ref().to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(text, origin)
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// XCCDF elements named `local` anywhere in the document, root included.
    pub fn xccdf_elements<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        std::iter::once(&self.root)
            .filter(move |e| e.is(XCCDF_NS, local))
            .chain(self.root.find_all(XCCDF_NS, local))
    }
}
