//! Parsed dashboard pages and the small selector language used to find
//! nodes in them.
//!
//! Pages are parsed with `html5ever` into an `RcDom` tree. The live
//! document and every freshly fetched page are [`Document`]s; a patch moves
//! a [`Node`] out of the fresh document and splices it into the live one in
//! place of the node it replaces.
//!
//! Supported selectors are deliberately narrow: compound selectors built
//! from a tag name, `#id`, `.class`, `[attr]` and `[attr=value]`, joined by
//! whitespace as descendant combinators. Attribute values containing
//! whitespace are not supported.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, Attribute, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::error::{RefreshError, Result};

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

/// A parsed selector, e.g. `.log-container`, `#reply-form`,
/// `meta[name="csrf-token"]` or `.chat-log .message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    parts: Vec<Compound>,
}

impl Selector {
    /// Parse `source` into a selector.
    ///
    /// # Errors
    /// Returns [`RefreshError::Selector`] for empty input, empty class/id
    /// names, unclosed attribute brackets or stray characters.
    pub fn parse(source: &str) -> Result<Self> {
        let parts = source
            .split_whitespace()
            .map(|chunk| parse_compound(chunk, source))
            .collect::<Result<Vec<_>>>()?;
        if parts.is_empty() {
            return Err(invalid(source, "empty selector"));
        }
        Ok(Selector {
            source: source.trim().to_string(),
            parts,
        })
    }

    /// The selector text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn matches(&self, handle: &Handle) -> bool {
        let Some((last, ancestors)) = self.parts.split_last() else {
            return false;
        };
        if !compound_matches(last, handle) {
            return false;
        }
        // Descendant combinators: match each remaining compound against the
        // nearest qualifying ancestor, walking outwards.
        let mut remaining = ancestors;
        let mut cursor = parent_of(handle);
        while let Some((wanted, rest)) = remaining.split_last() {
            loop {
                let Some(node) = cursor else {
                    return false;
                };
                cursor = parent_of(&node);
                if compound_matches(wanted, &node) {
                    break;
                }
            }
            remaining = rest;
        }
        true
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Selector {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self> {
        Selector::parse(s)
    }
}

fn invalid(source: &str, detail: &str) -> RefreshError {
    RefreshError::Selector {
        selector: source.to_string(),
        detail: detail.to_string(),
    }
}

fn is_delimiter(ch: char) -> bool {
    matches!(ch, '.' | '#' | '[')
}

fn parse_compound(chunk: &str, source: &str) -> Result<Compound> {
    let mut compound = Compound::default();

    let tag_len = chunk.find(is_delimiter).unwrap_or(chunk.len());
    let tag = &chunk[..tag_len];
    if !tag.is_empty() && tag != "*" {
        if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid(source, "bad tag name"));
        }
        compound.tag = Some(tag.to_ascii_lowercase());
    }

    let mut rest = &chunk[tag_len..];
    while let Some(first) = rest.chars().next() {
        match first {
            '.' | '#' => {
                let body = &rest[1..];
                let end = body.find(is_delimiter).unwrap_or(body.len());
                let name = &body[..end];
                if name.is_empty() {
                    return Err(invalid(source, "empty class or id"));
                }
                if first == '.' {
                    compound.classes.push(name.to_string());
                } else {
                    compound.id = Some(name.to_string());
                }
                rest = &body[end..];
            }
            '[' => {
                let close = rest
                    .find(']')
                    .ok_or_else(|| invalid(source, "unclosed '['"))?;
                let inner = &rest[1..close];
                let (key, value) = match inner.split_once('=') {
                    Some((k, v)) => {
                        let v = v.trim().trim_matches(|c| c == '"' || c == '\'');
                        (k.trim(), Some(v.to_string()))
                    }
                    None => (inner.trim(), None),
                };
                if key.is_empty() {
                    return Err(invalid(source, "empty attribute name"));
                }
                compound.attrs.push((key.to_string(), value));
                rest = &rest[close + 1..];
            }
            _ => return Err(invalid(source, "unexpected character")),
        }
    }

    Ok(compound)
}

fn compound_matches(compound: &Compound, handle: &Handle) -> bool {
    let NodeData::Element { name, attrs, .. } = &handle.data else {
        return false;
    };
    if let Some(tag) = &compound.tag {
        if &*name.local != tag.as_str() {
            return false;
        }
    }

    let attrs = attrs.borrow();
    let get = |key: &str| {
        attrs
            .iter()
            .find(|a| &*a.name.local == key)
            .map(|a| &*a.value)
    };

    if let Some(id) = &compound.id {
        if get("id") != Some(id.as_str()) {
            return false;
        }
    }
    for class in &compound.classes {
        let has = get("class")
            .map(|v| v.split_whitespace().any(|c| c == class))
            .unwrap_or(false);
        if !has {
            return false;
        }
    }
    for (key, wanted) in &compound.attrs {
        match (get(key), wanted) {
            (None, _) => return false,
            (Some(actual), Some(wanted)) if actual != wanted => return false,
            _ => {}
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn parent_of(handle: &Handle) -> Option<Handle> {
    let weak = handle.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    handle.parent.set(weak);
    parent
}

fn detach(handle: &Handle) {
    if let Some(parent) = parent_of(handle) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, handle));
    }
    handle.parent.set(None);
}

/// Pre-order walk of `root` and everything below it.
fn walk(root: &Handle) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        for child in node.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
        out.push(node);
    }
    out
}

fn collect_text(handle: &Handle, out: &mut String) {
    if let NodeData::Text { contents } = &handle.data {
        out.push_str(&contents.borrow());
    }
    for child in handle.children.borrow().iter() {
        collect_text(child, out);
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A handle to one node of a [`Document`].
///
/// Cloning a `Node` clones the handle, not the subtree.
#[derive(Clone)]
pub struct Node {
    handle: Handle,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("tag", &self.tag_name())
            .field("id", &self.attr("id"))
            .finish()
    }
}

impl Node {
    /// Lower-case tag name, or `None` for non-element nodes.
    pub fn tag_name(&self) -> Option<String> {
        match &self.handle.data {
            NodeData::Element { name, .. } => Some(name.local.to_string()),
            _ => None,
        }
    }

    pub fn attr(&self, key: &str) -> Option<String> {
        let NodeData::Element { attrs, .. } = &self.handle.data else {
            return None;
        };
        let attrs = attrs.borrow();
        attrs
            .iter()
            .find(|a| &*a.name.local == key)
            .map(|a| a.value.to_string())
    }

    /// Set (or add) an attribute. No-op on non-element nodes.
    pub fn set_attr(&self, key: &str, value: &str) {
        let NodeData::Element { attrs, .. } = &self.handle.data else {
            return;
        };
        let mut attrs = attrs.borrow_mut();
        match attrs.iter_mut().find(|a| &*a.name.local == key) {
            Some(existing) => existing.value = StrTendril::from_slice(value),
            None => attrs.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(key)),
                value: StrTendril::from_slice(value),
            }),
        }
    }

    pub fn classes(&self) -> Vec<String> {
        self.attr("class")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Concatenated text of every text node below this one.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.handle, &mut out);
        out
    }

    /// First descendant (excluding `self`) matching `selector`, in
    /// document order.
    pub fn select_first(&self, selector: &Selector) -> Option<Node> {
        walk(&self.handle)
            .into_iter()
            .skip(1)
            .find(|h| selector.matches(h))
            .map(|handle| Node { handle })
    }

    /// Every descendant (excluding `self`) matching `selector`, in
    /// document order.
    pub fn select_all(&self, selector: &Selector) -> Vec<Node> {
        walk(&self.handle)
            .into_iter()
            .skip(1)
            .filter(|h| selector.matches(h))
            .map(|handle| Node { handle })
            .collect()
    }

    /// Replace this node, in its parent, with `replacement`.
    ///
    /// `replacement` is first detached from wherever it currently lives, so
    /// a node taken from another document is adopted by this one. Returns
    /// `false` without touching either tree when `self` has no parent.
    pub fn replace_with(&self, replacement: &Node) -> bool {
        let Some(parent) = parent_of(&self.handle) else {
            return false;
        };
        if !parent
            .children
            .borrow()
            .iter()
            .any(|c| Rc::ptr_eq(c, &self.handle))
        {
            return false;
        }

        detach(&replacement.handle);

        let mut children = parent.children.borrow_mut();
        let Some(index) = children.iter().position(|c| Rc::ptr_eq(c, &self.handle)) else {
            return false;
        };
        replacement.handle.parent.set(Some(Rc::downgrade(&parent)));
        let old = std::mem::replace(&mut children[index], replacement.handle.clone());
        old.parent.set(None);
        true
    }

    /// The value a form control would submit: the `value` attribute for
    /// inputs, the text content for textareas.
    pub fn form_value(&self) -> String {
        match self.tag_name().as_deref() {
            Some("textarea") => self.text(),
            _ => self.attr("value").unwrap_or_default(),
        }
    }

    pub fn set_form_value(&self, value: &str) {
        match self.tag_name().as_deref() {
            Some("textarea") => {
                let mut children = self.handle.children.borrow_mut();
                for child in children.drain(..) {
                    child.parent.set(None);
                }
                if !value.is_empty() {
                    let text = markup5ever_rcdom::Node::new(NodeData::Text {
                        contents: RefCell::new(StrTendril::from_slice(value)),
                    });
                    text.parent.set(Some(Rc::downgrade(&self.handle)));
                    children.push(text);
                }
            }
            _ => self.set_attr("value", value),
        }
    }

    /// True when both handles point at the same tree node.
    pub fn same_node(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.handle, &other.handle)
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A parsed HTML page.
pub struct Document {
    dom: RcDom,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document").finish_non_exhaustive()
    }
}

impl Document {
    /// Parse a full HTML page. html5ever recovers from malformed markup,
    /// so this never fails.
    pub fn parse(html: &str) -> Self {
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
        Document { dom }
    }

    /// The document node itself.
    pub fn root(&self) -> Node {
        Node {
            handle: self.dom.document.clone(),
        }
    }

    pub fn select_first(&self, selector: &Selector) -> Option<Node> {
        self.root().select_first(selector)
    }

    pub fn select_all(&self, selector: &Selector) -> Vec<Node> {
        self.root().select_all(selector)
    }

    /// The first element whose `id` attribute equals `id` exactly.
    pub fn element_by_id(&self, id: &str) -> Option<Node> {
        walk(&self.dom.document)
            .into_iter()
            .map(|handle| Node { handle })
            .find(|node| node.attr("id").as_deref() == Some(id))
    }

    /// Number of elements matching `selector`.
    pub fn count(&self, selector: &Selector) -> usize {
        walk(&self.dom.document)
            .iter()
            .filter(|h| selector.matches(h))
            .count()
    }
}
