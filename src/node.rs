use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::{Rc, Weak};

/// An element with its lowercased tag and attribute map. An absent attribute
/// key is distinct from an empty-string value.
#[derive(Debug)]
pub struct Element {
    pub tag: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug)]
pub struct Text {
    pub text: String,
}

#[derive(Debug)]
pub enum HtmlNodeType {
    Element(Element),
    Text(Text),
}

/// A node in the document tree.
///
/// Children are owned exclusively by their parent; the parent link is a weak
/// back-reference so the tree never forms a strong cycle. `style` is filled
/// in by style resolution and rebuilt on every render.
#[derive(Debug)]
pub struct HtmlNode {
    pub node_type: HtmlNodeType,
    pub children: Vec<Rc<RefCell<HtmlNode>>>,
    pub parent: Option<Weak<RefCell<HtmlNode>>>,
    pub style: HashMap<String, String>,
    pub focused: bool,
}

impl HtmlNode {
    pub fn new_element(tag: &str, attributes: HashMap<String, String>) -> Rc<RefCell<HtmlNode>> {
        Rc::new(RefCell::new(HtmlNode {
            node_type: HtmlNodeType::Element(Element { tag: tag.to_string(), attributes }),
            children: Vec::new(),
            parent: None,
            style: HashMap::new(),
            focused: false,
        }))
    }

    pub fn new_text(text: &str) -> Rc<RefCell<HtmlNode>> {
        Rc::new(RefCell::new(HtmlNode {
            node_type: HtmlNodeType::Text(Text { text: text.to_string() }),
            children: Vec::new(),
            parent: None,
            style: HashMap::new(),
            focused: false,
        }))
    }

    /// The element tag, or `None` for text nodes.
    pub fn tag(&self) -> Option<&str> {
        match &self.node_type {
            HtmlNodeType::Element(e) => Some(&e.tag),
            HtmlNodeType::Text(_) => None,
        }
    }

    pub fn is_element(&self, tag: &str) -> bool {
        self.tag() == Some(tag)
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        match &self.node_type {
            HtmlNodeType::Element(e) => e.attributes.get(name).cloned(),
            HtmlNodeType::Text(_) => None,
        }
    }

    /// Sets an attribute, lowercasing the name. No-op on text nodes.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let HtmlNodeType::Element(e) = &mut self.node_type {
            e.attributes.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        if let HtmlNodeType::Element(e) = &mut self.node_type {
            e.attributes.remove(&name.to_ascii_lowercase());
        }
    }

    pub fn parent_node(&self) -> Option<Rc<RefCell<HtmlNode>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Flattens the subtree rooted at `node` in depth-first document order.
    pub fn tree_to_vec(node: &Rc<RefCell<HtmlNode>>) -> Vec<Rc<RefCell<HtmlNode>>> {
        let mut out = Vec::new();
        fn walk(node: &Rc<RefCell<HtmlNode>>, out: &mut Vec<Rc<RefCell<HtmlNode>>>) {
            out.push(node.clone());
            for child in node.borrow().children.iter() {
                walk(child, out);
            }
        }
        walk(node, &mut out);
        out
    }

    /// Concatenated text of every text node under `node`.
    pub fn text_content(node: &Rc<RefCell<HtmlNode>>) -> String {
        let mut out = String::new();
        for n in Self::tree_to_vec(node) {
            if let HtmlNodeType::Text(t) = &n.borrow().node_type {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&t.text);
            }
        }
        out
    }

    /// Serializes the node including its own tag (outerHTML).
    pub fn serialize(node: &Rc<RefCell<HtmlNode>>) -> String {
        let mut out = String::new();
        Self::write_node(node, &mut out);
        out
    }

    /// Serializes only the children (innerHTML).
    pub fn serialize_children(node: &Rc<RefCell<HtmlNode>>) -> String {
        let mut out = String::new();
        for child in node.borrow().children.iter() {
            Self::write_node(child, &mut out);
        }
        out
    }

    fn write_node(node: &Rc<RefCell<HtmlNode>>, out: &mut String) {
        let borrowed = node.borrow();
        match &borrowed.node_type {
            HtmlNodeType::Text(t) => out.push_str(&t.text),
            HtmlNodeType::Element(e) => {
                let _ = write!(out, "<{}", e.tag);
                let mut attrs: Vec<_> = e.attributes.iter().collect();
                attrs.sort();
                for (k, v) in attrs {
                    let _ = write!(out, " {}=\"{}\"", k, v);
                }
                out.push('>');
                for child in borrowed.children.iter() {
                    Self::write_node(child, out);
                }
                if !crate::html_parser::SELF_CLOSING_TAGS.contains(&e.tag.as_str()) {
                    let _ = write!(out, "</{}>", e.tag);
                }
            }
        }
    }

    /// Removes `node` from its parent's child list and clears the back link.
    pub fn detach(node: &Rc<RefCell<HtmlNode>>) {
        let parent = node.borrow().parent_node();
        if let Some(parent) = parent {
            parent.borrow_mut().children.retain(|c| !Rc::ptr_eq(c, node));
        }
        node.borrow_mut().parent = None;
    }

    /// Moves `child` to the end of `parent`'s children. The detach and the
    /// attach happen in one call so the tree invariants hold on return.
    pub fn append_child(parent: &Rc<RefCell<HtmlNode>>, child: &Rc<RefCell<HtmlNode>>) {
        Self::detach(child);
        child.borrow_mut().parent = Some(Rc::downgrade(parent));
        parent.borrow_mut().children.push(child.clone());
    }

    /// Inserts `child` before `reference`; appends when `reference` is not a
    /// child of `parent`.
    pub fn insert_before(
        parent: &Rc<RefCell<HtmlNode>>,
        child: &Rc<RefCell<HtmlNode>>,
        reference: Option<&Rc<RefCell<HtmlNode>>>,
    ) {
        Self::detach(child);
        child.borrow_mut().parent = Some(Rc::downgrade(parent));
        let mut parent_mut = parent.borrow_mut();
        let index = reference
            .and_then(|r| parent_mut.children.iter().position(|c| Rc::ptr_eq(c, r)))
            .unwrap_or(parent_mut.children.len());
        parent_mut.children.insert(index, child.clone());
    }

    /// Detaches `child` if it actually belongs to `parent`.
    pub fn remove_child(parent: &Rc<RefCell<HtmlNode>>, child: &Rc<RefCell<HtmlNode>>) {
        let is_child = child
            .borrow()
            .parent_node()
            .is_some_and(|p| Rc::ptr_eq(&p, parent));
        if is_child {
            Self::detach(child);
        }
    }
}
