use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::node::{HtmlNode, HtmlNodeType};

/// Tags that never take a closing tag; they attach to the open element
/// instead of being pushed onto the stack.
pub const SELF_CLOSING_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Tags that force an implicit `<head>` when they appear at the top level.
const HEAD_TAGS: [&str; 9] = [
    "base", "basefont", "bgsound", "noscript", "link", "meta", "title", "style", "script",
];

/// Character-by-character HTML parser driving a stack of unfinished nodes.
///
/// The scanner flushes buffered text on `<` and emits a tag on `>`. Inside a
/// `<script>` element both characters are ordinary text until the closing
/// `</script>` shows up. Doctype declarations and comments (anything whose
/// tag starts with `!`) are dropped.
pub struct HtmlParser {
    body: String,
    unfinished: Vec<Rc<RefCell<HtmlNode>>>,
}

impl HtmlParser {
    pub fn new(body: &str) -> Self {
        Self { body: body.to_string(), unfinished: Vec::new() }
    }

    pub fn parse(mut self) -> Rc<RefCell<HtmlNode>> {
        let chars: Vec<char> = self.body.chars().collect();
        self.body = String::new();

        let mut buffer = String::new();
        let mut in_tag = false;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if !in_tag && self.in_script() {
                // Raw text: only the literal close tag ends it.
                if c == '<' && Self::lookahead_close_script(&chars, i) {
                    in_tag = true;
                    if !buffer.is_empty() {
                        self.add_text(&buffer);
                        buffer.clear();
                    }
                } else {
                    buffer.push(c);
                }
            } else if c == '<' {
                in_tag = true;
                if !buffer.is_empty() {
                    self.add_text(&buffer);
                    buffer.clear();
                }
            } else if c == '>' {
                in_tag = false;
                let tag = std::mem::take(&mut buffer);
                self.add_tag(&tag);
            } else {
                buffer.push(c);
            }
            i += 1;
        }
        if !in_tag && !buffer.is_empty() {
            self.add_text(&buffer);
        }
        self.finish()
    }

    fn in_script(&self) -> bool {
        self.unfinished.last().is_some_and(|n| n.borrow().is_element("script"))
    }

    fn lookahead_close_script(chars: &[char], i: usize) -> bool {
        let needle = "</script>";
        chars[i..]
            .iter()
            .take(needle.len())
            .map(|c| c.to_ascii_lowercase())
            .eq(needle.chars())
    }

    /// Attaches a text node to the open element. Whitespace-only runs are
    /// dropped so they never show up in the tree.
    fn add_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.implicit_tags(None);
        let node = HtmlNode::new_text(text);
        if let Some(parent) = self.unfinished.last() {
            node.borrow_mut().parent = Some(Rc::downgrade(parent));
            parent.borrow_mut().children.push(node);
        }
    }

    fn add_tag(&mut self, tag_text: &str) {
        let (tag, attributes) = Self::get_attributes(tag_text);
        if tag.starts_with('!') || tag.is_empty() {
            return;
        }
        self.implicit_tags(Some(&tag));
        if tag.starts_with('/') {
            // The root stays open until finish().
            if self.unfinished.len() == 1 {
                return;
            }
            if let Some(node) = self.unfinished.pop() {
                if let Some(parent) = self.unfinished.last() {
                    parent.borrow_mut().children.push(node);
                }
            }
        } else if SELF_CLOSING_TAGS.contains(&tag.as_str()) {
            let node = HtmlNode::new_element(&tag, attributes);
            if let Some(parent) = self.unfinished.last() {
                node.borrow_mut().parent = Some(Rc::downgrade(parent));
                parent.borrow_mut().children.push(node);
            }
        } else {
            let node = HtmlNode::new_element(&tag, attributes);
            if let Some(parent) = self.unfinished.last() {
                node.borrow_mut().parent = Some(Rc::downgrade(parent));
            }
            self.unfinished.push(node);
        }
    }

    /// Splits a tag body into its lowercased name and attribute map. Values
    /// lose a single matching pair of surrounding quotes.
    fn get_attributes(text: &str) -> (String, HashMap<String, String>) {
        let mut parts = text.split_whitespace();
        let tag = parts.next().unwrap_or("").to_ascii_lowercase();
        let mut attributes = HashMap::new();
        for pair in parts {
            match pair.split_once('=') {
                Some((key, value)) => {
                    let mut value = value.to_string();
                    if value.len() > 2 {
                        let bytes = value.as_bytes();
                        let first = bytes[0];
                        if (first == b'\'' || first == b'"') && bytes[bytes.len() - 1] == first {
                            value = value[1..value.len() - 1].to_string();
                        }
                    }
                    attributes.insert(key.to_ascii_lowercase(), value);
                }
                None => {
                    attributes.insert(pair.to_ascii_lowercase(), String::new());
                }
            }
        }
        (tag, attributes)
    }

    /// Inserts the `html`/`head`/`body` wrappers (and the implicit `</head>`)
    /// the markup left out. Runs before every emission and may loop, since
    /// each insertion changes the stack shape.
    fn implicit_tags(&mut self, tag: Option<&str>) {
        loop {
            let open: Vec<String> = self
                .unfinished
                .iter()
                .filter_map(|n| n.borrow().tag().map(str::to_string))
                .collect();
            let in_head_set = tag.is_some_and(|t| HEAD_TAGS.contains(&t));
            if open.is_empty() && tag != Some("html") {
                self.add_tag("html");
            } else if open.len() == 1
                && open[0] == "html"
                && !matches!(tag, Some("head") | Some("body") | Some("/html"))
            {
                if in_head_set {
                    self.add_tag("head");
                } else {
                    self.add_tag("body");
                }
            } else if open.len() == 2
                && open[0] == "html"
                && open[1] == "head"
                && tag != Some("/head")
                && !in_head_set
            {
                self.add_tag("/head");
            } else {
                break;
            }
        }
    }

    /// Pops whatever is still open and returns the single root.
    fn finish(mut self) -> Rc<RefCell<HtmlNode>> {
        if self.unfinished.is_empty() {
            self.implicit_tags(None);
        }
        while self.unfinished.len() > 1 {
            if let Some(node) = self.unfinished.pop() {
                if let Some(parent) = self.unfinished.last() {
                    parent.borrow_mut().children.push(node);
                }
            }
        }
        self.unfinished.pop().expect("parser always leaves a root")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Rc<RefCell<HtmlNode>> {
        HtmlParser::new(s).parse()
    }

    fn child(node: &Rc<RefCell<HtmlNode>>, i: usize) -> Rc<RefCell<HtmlNode>> {
        node.borrow().children[i].clone()
    }

    fn tag_of(node: &Rc<RefCell<HtmlNode>>) -> String {
        node.borrow().tag().unwrap_or("#text").to_string()
    }

    fn text_of(node: &Rc<RefCell<HtmlNode>>) -> String {
        match &node.borrow().node_type {
            HtmlNodeType::Text(t) => t.text.clone(),
            HtmlNodeType::Element(_) => panic!("expected text node"),
        }
    }

    #[test]
    fn implicit_tags_wrap_bare_content() {
        // "Hello<p>World" parses to html -> head (empty) -> body -> "Hello", p -> "World".
        let root = parse("Hello<p>World");
        assert_eq!(tag_of(&root), "html");
        let head = child(&root, 0);
        let body = child(&root, 1);
        assert_eq!(tag_of(&head), "head");
        assert!(head.borrow().children.is_empty());
        assert_eq!(tag_of(&body), "body");
        assert_eq!(text_of(&child(&body, 0)), "Hello");
        let p = child(&body, 1);
        assert_eq!(tag_of(&p), "p");
        assert_eq!(text_of(&child(&p, 0)), "World");
    }

    #[test]
    fn head_tags_open_an_implicit_head() {
        let root = parse("<title>Hi</title>Welcome");
        let head = child(&root, 0);
        assert_eq!(tag_of(&child(&head, 0)), "title");
        let body = child(&root, 1);
        assert_eq!(text_of(&child(&body, 0)), "Welcome");
    }

    #[test]
    fn parent_links_match_children() {
        let root = parse("<div><p>a</p><p>b</p></div>");
        for node in HtmlNode::tree_to_vec(&root) {
            match node.borrow().parent_node() {
                None => assert!(Rc::ptr_eq(&node, &root)),
                Some(parent) => {
                    assert!(parent.borrow().children.iter().any(|c| Rc::ptr_eq(c, &node)));
                }
            }
        }
    }

    #[test]
    fn self_closing_tags_do_not_nest() {
        let root = parse("<p>one<br>two</p>");
        let body = child(&root, 1);
        let p = child(&body, 0);
        let tags: Vec<String> = p.borrow().children.iter().map(tag_of).collect();
        assert_eq!(tags, ["#text", "br", "#text"]);
    }

    #[test]
    fn attributes_are_lowercased_and_unquoted() {
        let root = parse("<DIV ID=Main CLASS=\"box\" checked>x</DIV>");
        let body = child(&root, 1);
        let div = child(&body, 0);
        assert_eq!(tag_of(&div), "div");
        assert_eq!(div.borrow().attr("id").as_deref(), Some("Main"));
        assert_eq!(div.borrow().attr("class").as_deref(), Some("box"));
        // Bare attribute: present with an empty value, distinct from absent.
        assert_eq!(div.borrow().attr("checked").as_deref(), Some(""));
        assert_eq!(div.borrow().attr("missing"), None);
    }

    #[test]
    fn doctype_and_comments_are_dropped() {
        let root = parse("<!doctype html><p>x</p>");
        let body = child(&root, 1);
        assert_eq!(tag_of(&child(&body, 0)), "p");
    }

    #[test]
    fn stray_close_tag_is_ignored() {
        let root = parse("</p>Hello");
        let body = child(&root, 1);
        assert_eq!(text_of(&child(&body, 0)), "Hello");
    }

    #[test]
    fn whitespace_only_text_never_appears() {
        let root = parse("<div>\n  <p>x</p>\n</div>");
        for node in HtmlNode::tree_to_vec(&root) {
            if let HtmlNodeType::Text(t) = &node.borrow().node_type {
                assert!(!t.text.trim().is_empty());
            }
        }
    }

    #[test]
    fn script_contents_are_raw_text() {
        let root = parse("<script>if (a < b) { c > d; }</script>");
        let head = child(&root, 0);
        let script = child(&head, 0);
        assert_eq!(tag_of(&script), "script");
        assert_eq!(text_of(&child(&script, 0)), "if (a < b) { c > d; }");
    }

    #[test]
    fn serialize_parse_round_trip_is_stable() {
        let source = "<div class=\"a\" id=\"b\"><p>hello</p>world</div>";
        let once = HtmlNode::serialize_children(&child(&parse(source), 1));
        let twice = HtmlNode::serialize_children(&child(&parse(&once), 1));
        assert_eq!(once, twice);
        assert_eq!(once, source);
    }

    #[test]
    fn unclosed_tags_are_finished() {
        let root = parse("<div><p>text");
        let body = child(&root, 1);
        let div = child(&body, 0);
        let p = child(&div, 0);
        assert_eq!(text_of(&child(&p, 0)), "text");
    }
}
