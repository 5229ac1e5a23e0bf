use std::cell::RefCell;
use std::rc::Rc;

use crate::node::HtmlNode;

#[derive(Clone, Debug, PartialEq)]
pub struct TagSelector {
    pub tag: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DescendantSelector {
    pub ancestor: Box<Selector>,
    pub descendant: Box<Selector>,
}

/// The two supported selector kinds. Priority is the cascade sort key: tag
/// selectors count 1, descendant selectors the sum of their parts.
#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    Tag(TagSelector),
    Descendant(DescendantSelector),
}

impl Selector {
    pub fn priority(&self) -> i32 {
        match self {
            Selector::Tag(_) => 1,
            Selector::Descendant(d) => d.ancestor.priority() + d.descendant.priority(),
        }
    }

    pub fn matches(&self, node: &Rc<RefCell<HtmlNode>>) -> bool {
        match self {
            Selector::Tag(t) => node.borrow().is_element(&t.tag),
            Selector::Descendant(d) => {
                if !d.descendant.matches(node) {
                    return false;
                }
                let mut ancestor = node.borrow().parent_node();
                while let Some(current) = ancestor {
                    if d.ancestor.matches(&current) {
                        return true;
                    }
                    ancestor = current.borrow().parent_node();
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html_parser::HtmlParser;
    use crate::node::HtmlNode;

    fn selector(s: &str) -> Selector {
        crate::css_parser::CssParser::new(s).selector().unwrap()
    }

    fn find(root: &Rc<RefCell<HtmlNode>>, tag: &str) -> Rc<RefCell<HtmlNode>> {
        HtmlNode::tree_to_vec(root)
            .into_iter()
            .find(|n| n.borrow().is_element(tag))
            .unwrap()
    }

    #[test]
    fn tag_selector_matches_elements_only() {
        let root = HtmlParser::new("<p>hi</p>").parse();
        let p = find(&root, "p");
        let text = p.borrow().children[0].clone();
        assert!(selector("p").matches(&p));
        assert!(!selector("div").matches(&p));
        assert!(!selector("p").matches(&text));
    }

    #[test]
    fn descendant_selector_walks_ancestors() {
        let root = HtmlParser::new("<ul><li><b>x</b></li></ul>").parse();
        let b = find(&root, "b");
        assert!(selector("ul b").matches(&b));
        assert!(selector("li b").matches(&b));
        assert!(selector("body b").matches(&b));
        assert!(!selector("p b").matches(&b));
        assert!(!selector("ul b").matches(&find(&root, "li")));
    }
}
