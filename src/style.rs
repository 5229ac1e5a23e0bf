use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use lazy_static::lazy_static;

use crate::css_parser::{CssParser, Rule};
use crate::node::{HtmlNode, HtmlNodeType};

lazy_static! {
    /// The user-agent sheet, applied below every author rule.
    pub static ref DEFAULT_STYLE_SHEET: Vec<Rule> =
        CssParser::new(include_str!("../assets/browser.css")).parse();

    /// Properties that flow from parent to child, with their root defaults.
    pub static ref INHERITED_PROPERTIES: HashMap<&'static str, &'static str> = HashMap::from([
        ("color", "black"),
        ("font-size", "16px"),
        ("font-weight", "normal"),
        ("font-style", "normal"),
    ]);
}

/// Stable sort key for rules. Callers sort before handing rules to
/// [`style`], so later (higher-priority) rules overwrite earlier ones.
pub fn cascade_priority(rule: &Rule) -> i32 {
    rule.0.priority()
}

/// Parses a `font-size` value in px, falling back to the root default.
pub fn parse_px(value: &str) -> f32 {
    value.trim_end_matches("px").parse().unwrap_or(16.0)
}

/// Resolves computed styles for `node` and its subtree.
///
/// Order per node: inherited properties, then matching rules (already sorted
/// by priority), then the inline `style` attribute. Percentage font sizes
/// resolve against the parent before children are visited, so nesting
/// multiplies fractions. Every node ends up with a complete style map.
pub fn style(node: &Rc<RefCell<HtmlNode>>, rules: &[Rule]) {
    let mut computed: HashMap<String, String> = HashMap::new();

    let parent = node.borrow().parent_node();
    for (property, default) in INHERITED_PROPERTIES.iter() {
        let value = match &parent {
            Some(parent) => parent
                .borrow()
                .style
                .get(*property)
                .cloned()
                .unwrap_or_else(|| default.to_string()),
            None => default.to_string(),
        };
        computed.insert(property.to_string(), value);
    }

    if matches!(node.borrow().node_type, HtmlNodeType::Element(_)) {
        for (selector, body) in rules {
            if !selector.matches(node) {
                continue;
            }
            for (property, value) in body {
                computed.insert(property.clone(), value.clone());
            }
        }
        if let Some(inline) = node.borrow().attr("style") {
            for (property, value) in CssParser::new(&inline).body() {
                computed.insert(property, value);
            }
        }
    }

    // Percentages resolve against the parent's already-absolute size.
    let percentage = computed
        .get("font-size")
        .and_then(|size| size.strip_suffix('%'))
        .map(str::to_string);
    if let Some(pct) = percentage {
        let fraction = pct.parse::<f32>().unwrap_or(100.0) / 100.0;
        let parent_px = match &parent {
            Some(parent) => parent
                .borrow()
                .style
                .get("font-size")
                .map(|v| parse_px(v))
                .unwrap_or(16.0),
            None => 16.0,
        };
        computed.insert("font-size".to_string(), format!("{}px", parent_px * fraction));
    }

    for (property, default) in [("background-color", "transparent"), ("border-radius", "0px")] {
        computed.entry(property.to_string()).or_insert_with(|| default.to_string());
    }

    let children = {
        let mut borrowed = node.borrow_mut();
        borrowed.style = computed;
        borrowed.children.clone()
    };
    for child in children {
        style(&child, rules);
    }
}
