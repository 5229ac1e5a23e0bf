use std::cell::RefCell;
use std::rc::{Rc, Weak};

use egui::{Color32, Vec2};

use crate::fonts::{Font, get_font};
use crate::node::{HtmlNode, HtmlNodeType};
use crate::paint::{
    DrawCommand, DrawLine, DrawOutline, DrawRRect, DrawText, parse_color,
};
use crate::rect::Rect;
use crate::style::parse_px;

pub const HSTEP: f32 = 13.0;
pub const VSTEP: f32 = 17.0;

pub const WIDTH: f32 = 800.0;
pub const HEIGHT: f32 = 600.0;

pub const INPUT_WIDTH_PX: f32 = 200.0;
const BUTTON_PADDING_PX: f32 = 8.0;
const CHECKBOX_SIZE_PX: f32 = 16.0;

const BLOCK_ELEMENTS: [&str; 37] = [
    "html", "body", "article", "section", "nav", "aside",
    "h1", "h2", "h3", "h4", "h5", "h6", "hgroup", "header",
    "footer", "address", "p", "hr", "pre", "blockquote",
    "ol", "ul", "menu", "li", "dl", "dt", "dd", "figure",
    "figcaption", "main", "div", "table", "form", "fieldset",
    "legend", "details", "summary",
];

/// Subtrees that never produce boxes.
const NON_RENDERED_TAGS: [&str; 4] = ["head", "script", "style", "title"];

enum LayoutMode {
    Inline,
    Block,
}

#[derive(Debug, Default)]
pub struct BlockLayout {
    cursor_x: f32,
}

#[derive(Debug)]
pub struct TextLayout {
    pub word: String,
    pub font: Font,
    pub color: Color32,
    width: f32,
}

#[derive(Debug)]
pub struct InputLayout {
    pub font: Font,
    width: f32,
}

/// The five layout kinds. `Line` rows own the `Text`/`Input` boxes that sit
/// on a shared baseline.
#[derive(Debug)]
pub enum LayoutKind {
    Document,
    Block(BlockLayout),
    Line,
    Text(TextLayout),
    Input(InputLayout),
}

/// A node of the layout tree. The tree is rebuilt from scratch on every
/// render and holds only weak references to the DOM, so it can never outlive
/// or retain the document it was built from.
#[derive(Debug)]
pub struct LayoutNode {
    pub node: Weak<RefCell<HtmlNode>>,
    parent: Option<Weak<RefCell<LayoutNode>>>,
    previous: Option<Weak<RefCell<LayoutNode>>>,
    pub children: Vec<Rc<RefCell<LayoutNode>>>,
    pub kind: LayoutKind,
    pub position: Vec2,
    pub size: Vec2,
}

impl LayoutNode {
    pub fn new_document(dom: &Rc<RefCell<HtmlNode>>) -> Rc<RefCell<LayoutNode>> {
        Rc::new(RefCell::new(LayoutNode {
            node: Rc::downgrade(dom),
            parent: None,
            previous: None,
            children: Vec::new(),
            kind: LayoutKind::Document,
            position: Vec2::ZERO,
            size: Vec2::ZERO,
        }))
    }

    fn new_child(
        kind: LayoutKind,
        dom: &Rc<RefCell<HtmlNode>>,
        parent: &Rc<RefCell<LayoutNode>>,
        previous: Option<&Rc<RefCell<LayoutNode>>>,
    ) -> Rc<RefCell<LayoutNode>> {
        Rc::new(RefCell::new(LayoutNode {
            node: Rc::downgrade(dom),
            parent: Some(Rc::downgrade(parent)),
            previous: previous.map(Rc::downgrade),
            children: Vec::new(),
            kind,
            position: Vec2::ZERO,
            size: Vec2::ZERO,
        }))
    }

    pub fn self_rect(&self) -> Rect {
        Rect::from_pos_size(self.position, self.size)
    }

    /// Flattens the layout tree in paint order.
    pub fn tree_to_vec(node: &Rc<RefCell<LayoutNode>>) -> Vec<Rc<RefCell<LayoutNode>>> {
        let mut out = Vec::new();
        fn walk(node: &Rc<RefCell<LayoutNode>>, out: &mut Vec<Rc<RefCell<LayoutNode>>>) {
            out.push(node.clone());
            for child in node.borrow().children.iter() {
                walk(child, out);
            }
        }
        walk(node, &mut out);
        out
    }

    /// Hit-test rectangles for every box that routes clicks: words (for
    /// links) and widgets. Consulted by the tab on pointer events.
    pub fn widget_boxes(
        root: &Rc<RefCell<LayoutNode>>,
    ) -> Vec<(Weak<RefCell<HtmlNode>>, Rect)> {
        Self::tree_to_vec(root)
            .iter()
            .filter(|n| matches!(n.borrow().kind, LayoutKind::Text(_) | LayoutKind::Input(_)))
            .map(|n| {
                let borrowed = n.borrow();
                (borrowed.node.clone(), borrowed.self_rect())
            })
            .collect()
    }

    fn layout_mode(dom: &Rc<RefCell<HtmlNode>>) -> LayoutMode {
        let borrowed = dom.borrow();
        match &borrowed.node_type {
            HtmlNodeType::Text(_) => LayoutMode::Inline,
            HtmlNodeType::Element(e) => {
                let has_block_child = borrowed.children.iter().any(|c| {
                    c.borrow().tag().is_some_and(|t| BLOCK_ELEMENTS.contains(&t))
                });
                if has_block_child {
                    LayoutMode::Block
                } else if !borrowed.children.is_empty() || e.tag == "input" || e.tag == "button" {
                    LayoutMode::Inline
                } else {
                    LayoutMode::Block
                }
            }
        }
    }

    /// Computes geometry for the subtree rooted at `node`.
    pub fn layout(node: &Rc<RefCell<LayoutNode>>, ctx: &egui::Context) {
        let is_document = matches!(node.borrow().kind, LayoutKind::Document);
        let is_block = matches!(node.borrow().kind, LayoutKind::Block(_));
        let is_line = matches!(node.borrow().kind, LayoutKind::Line);

        if is_document {
            {
                let mut borrowed = node.borrow_mut();
                borrowed.position = Vec2::new(HSTEP, VSTEP);
                borrowed.size = Vec2::new(WIDTH - 2.0 * HSTEP, 0.0);
            }
            let Some(dom) = node.borrow().node.upgrade() else {
                node.borrow_mut().size.y = VSTEP;
                return;
            };
            let child = Self::new_child(LayoutKind::Block(BlockLayout::default()), &dom, node, None);
            node.borrow_mut().children.push(child.clone());
            Self::layout(&child, ctx);
            let height = child.borrow().size.y;
            node.borrow_mut().size.y = height.max(VSTEP);
        } else if is_block {
            Self::place_from_parent(node);
            let Some(dom) = node.borrow().node.upgrade() else {
                return;
            };
            let mode = Self::layout_mode(&dom);
            match mode {
                LayoutMode::Block => {
                    let mut previous: Option<Rc<RefCell<LayoutNode>>> = None;
                    for child_dom in dom.borrow().children.iter() {
                        if Self::is_non_rendered(child_dom) {
                            continue;
                        }
                        let next = Self::new_child(
                            LayoutKind::Block(BlockLayout::default()),
                            child_dom,
                            node,
                            previous.as_ref(),
                        );
                        node.borrow_mut().children.push(next.clone());
                        previous = Some(next);
                    }
                }
                LayoutMode::Inline => {
                    Self::new_line(node);
                    Self::recurse(node, &dom, ctx);
                }
            }

            for child in node.borrow().children.clone() {
                Self::layout(&child, ctx);
            }

            let total: f32 = node.borrow().children.iter().map(|c| c.borrow().size.y).sum();
            let height = match mode {
                // An element with no boxes still occupies one line.
                LayoutMode::Block if node.borrow().children.is_empty() => VSTEP,
                LayoutMode::Block => total,
                LayoutMode::Inline => total.max(VSTEP),
            };
            node.borrow_mut().size.y = height;
        } else if is_line {
            Self::place_from_parent(node);
            Self::layout_line(node);
        }
        // Text and Input geometry is assigned by their line.
    }

    /// Inherits x/width from the parent and stacks y below the previous
    /// sibling, which keeps `sibling[i+1].y == sibling[i].y + height`.
    fn place_from_parent(node: &Rc<RefCell<LayoutNode>>) {
        let (x, width, parent_y) = {
            let borrowed = node.borrow();
            match borrowed.parent.as_ref().and_then(Weak::upgrade) {
                Some(parent) => {
                    let p = parent.borrow();
                    (p.position.x, p.size.x, p.position.y)
                }
                None => (HSTEP, WIDTH - 2.0 * HSTEP, VSTEP),
            }
        };
        let y = {
            let borrowed = node.borrow();
            match borrowed.previous.as_ref().and_then(Weak::upgrade) {
                Some(previous) => {
                    let p = previous.borrow();
                    p.position.y + p.size.y
                }
                None => parent_y,
            }
        };
        let mut borrowed = node.borrow_mut();
        borrowed.position = Vec2::new(x, y);
        borrowed.size = Vec2::new(width, 0.0);
    }

    fn is_non_rendered(dom: &Rc<RefCell<HtmlNode>>) -> bool {
        dom.borrow().tag().is_some_and(|t| NON_RENDERED_TAGS.contains(&t))
    }

    /// Depth-first walk of an inline subtree, splitting text into words and
    /// turning `input`/`button` into widget boxes. `<br>` ends the line.
    fn recurse(block: &Rc<RefCell<LayoutNode>>, dom: &Rc<RefCell<HtmlNode>>, ctx: &egui::Context) {
        enum Action {
            ProcessText(String),
            ProcessElement { tag: String, children: Vec<Rc<RefCell<HtmlNode>>> },
        }

        let action = {
            let borrowed = dom.borrow();
            match &borrowed.node_type {
                HtmlNodeType::Text(t) => Action::ProcessText(t.text.clone()),
                HtmlNodeType::Element(e) => Action::ProcessElement {
                    tag: e.tag.clone(),
                    children: borrowed.children.clone(),
                },
            }
        };

        match action {
            Action::ProcessText(text) => {
                for word in text.split_whitespace() {
                    Self::word(block, dom, word, ctx);
                }
            }
            Action::ProcessElement { tag, children } => {
                if NON_RENDERED_TAGS.contains(&tag.as_str()) {
                    return;
                }
                if tag == "br" {
                    Self::new_line(block);
                } else if tag == "input" || tag == "button" {
                    Self::input(block, dom, ctx);
                } else {
                    for child in children {
                        Self::recurse(block, &child, ctx);
                    }
                }
            }
        }
    }

    fn font_for(dom: &Rc<RefCell<HtmlNode>>, ctx: &egui::Context) -> Font {
        let borrowed = dom.borrow();
        let size = borrowed.style.get("font-size").map(|v| parse_px(v)).unwrap_or(16.0);
        let weight = borrowed.style.get("font-weight").map(String::as_str).unwrap_or("normal");
        let style = borrowed.style.get("font-style").map(String::as_str).unwrap_or("normal");
        get_font(ctx, size, weight, style)
    }

    fn color_for(dom: &Rc<RefCell<HtmlNode>>) -> Color32 {
        dom.borrow()
            .style
            .get("color")
            .and_then(|v| parse_color(v))
            .unwrap_or(Color32::BLACK)
    }

    fn new_line(block: &Rc<RefCell<LayoutNode>>) {
        if let LayoutKind::Block(state) = &mut block.borrow_mut().kind {
            state.cursor_x = 0.0;
        }
        let Some(dom) = block.borrow().node.upgrade() else {
            return;
        };
        let previous = block.borrow().children.last().cloned();
        let line = Self::new_child(LayoutKind::Line, &dom, block, previous.as_ref());
        block.borrow_mut().children.push(line);
    }

    fn cursor_x(block: &Rc<RefCell<LayoutNode>>) -> f32 {
        match &block.borrow().kind {
            LayoutKind::Block(state) => state.cursor_x,
            _ => 0.0,
        }
    }

    fn advance_cursor(block: &Rc<RefCell<LayoutNode>>, amount: f32) {
        if let LayoutKind::Block(state) = &mut block.borrow_mut().kind {
            state.cursor_x += amount;
        }
    }

    fn append_to_line(block: &Rc<RefCell<LayoutNode>>, child: Rc<RefCell<LayoutNode>>) {
        let line = block.borrow().children.last().cloned();
        if let Some(line) = line {
            child.borrow_mut().parent = Some(Rc::downgrade(&line));
            child.borrow_mut().previous = line.borrow().children.last().map(Rc::downgrade);
            line.borrow_mut().children.push(child);
        }
    }

    fn word(
        block: &Rc<RefCell<LayoutNode>>,
        dom: &Rc<RefCell<HtmlNode>>,
        word: &str,
        ctx: &egui::Context,
    ) {
        let font = Self::font_for(dom, ctx);
        let color = Self::color_for(dom);
        let width = font.measure(word);
        let block_width = block.borrow().size.x;
        if Self::cursor_x(block) + width > block_width {
            Self::new_line(block);
        }
        let space = font.space_width;
        let text = Self::new_child(
            LayoutKind::Text(TextLayout { word: word.to_string(), font, color, width }),
            dom,
            block,
            None,
        );
        Self::append_to_line(block, text);
        Self::advance_cursor(block, width + space);
    }

    fn input(block: &Rc<RefCell<LayoutNode>>, dom: &Rc<RefCell<HtmlNode>>, ctx: &egui::Context) {
        let (tag, input_type) = {
            let borrowed = dom.borrow();
            (
                borrowed.tag().unwrap_or_default().to_string(),
                borrowed.attr("type").unwrap_or_default(),
            )
        };
        if tag == "input" && input_type == "hidden" {
            return;
        }
        let font = Self::font_for(dom, ctx);
        let width = if tag == "input" && input_type == "checkbox" {
            CHECKBOX_SIZE_PX
        } else if tag == "button" {
            font.measure(&HtmlNode::text_content(dom)) + 2.0 * BUTTON_PADDING_PX
        } else {
            INPUT_WIDTH_PX
        };
        let block_width = block.borrow().size.x;
        if Self::cursor_x(block) + width > block_width {
            Self::new_line(block);
        }
        let space = font.space_width;
        let widget = Self::new_child(LayoutKind::Input(InputLayout { font, width }), dom, block, None);
        Self::append_to_line(block, widget);
        Self::advance_cursor(block, width + space);
    }

    /// Places the line's boxes on a common baseline.
    fn layout_line(node: &Rc<RefCell<LayoutNode>>) {
        let children = node.borrow().children.clone();
        if children.is_empty() {
            node.borrow_mut().size.y = 0.0;
            return;
        }
        let (line_x, line_y) = {
            let borrowed = node.borrow();
            (borrowed.position.x, borrowed.position.y)
        };

        let mut x = line_x;
        let mut max_ascent: f32 = 0.0;
        let mut max_descent: f32 = 0.0;
        for child in &children {
            let mut borrowed = child.borrow_mut();
            let (width, font) = match &borrowed.kind {
                LayoutKind::Text(t) => (t.width, t.font.clone()),
                LayoutKind::Input(i) => (i.width, i.font.clone()),
                _ => continue,
            };
            borrowed.position.x = x;
            borrowed.size = Vec2::new(width, font.metrics.linespace);
            x += width + font.space_width;
            max_ascent = max_ascent.max(font.metrics.ascent);
            max_descent = max_descent.max(font.metrics.descent);
        }

        let baseline = line_y + max_ascent;
        for child in &children {
            let mut borrowed = child.borrow_mut();
            let ascent = match &borrowed.kind {
                LayoutKind::Text(t) => t.font.metrics.ascent,
                LayoutKind::Input(i) => i.font.metrics.ascent,
                _ => continue,
            };
            borrowed.position.y = baseline - ascent;
        }
        node.borrow_mut().size.y = max_ascent + 1.25 * max_descent;
    }

    /// The drawing primitives contributed by this node alone.
    pub fn paint(&self) -> Vec<DrawCommand> {
        match &self.kind {
            LayoutKind::Document | LayoutKind::Line => Vec::new(),
            LayoutKind::Block(_) => self.paint_background().into_iter().collect(),
            LayoutKind::Text(t) => vec![DrawCommand::Text(DrawText {
                rect: self.self_rect(),
                text: t.word.clone(),
                font: t.font.id.clone(),
                color: t.color,
            })],
            LayoutKind::Input(i) => self.paint_widget(i),
        }
    }

    fn paint_background(&self) -> Option<DrawCommand> {
        let dom = self.node.upgrade()?;
        let borrowed = dom.borrow();
        if !matches!(borrowed.node_type, HtmlNodeType::Element(_)) {
            return None;
        }
        let color = borrowed.style.get("background-color").and_then(|v| parse_color(v))?;
        let radius = Self::radius_for(borrowed.style.get("border-radius"), self.size);
        Some(DrawCommand::RRect(DrawRRect { rect: self.self_rect(), color, radius }))
    }

    /// `border-radius` in px, or a percentage of the average of the box's
    /// width and height.
    fn radius_for(value: Option<&String>, size: Vec2) -> f32 {
        let Some(value) = value else {
            return 0.0;
        };
        if let Some(pct) = value.strip_suffix('%') {
            let fraction = pct.parse::<f32>().unwrap_or(0.0) / 100.0;
            (size.x + size.y) / 2.0 * fraction
        } else {
            value.trim_end_matches("px").parse().unwrap_or(0.0)
        }
    }

    fn paint_widget(&self, input: &InputLayout) -> Vec<DrawCommand> {
        let Some(dom) = self.node.upgrade() else {
            return Vec::new();
        };
        let rect = self.self_rect();
        let mut out = Vec::new();

        let (tag, input_type, value, checked, focused) = {
            let borrowed = dom.borrow();
            (
                borrowed.tag().unwrap_or_default().to_string(),
                borrowed.attr("type").unwrap_or_default(),
                borrowed.attr("value").unwrap_or_default(),
                borrowed.attr("checked").is_some(),
                borrowed.focused,
            )
        };

        if tag == "input" && input_type == "checkbox" {
            out.push(DrawCommand::Outline(DrawOutline {
                rect,
                color: Color32::BLACK,
                thickness: 1.0,
            }));
            if checked {
                out.push(DrawCommand::Line(DrawLine {
                    x1: rect.left,
                    y1: rect.top,
                    x2: rect.right,
                    y2: rect.bottom,
                    color: Color32::BLACK,
                    thickness: 1.0,
                }));
                out.push(DrawCommand::Line(DrawLine {
                    x1: rect.left,
                    y1: rect.bottom,
                    x2: rect.right,
                    y2: rect.top,
                    color: Color32::BLACK,
                    thickness: 1.0,
                }));
            }
            return out;
        }

        if let Some(background) = self.paint_background() {
            out.push(background);
        }

        let text = if tag == "button" {
            HtmlNode::text_content(&dom)
        } else if input_type == "password" {
            "\u{2022}".repeat(value.chars().count())
        } else {
            value
        };
        let text_x = if tag == "button" { rect.left + BUTTON_PADDING_PX } else { rect.left };
        out.push(DrawCommand::Text(DrawText {
            rect: Rect::new(text_x, rect.top, rect.right, rect.bottom),
            text: text.clone(),
            font: input.font.id.clone(),
            color: Self::color_for(&dom),
        }));

        if focused {
            let caret_x = text_x + input.font.measure(&text);
            out.push(DrawCommand::Line(DrawLine {
                x1: caret_x,
                y1: rect.top,
                x2: caret_x,
                y2: rect.bottom,
                color: Color32::BLACK,
                thickness: 1.0,
            }));
        }
        out
    }

    /// Flattens the whole tree into a display list in paint order.
    pub fn paint_tree(node: &Rc<RefCell<LayoutNode>>, display_list: &mut Vec<DrawCommand>) {
        display_list.append(&mut node.borrow().paint());
        for child in node.borrow().children.clone() {
            Self::paint_tree(&child, display_list);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css_parser::{CssParser, Rule};
    use crate::html_parser::HtmlParser;
    use crate::style::{DEFAULT_STYLE_SHEET, cascade_priority, style};

    fn test_ctx() -> egui::Context {
        let ctx = egui::Context::default();
        // Drive one empty frame so the font atlas exists.
        let _ = ctx.run(egui::RawInput::default(), |_| {});
        ctx
    }

    fn layout_html_css(html: &str, css: &str) -> Rc<RefCell<LayoutNode>> {
        let ctx = test_ctx();
        let root = HtmlParser::new(html).parse();
        let mut rules: Vec<Rule> = DEFAULT_STYLE_SHEET.clone();
        rules.extend(CssParser::new(css).parse());
        rules.sort_by_key(cascade_priority);
        style(&root, &rules);
        let document = LayoutNode::new_document(&root);
        LayoutNode::layout(&document, &ctx);
        document
    }

    fn layout_html(html: &str) -> Rc<RefCell<LayoutNode>> {
        layout_html_css(html, "")
    }

    fn nodes_of_kind(
        root: &Rc<RefCell<LayoutNode>>,
        pred: fn(&LayoutKind) -> bool,
    ) -> Vec<Rc<RefCell<LayoutNode>>> {
        LayoutNode::tree_to_vec(root)
            .into_iter()
            .filter(|n| pred(&n.borrow().kind))
            .collect()
    }

    #[test]
    fn empty_document_has_minimum_height() {
        let document = layout_html("");
        assert!(document.borrow().size.y >= VSTEP);
    }

    #[test]
    fn block_siblings_stack_vertically() {
        let document = layout_html("<p>one</p><p>two</p><p>three</p>");
        // body's children are the three paragraph blocks
        let body = {
            let html = document.borrow().children[0].clone();
            let child = html.borrow().children[0].clone();
            child
        };
        let blocks = body.borrow().children.clone();
        assert_eq!(blocks.len(), 3);
        for pair in blocks.windows(2) {
            let first = pair[0].borrow();
            let second = pair[1].borrow();
            assert_eq!(second.position.y, first.position.y + first.size.y);
            assert_eq!(second.position.x, first.position.x);
        }
    }

    #[test]
    fn words_stay_within_the_block() {
        let text = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod \
                    tempor incididunt ut labore et dolore magna aliqua ut enim ad minim";
        let document = layout_html(&format!("<p>{}</p>", text));
        let words = nodes_of_kind(&document, |k| matches!(k, LayoutKind::Text(_)));
        assert!(words.len() > 10);
        for word in words {
            let borrowed = word.borrow();
            assert!(
                borrowed.position.x + borrowed.size.x <= HSTEP + (WIDTH - 2.0 * HSTEP) + 0.5,
                "word overflows the block"
            );
        }
    }

    #[test]
    fn words_on_a_line_share_a_baseline() {
        let document = layout_html("<p>same font words here</p>");
        let words = nodes_of_kind(&document, |k| matches!(k, LayoutKind::Text(_)));
        let first_y = words[0].borrow().position.y;
        for word in &words {
            assert_eq!(word.borrow().position.y, first_y);
        }
    }

    #[test]
    fn br_at_line_start_leaves_an_empty_line() {
        let document = layout_html("<p><br>after</p>");
        let lines = nodes_of_kind(&document, |k| matches!(k, LayoutKind::Line));
        assert_eq!(lines.len(), 2);
        assert!(lines[0].borrow().children.is_empty());
        assert_eq!(lines[0].borrow().size.y, 0.0);
        assert_eq!(lines[1].borrow().children.len(), 1);
    }

    #[test]
    fn head_contents_produce_no_boxes() {
        let document = layout_html("<title>ignored</title><script>var x = 1;</script><p>shown</p>");
        let words: Vec<String> = nodes_of_kind(&document, |k| matches!(k, LayoutKind::Text(_)))
            .iter()
            .map(|n| match &n.borrow().kind {
                LayoutKind::Text(t) => t.word.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(words, ["shown"]);
    }

    #[test]
    fn hidden_inputs_consume_no_space() {
        let document = layout_html("<form><input type=hidden name=csrf></form>");
        assert!(nodes_of_kind(&document, |k| matches!(k, LayoutKind::Input(_))).is_empty());
    }

    #[test]
    fn checkbox_is_a_small_square() {
        let document = layout_html("<p><input type=checkbox></p>");
        let widgets = nodes_of_kind(&document, |k| matches!(k, LayoutKind::Input(_)));
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].borrow().size.x, CHECKBOX_SIZE_PX);
    }

    #[test]
    fn text_input_has_fixed_width() {
        let document = layout_html("<p><input name=guest value=hi></p>");
        let widgets = nodes_of_kind(&document, |k| matches!(k, LayoutKind::Input(_)));
        assert_eq!(widgets[0].borrow().size.x, INPUT_WIDTH_PX);
    }

    #[test]
    fn button_width_tracks_its_label() {
        let document = layout_html("<p><button>Sign the book!</button><button>Go</button></p>");
        let widgets = nodes_of_kind(&document, |k| matches!(k, LayoutKind::Input(_)));
        let long = widgets[0].borrow().size.x;
        let short = widgets[1].borrow().size.x;
        assert!(long > short);
        assert!(short > 2.0 * BUTTON_PADDING_PX);
    }

    #[test]
    fn background_paints_a_rounded_rect() {
        let document = layout_html_css(
            "<div>boxed</div>",
            "div { background-color: lightblue; border-radius: 4px; }",
        );
        let mut display_list = Vec::new();
        LayoutNode::paint_tree(&document, &mut display_list);
        let rrect = display_list
            .iter()
            .find_map(|c| match c {
                DrawCommand::RRect(r) => Some(r.clone()),
                _ => None,
            })
            .expect("background missing");
        assert_eq!(rrect.radius, 4.0);
        // Background comes before the text it sits under.
        assert!(matches!(display_list.last(), Some(DrawCommand::Text(_))));
    }

    #[test]
    fn percent_radius_uses_average_extent() {
        assert_eq!(LayoutNode::radius_for(Some(&"50%".to_string()), Vec2::new(30.0, 10.0)), 10.0);
        assert_eq!(LayoutNode::radius_for(Some(&"3px".to_string()), Vec2::new(30.0, 10.0)), 3.0);
    }

    #[test]
    fn repeated_layout_is_idempotent() {
        let ctx = test_ctx();
        let root = HtmlParser::new("<p>stable <b>output</b></p>").parse();
        let mut rules: Vec<Rule> = DEFAULT_STYLE_SHEET.clone();
        rules.sort_by_key(cascade_priority);
        style(&root, &rules);

        let mut lists: Vec<Vec<DrawCommand>> = Vec::new();
        for _ in 0..2 {
            let document = LayoutNode::new_document(&root);
            LayoutNode::layout(&document, &ctx);
            let mut display_list = Vec::new();
            LayoutNode::paint_tree(&document, &mut display_list);
            lists.push(display_list);
        }
        assert_eq!(lists[0], lists[1]);
    }

    #[test]
    fn widget_boxes_cover_widgets_and_words() {
        let document = layout_html("<p><a href=/x>link</a> <input name=q></p>");
        let boxes = LayoutNode::widget_boxes(&document);
        assert_eq!(boxes.len(), 2);
        for (node, rect) in boxes {
            assert!(node.upgrade().is_some());
            assert!(rect.width() > 0.0);
        }
    }
}
