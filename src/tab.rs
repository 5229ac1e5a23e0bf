use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use egui::Pos2;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::cookies::CookieJar;
use crate::css_parser::{CssParser, Rule};
use crate::html_parser::HtmlParser;
use crate::js::JsContext;
use crate::layout::{HEIGHT, LayoutNode, VSTEP};
use crate::node::HtmlNode;
use crate::paint::DrawCommand;
use crate::rect::Rect;
use crate::style::{DEFAULT_STYLE_SHEET, cascade_priority, style};
use crate::task::{Task, TaskRunner};
use crate::url::{HttpResponse, RequestError, RequestOptions, Url};

const SCROLL_STEP: f32 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum ReferrerPolicy {
    NoReferrer,
    SameOrigin,
    #[default]
    Full,
}

impl ReferrerPolicy {
    fn parse(value: Option<&String>) -> ReferrerPolicy {
        match value.map(String::as_str) {
            Some("no-referrer") => ReferrerPolicy::NoReferrer,
            Some("same-origin") => ReferrerPolicy::SameOrigin,
            _ => ReferrerPolicy::Full,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub url: Url,
    pub method: String,
    pub body: Option<String>,
}

/// One browsing context: document, layout, script world, history, and the
/// security state of the page it is showing.
///
/// All methods that can re-enter the script engine are associated functions
/// taking `&Rc<RefCell<Tab>>` and hold no borrow across a script call, since
/// the native callbacks borrow the tab again.
pub struct Tab {
    pub(crate) ctx: egui::Context,
    pub(crate) history: Vec<HistoryEntry>,
    pub(crate) history_index: usize,
    pub(crate) url: Option<Url>,
    pub(crate) nodes: Option<Rc<RefCell<HtmlNode>>>,
    pub(crate) document: Option<Rc<RefCell<LayoutNode>>>,
    pub(crate) display_list: Vec<DrawCommand>,
    widget_boxes: Vec<(Weak<RefCell<HtmlNode>>, Rect)>,
    pub(crate) scroll_y: f32,
    focus: Option<Weak<RefCell<HtmlNode>>>,
    loaded_scripts: HashSet<String>,
    loaded_styles: HashMap<usize, Vec<Rule>>,
    extra_style_rules: Vec<Rule>,
    pub(crate) allowed_origins: Option<Vec<String>>,
    pub(crate) referrer_policy: ReferrerPolicy,
    pub(crate) cert_error: bool,
    pub(crate) status_message: Option<String>,
    pub(crate) cookie_jar: Arc<Mutex<CookieJar>>,
    pub(crate) task_runner: Arc<TaskRunner>,
    pub(crate) js: Option<Rc<JsContext>>,
    js_generation: u64,
    pub(crate) needs_render: bool,
    needs_id_rebind: bool,
    pub(crate) needs_raf: bool,
}

impl Tab {
    pub fn new(ctx: egui::Context, cookie_jar: Arc<Mutex<CookieJar>>) -> Rc<RefCell<Tab>> {
        let task_runner = Arc::new(TaskRunner::new());
        task_runner.set_waker(ctx.clone());
        Rc::new(RefCell::new(Tab {
            ctx,
            history: Vec::new(),
            history_index: 0,
            url: None,
            nodes: None,
            document: None,
            display_list: Vec::new(),
            widget_boxes: Vec::new(),
            scroll_y: 0.0,
            focus: None,
            loaded_scripts: HashSet::new(),
            loaded_styles: HashMap::new(),
            extra_style_rules: Vec::new(),
            allowed_origins: None,
            referrer_policy: ReferrerPolicy::Full,
            cert_error: false,
            status_message: None,
            cookie_jar,
            task_runner,
            js: None,
            js_generation: 0,
            needs_render: false,
            needs_id_rebind: false,
            needs_raf: false,
        }))
    }

    // --- Navigation and history -------------------------------------------

    /// Navigates to `url`, trimming forward history. A `Some` payload makes
    /// this a POST.
    pub fn load(tab: &Rc<RefCell<Tab>>, url: Url, payload: Option<String>) {
        let method = if payload.is_some() { "POST" } else { "GET" };
        tab.borrow_mut().push_history(HistoryEntry {
            url: url.clone(),
            method: method.to_string(),
            body: payload.clone(),
        });
        Self::fetch_and_display(tab, url, payload);
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if !self.history.is_empty() {
            self.history.truncate(self.history_index + 1);
        }
        self.history.push(entry);
        self.history_index = self.history.len() - 1;
    }

    /// History entries restore as GET; a POST is never replayed.
    pub fn back(tab: &Rc<RefCell<Tab>>) {
        let entry = {
            let mut borrowed = tab.borrow_mut();
            if borrowed.history_index == 0 || borrowed.history.is_empty() {
                return;
            }
            borrowed.history_index -= 1;
            borrowed.history[borrowed.history_index].clone()
        };
        Self::fetch_and_display(tab, entry.url, None);
    }

    pub fn forward(tab: &Rc<RefCell<Tab>>) {
        let entry = {
            let mut borrowed = tab.borrow_mut();
            if borrowed.history_index + 1 >= borrowed.history.len() {
                return;
            }
            borrowed.history_index += 1;
            borrowed.history[borrowed.history_index].clone()
        };
        Self::fetch_and_display(tab, entry.url, None);
    }

    pub fn reload(tab: &Rc<RefCell<Tab>>) {
        let url = tab.borrow().url.clone();
        if let Some(url) = url {
            Self::fetch_and_display(tab, url, None);
        }
    }

    fn fetch_and_display(tab: &Rc<RefCell<Tab>>, url: Url, payload: Option<String>) {
        let options = {
            let borrowed = tab.borrow();
            if !borrowed.allowed_request(&url) {
                tracing::warn!(url = %url, "navigation blocked by Content-Security-Policy");
                return;
            }
            RequestOptions {
                referrer: borrowed.build_referrer(&url),
                initiator: borrowed.url.as_ref().map(|u| u.origin()),
                payload,
                jar: Some(borrowed.cookie_jar.clone()),
            }
        };

        let response = match url.request(&options) {
            Ok(response) => response,
            Err(RequestError::Certificate(error)) => {
                tracing::warn!(url = %url, %error, "TLS certificate failure");
                let mut borrowed = tab.borrow_mut();
                borrowed.cert_error = true;
                borrowed.status_message = Some(format!("Certificate error for {}", url));
                return;
            }
            Err(error) => {
                tracing::warn!(url = %url, %error, "navigation failed");
                tab.borrow_mut().status_message = Some(format!("Failed to load {}: {}", url, error));
                return;
            }
        };

        let root = HtmlParser::new(&response.body).parse();
        let generation = {
            let mut borrowed = tab.borrow_mut();
            borrowed.cert_error = false;
            borrowed.status_message = None;
            borrowed.url = Some(url);
            borrowed.allowed_origins =
                parse_csp(response.headers.get("content-security-policy"));
            borrowed.referrer_policy =
                ReferrerPolicy::parse(response.headers.get("referrer-policy"));
            if let Some(js) = &borrowed.js {
                js.discard();
            }
            borrowed.js = None;
            borrowed.js_generation += 1;
            borrowed.nodes = Some(root);
            borrowed.loaded_scripts.clear();
            borrowed.loaded_styles.clear();
            borrowed.extra_style_rules.clear();
            borrowed.focus = None;
            borrowed.scroll_y = 0.0;
            borrowed.needs_render = true;
            borrowed.needs_id_rebind = true;
            borrowed.js_generation
        };

        match JsContext::new(Rc::downgrade(tab), generation) {
            Ok(js) => tab.borrow_mut().js = Some(Rc::new(js)),
            Err(error) => tracing::error!(%error, "could not create script context"),
        }

        Self::render(tab);
    }

    // --- Security ----------------------------------------------------------

    /// CSP `default-src`: a request is allowed when no policy is set or the
    /// target's origin is listed.
    pub fn allowed_request(&self, url: &Url) -> bool {
        match &self.allowed_origins {
            None => true,
            Some(origins) => origins.contains(&url.origin()),
        }
    }

    /// The `Referer` to attach when this page requests `target`.
    pub fn build_referrer(&self, target: &Url) -> Option<Url> {
        let current = self.url.as_ref()?;
        match self.referrer_policy {
            ReferrerPolicy::NoReferrer => None,
            ReferrerPolicy::SameOrigin => {
                (current.origin() == target.origin()).then(|| current.clone())
            }
            ReferrerPolicy::Full => Some(current.clone()),
        }
    }

    fn subresource_options(&self, target: &Url) -> RequestOptions {
        RequestOptions {
            referrer: self.build_referrer(target),
            initiator: self.url.as_ref().map(|u| u.origin()),
            payload: None,
            jar: Some(self.cookie_jar.clone()),
        }
    }

    // --- Rendering funnel --------------------------------------------------

    /// Called from the bridge after any script-driven DOM mutation.
    pub fn on_bridge_mutation(tab: &Rc<RefCell<Tab>>) {
        let mut borrowed = tab.borrow_mut();
        borrowed.needs_render = true;
        borrowed.needs_id_rebind = true;
        borrowed.ctx.request_repaint();
    }

    fn request_render(tab: &Rc<RefCell<Tab>>) {
        let mut borrowed = tab.borrow_mut();
        borrowed.needs_render = true;
        borrowed.ctx.request_repaint();
    }

    /// Rebuilds everything downstream of the DOM: resource rescan, style,
    /// layout, display list. Lazy; cheap to call when nothing changed.
    pub fn render(tab: &Rc<RefCell<Tab>>) {
        if !tab.borrow().needs_render {
            return;
        }
        Self::rescan_resources(tab);

        let (root, ctx) = {
            let borrowed = tab.borrow();
            (borrowed.nodes.clone(), borrowed.ctx.clone())
        };
        let Some(root) = root else {
            tab.borrow_mut().needs_render = false;
            return;
        };

        if tab.borrow().needs_id_rebind {
            let js = tab.borrow().js.clone();
            if let Some(js) = js {
                js.rebind_id_globals(&root);
            }
            tab.borrow_mut().needs_id_rebind = false;
        }

        let mut rules: Vec<Rule> = DEFAULT_STYLE_SHEET.clone();
        rules.extend(tab.borrow().extra_style_rules.clone());
        rules.sort_by_key(cascade_priority);
        style(&root, &rules);

        let document = LayoutNode::new_document(&root);
        LayoutNode::layout(&document, &ctx);
        let mut display_list = Vec::new();
        LayoutNode::paint_tree(&document, &mut display_list);
        let widget_boxes = LayoutNode::widget_boxes(&document);

        {
            let mut borrowed = tab.borrow_mut();
            borrowed.document = Some(document);
            borrowed.display_list = display_list;
            borrowed.widget_boxes = widget_boxes;
            borrowed.needs_render = false;
        }
        ctx.request_repaint();
    }

    /// Fetches newly discovered `<script src>` and stylesheet links.
    ///
    /// Script sources are remembered win or lose, so a blocked or failed
    /// fetch is not retried on every rescan. Stylesheet rules are keyed by
    /// their link element and dropped once the link leaves the document.
    fn rescan_resources(tab: &Rc<RefCell<Tab>>) {
        let (root, base) = {
            let borrowed = tab.borrow();
            (borrowed.nodes.clone(), borrowed.url.clone())
        };
        let (Some(root), Some(base)) = (root, base) else {
            return;
        };

        let mut script_srcs: Vec<String> = Vec::new();
        let mut links: Vec<(usize, String)> = Vec::new();
        for node in HtmlNode::tree_to_vec(&root) {
            let borrowed = node.borrow();
            match borrowed.tag() {
                Some("script") => {
                    if let Some(src) = borrowed.attr("src") {
                        script_srcs.push(src);
                    }
                }
                Some("link") => {
                    if borrowed.attr("rel").as_deref() == Some("stylesheet") {
                        if let Some(href) = borrowed.attr("href") {
                            links.push((Rc::as_ptr(&node) as usize, href));
                        }
                    }
                }
                _ => {}
            }
        }

        for src in script_srcs {
            let Ok(script_url) = base.resolve(&src) else {
                continue;
            };
            let key = script_url.to_string();
            {
                let mut borrowed = tab.borrow_mut();
                if borrowed.loaded_scripts.contains(&key) {
                    continue;
                }
                borrowed.loaded_scripts.insert(key);
            }
            if !tab.borrow().allowed_request(&script_url) {
                tracing::warn!(url = %script_url, "script blocked by Content-Security-Policy");
                continue;
            }
            let (options, runner, generation) = {
                let borrowed = tab.borrow();
                (
                    borrowed.subresource_options(&script_url),
                    borrowed.task_runner.clone(),
                    borrowed.js_generation,
                )
            };
            match script_url.request(&options) {
                Ok(response) => {
                    runner.enqueue(Task::RunScript { source: response.body, generation });
                }
                Err(error) => {
                    tracing::warn!(url = %script_url, %error, "script fetch failed");
                }
            }
        }

        let mut extra: Vec<Rule> = Vec::new();
        for (key, href) in links {
            let cached = tab.borrow().loaded_styles.get(&key).cloned();
            let rules = match cached {
                Some(rules) => rules,
                None => {
                    let Ok(style_url) = base.resolve(&href) else {
                        continue;
                    };
                    let rules = if !tab.borrow().allowed_request(&style_url) {
                        tracing::warn!(url = %style_url, "stylesheet blocked by Content-Security-Policy");
                        Vec::new()
                    } else {
                        let options = tab.borrow().subresource_options(&style_url);
                        match style_url.request(&options) {
                            Ok(response) => CssParser::new(&response.body).parse(),
                            Err(error) => {
                                tracing::warn!(url = %style_url, %error, "stylesheet fetch failed");
                                Vec::new()
                            }
                        }
                    };
                    tab.borrow_mut().loaded_styles.insert(key, rules.clone());
                    rules
                }
            };
            extra.extend(rules);
        }
        tab.borrow_mut().extra_style_rules = extra;
    }

    // --- Input -------------------------------------------------------------

    /// Routes a pointer press through the widget boxes, dispatches the click
    /// event, and performs the un-prevented default action.
    pub fn click(tab: &Rc<RefCell<Tab>>, pos: Pos2) {
        let target = {
            let borrowed = tab.borrow();
            let y = pos.y + borrowed.scroll_y;
            borrowed
                .widget_boxes
                .iter()
                .rev()
                .find(|(_, rect)| rect.contains(pos.x, y))
                .and_then(|(node, _)| node.upgrade())
        };
        let Some(target) = target else {
            Self::blur(tab);
            return;
        };

        let mut element = Some(target);
        while let Some(node) = element {
            let tag = node.borrow().tag().map(str::to_string);
            match tag.as_deref() {
                Some("a") if node.borrow().attr("href").is_some() => {
                    if !Self::dispatch(tab, "click", &node) {
                        return;
                    }
                    let href = node.borrow().attr("href").unwrap_or_default();
                    let resolved = tab.borrow().url.clone().and_then(|u| u.resolve(&href).ok());
                    if let Some(url) = resolved {
                        Self::load(tab, url, None);
                    }
                    return;
                }
                Some("input") => {
                    if !Self::dispatch(tab, "click", &node) {
                        return;
                    }
                    if node.borrow().attr("type").as_deref() == Some("checkbox") {
                        let checked = node.borrow().attr("checked").is_some();
                        if checked {
                            node.borrow_mut().remove_attr("checked");
                        } else {
                            node.borrow_mut().set_attr("checked", "");
                        }
                    } else {
                        // Focusing an input clears it for fresh typing.
                        node.borrow_mut().set_attr("value", "");
                        Self::focus_node(tab, &node);
                    }
                    Self::request_render(tab);
                    return;
                }
                Some("button") => {
                    if !Self::dispatch(tab, "click", &node) {
                        return;
                    }
                    let mut form = node.borrow().parent_node();
                    while let Some(candidate) = form {
                        if candidate.borrow().is_element("form")
                            && candidate.borrow().attr("action").is_some()
                        {
                            Self::submit_form(tab, &candidate);
                            return;
                        }
                        form = candidate.borrow().parent_node();
                    }
                    return;
                }
                _ => {}
            }
            element = node.borrow().parent_node();
        }
        Self::blur(tab);
    }

    pub fn keypress(tab: &Rc<RefCell<Tab>>, ch: char) {
        if ch.is_control() {
            return;
        }
        let Some(node) = Self::focused_node(tab) else {
            return;
        };
        if !Self::dispatch(tab, "keydown", &node) {
            return;
        }
        let value = node.borrow().attr("value").unwrap_or_default();
        node.borrow_mut().set_attr("value", &format!("{value}{ch}"));
        Self::request_render(tab);
    }

    pub fn backspace(tab: &Rc<RefCell<Tab>>) {
        let Some(node) = Self::focused_node(tab) else {
            return;
        };
        if !Self::dispatch(tab, "keydown", &node) {
            return;
        }
        let mut value = node.borrow().attr("value").unwrap_or_default();
        value.pop();
        node.borrow_mut().set_attr("value", &value);
        Self::request_render(tab);
    }

    /// Enter submits the form around the focused input.
    pub fn enter(tab: &Rc<RefCell<Tab>>) {
        let Some(node) = Self::focused_node(tab) else {
            return;
        };
        let mut form = node.borrow().parent_node();
        while let Some(candidate) = form {
            if candidate.borrow().is_element("form") && candidate.borrow().attr("action").is_some()
            {
                Self::submit_form(tab, &candidate);
                return;
            }
            form = candidate.borrow().parent_node();
        }
    }

    pub fn submit_form(tab: &Rc<RefCell<Tab>>, form: &Rc<RefCell<HtmlNode>>) {
        if !Self::dispatch(tab, "submit", form) {
            return;
        }
        let mut body = String::new();
        for node in HtmlNode::tree_to_vec(form) {
            let borrowed = node.borrow();
            if !borrowed.is_element("input") {
                continue;
            }
            let Some(name) = borrowed.attr("name") else {
                continue;
            };
            let value = borrowed.attr("value").unwrap_or_default();
            if !body.is_empty() {
                body.push('&');
            }
            body.push_str(&format!(
                "{}={}",
                utf8_percent_encode(&name, NON_ALPHANUMERIC),
                utf8_percent_encode(&value, NON_ALPHANUMERIC)
            ));
        }
        let action = form.borrow().attr("action").unwrap_or_default();
        let resolved = tab.borrow().url.clone().and_then(|u| u.resolve(&action).ok());
        if let Some(url) = resolved {
            Self::load(tab, url, Some(body));
        }
    }

    fn focused_node(tab: &Rc<RefCell<Tab>>) -> Option<Rc<RefCell<HtmlNode>>> {
        tab.borrow().focus.clone().and_then(|w| w.upgrade())
    }

    fn focus_node(tab: &Rc<RefCell<Tab>>, node: &Rc<RefCell<HtmlNode>>) {
        Self::blur(tab);
        node.borrow_mut().focused = true;
        tab.borrow_mut().focus = Some(Rc::downgrade(node));
        Self::request_render(tab);
    }

    fn blur(tab: &Rc<RefCell<Tab>>) {
        let focused = Self::focused_node(tab);
        if let Some(node) = focused {
            node.borrow_mut().focused = false;
            Self::request_render(tab);
        }
        tab.borrow_mut().focus = None;
    }

    fn dispatch(tab: &Rc<RefCell<Tab>>, kind: &str, node: &Rc<RefCell<HtmlNode>>) -> bool {
        let js = tab.borrow().js.clone();
        js.map(|js| js.dispatch_event(kind, node)).unwrap_or(true)
    }

    // --- Scrolling ---------------------------------------------------------

    fn max_scroll(&self) -> f32 {
        let doc_height = self.document.as_ref().map(|d| d.borrow().size.y).unwrap_or(0.0);
        (doc_height + 2.0 * VSTEP - HEIGHT).max(0.0)
    }

    pub fn scroll_down(&mut self) {
        self.scroll_y = (self.scroll_y + SCROLL_STEP).min(self.max_scroll());
    }

    pub fn scroll_up(&mut self) {
        self.scroll_y = (self.scroll_y - SCROLL_STEP).max(0.0);
    }

    pub fn scroll_by(&mut self, delta: f32) {
        self.scroll_y = (self.scroll_y - delta).clamp(0.0, self.max_scroll());
    }

    // --- Scripting entry points --------------------------------------------

    /// Runs one queued task, dropping it if its context has been discarded.
    pub fn run_task(tab: &Rc<RefCell<Tab>>, task: Task) {
        let js = tab.borrow().js.clone();
        let Some(js) = js else {
            return;
        };
        let generation = match &task {
            Task::RunScript { generation, .. }
            | Task::Timer { generation, .. }
            | Task::XhrOnload { generation, .. } => *generation,
        };
        if generation != js.generation || js.is_discarded() {
            tracing::debug!(generation, "dropping task for discarded script context");
            return;
        }
        match task {
            Task::RunScript { source, .. } => js.run(&source, "script"),
            Task::Timer { id, .. } => js.fire_timer(id),
            Task::XhrOnload { handle, body, .. } => js.xhr_onload(handle, &body),
        }
        Self::render(tab);
    }

    pub fn request_animation_frame(tab: &Rc<RefCell<Tab>>) {
        let mut borrowed = tab.borrow_mut();
        borrowed.needs_raf = true;
        borrowed.ctx.request_repaint();
    }

    /// Runs the accumulated animation-frame callbacks, then re-renders if
    /// they touched the page.
    pub fn run_animation_frame(tab: &Rc<RefCell<Tab>>) {
        tab.borrow_mut().needs_raf = false;
        let js = tab.borrow().js.clone();
        if let Some(js) = js {
            js.run_raf_handlers();
        }
        Self::render(tab);
    }

    /// XHR entry point from the bridge. Returns the response body for the
    /// synchronous form, an empty marker for a dispatched asynchronous one,
    /// and `None` when the request is blocked or fails; the script side
    /// turns `None` into an exception.
    pub fn xhr_from_script(
        tab: &Rc<RefCell<Tab>>,
        method: &str,
        url: &str,
        body: String,
        is_async: bool,
        handle: i32,
        generation: u64,
    ) -> Option<String> {
        let method = method.to_ascii_uppercase();
        let (full_url, options, runner, tab_origin) = {
            let borrowed = tab.borrow();
            let base = borrowed.url.clone()?;
            let full_url = base.resolve(url).ok()?;
            if !borrowed.allowed_request(&full_url) {
                tracing::warn!(url = %full_url, "XMLHttpRequest blocked by Content-Security-Policy");
                return None;
            }
            let payload = (method == "POST").then_some(body);
            let options = RequestOptions {
                referrer: borrowed.build_referrer(&full_url),
                initiator: Some(base.origin()),
                payload,
                jar: Some(borrowed.cookie_jar.clone()),
            };
            (full_url, options, borrowed.task_runner.clone(), base.origin())
        };

        if is_async {
            std::thread::spawn(move || match full_url.request(&options) {
                Ok(response) => {
                    if !cors_allows(&full_url, &tab_origin, &response) {
                        tracing::warn!(url = %full_url, "cross-origin XMLHttpRequest denied");
                        return;
                    }
                    runner.enqueue(Task::XhrOnload { handle, body: response.body, generation });
                }
                Err(error) => {
                    tracing::warn!(url = %full_url, %error, "asynchronous XMLHttpRequest failed");
                }
            });
            Some(String::new())
        } else {
            match full_url.request(&options) {
                Ok(response) => {
                    if !cors_allows(&full_url, &tab_origin, &response) {
                        tracing::warn!(url = %full_url, "cross-origin XMLHttpRequest denied");
                        return None;
                    }
                    Some(response.body)
                }
                Err(error) => {
                    tracing::warn!(url = %full_url, %error, "XMLHttpRequest failed");
                    None
                }
            }
        }
    }

    /// Fires a timer task after `ms` from a helper thread.
    pub fn set_timeout_from_script(tab: &Rc<RefCell<Tab>>, id: i32, ms: f64, generation: u64) {
        let runner = tab.borrow().task_runner.clone();
        let delay = Duration::from_millis(ms.max(0.0) as u64);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            runner.enqueue(Task::Timer { id, generation });
        });
    }
}

/// Parses a `Content-Security-Policy` header; only `default-src` is
/// honored, and its tokens are normalized to origins.
fn parse_csp(header: Option<&String>) -> Option<Vec<String>> {
    let header = header?;
    let mut tokens = header.split_whitespace();
    if tokens.next() != Some("default-src") {
        return None;
    }
    Some(
        tokens
            .map(|t| t.trim_end_matches(';'))
            .filter_map(|t| Url::parse(t).ok())
            .map(|u| u.origin())
            .collect(),
    )
}

fn cors_allows(url: &Url, tab_origin: &str, response: &HttpResponse) -> bool {
    if url.origin() == tab_origin {
        return true;
    }
    match response.headers.get("access-control-allow-origin") {
        Some(allowed) => allowed == "*" || allowed == tab_origin,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn tab() -> Rc<RefCell<Tab>> {
        Tab::new(egui::Context::default(), Arc::new(Mutex::new(CookieJar::new())))
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn response_with(headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            status: 200,
            reason: "OK".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<StdHashMap<_, _>>(),
            set_cookies: Vec::new(),
            body: String::new(),
        }
    }

    #[test]
    fn csp_parses_default_src_origins() {
        let header = "default-src https://self.example/ http://cdn.example:8080;".to_string();
        let allowed = parse_csp(Some(&header)).unwrap();
        assert_eq!(allowed, ["https://self.example:443", "http://cdn.example:8080"]);
        assert_eq!(parse_csp(Some(&"script-src https://x/".to_string())), None);
        assert_eq!(parse_csp(None), None);
    }

    #[test]
    fn allowed_request_matches_origins_exactly() {
        let t = tab();
        t.borrow_mut().allowed_origins = Some(vec!["https://self.example:443".to_string()]);
        assert!(t.borrow().allowed_request(&url("https://self.example/ok.js")));
        assert!(!t.borrow().allowed_request(&url("https://cdn.example/lib.js")));
        t.borrow_mut().allowed_origins = None;
        assert!(t.borrow().allowed_request(&url("https://anything.example/")));
    }

    #[test]
    fn referrer_policy_gates_the_header() {
        let t = tab();
        t.borrow_mut().url = Some(url("https://site.example/page"));

        t.borrow_mut().referrer_policy = ReferrerPolicy::NoReferrer;
        assert!(t.borrow().build_referrer(&url("https://site.example/x")).is_none());

        t.borrow_mut().referrer_policy = ReferrerPolicy::SameOrigin;
        assert!(t.borrow().build_referrer(&url("https://site.example/x")).is_some());
        assert!(t.borrow().build_referrer(&url("https://other.example/x")).is_none());

        t.borrow_mut().referrer_policy = ReferrerPolicy::Full;
        assert_eq!(
            t.borrow().build_referrer(&url("https://other.example/x")),
            Some(url("https://site.example/page"))
        );
    }

    #[test]
    fn history_push_trims_forward_entries() {
        let t = tab();
        let mut borrowed = t.borrow_mut();
        for name in ["a", "b", "c"] {
            borrowed.push_history(HistoryEntry {
                url: url(&format!("http://x.example/{name}")),
                method: "GET".to_string(),
                body: None,
            });
        }
        assert_eq!(borrowed.history_index, 2);
        borrowed.history_index = 0;
        borrowed.push_history(HistoryEntry {
            url: url("http://x.example/d"),
            method: "POST".to_string(),
            body: Some("k=v".to_string()),
        });
        let paths: Vec<&str> =
            borrowed.history.iter().map(|e| e.url.path.as_str()).collect();
        assert_eq!(paths, ["/a", "/d"]);
        assert_eq!(borrowed.history_index, 1);
        assert_eq!(borrowed.history[1].method, "POST");
    }

    #[test]
    fn cors_requires_matching_allow_origin() {
        let target = url("https://api.example/data");
        let tab_origin = "https://site.example:443";
        assert!(cors_allows(&target, &target.origin(), &response_with(&[])));
        assert!(cors_allows(&target, tab_origin, &response_with(&[("access-control-allow-origin", "*")])));
        assert!(cors_allows(
            &target,
            tab_origin,
            &response_with(&[("access-control-allow-origin", "https://site.example:443")])
        ));
        assert!(!cors_allows(&target, tab_origin, &response_with(&[])));
        assert!(!cors_allows(
            &target,
            tab_origin,
            &response_with(&[("access-control-allow-origin", "https://evil.example")])
        ));
    }

    #[test]
    fn referrer_policy_header_values() {
        assert_eq!(
            ReferrerPolicy::parse(Some(&"no-referrer".to_string())),
            ReferrerPolicy::NoReferrer
        );
        assert_eq!(
            ReferrerPolicy::parse(Some(&"same-origin".to_string())),
            ReferrerPolicy::SameOrigin
        );
        assert_eq!(ReferrerPolicy::parse(Some(&"unsafe-url".to_string())), ReferrerPolicy::Full);
        assert_eq!(ReferrerPolicy::parse(None), ReferrerPolicy::Full);
    }
}

/// End-to-end scenarios against a loopback HTTP/1.0 server, in the shape of
/// the guestbook the browser was grown against.
#[cfg(test)]
mod e2e_tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::time::Duration;

    use egui::Pos2;

    use crate::node::{HtmlNode, HtmlNodeType};

    #[derive(Clone, Debug)]
    struct TestRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
    }

    fn read_request(stream: &mut TcpStream) -> Option<TestRequest> {
        let mut reader = BufReader::new(stream.try_clone().ok()?);
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let mut parts = line.trim_end().split(' ');
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();
        let mut headers = HashMap::new();
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).ok()?;
            let header = header.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
            }
        }
        let length: usize =
            headers.get("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
        let mut body = vec![0u8; length];
        if length > 0 {
            reader.read_exact(&mut body).ok()?;
        }
        Some(TestRequest { method, path, headers, body: String::from_utf8_lossy(&body).into_owned() })
    }

    fn write_response(stream: &mut TcpStream, status: &str, extra_headers: &[String], body: &str) {
        let mut response = format!("HTTP/1.0 {}\r\nContent-Length: {}\r\n", status, body.len());
        for header in extra_headers {
            response.push_str(header);
            response.push_str("\r\n");
        }
        response.push_str("\r\n");
        response.push_str(body);
        let _ = stream.write_all(response.as_bytes());
    }

    fn guestbook_page(entries: &[String]) -> String {
        let mut out = String::from("<!doctype html>");
        for entry in entries {
            out.push_str(&format!("<p>{}</p>", entry));
        }
        out.push_str("<form action=/add method=post>");
        out.push_str("<p><input name=guest value=Your+name></p>");
        out.push_str("<p><button>Sign the book!</button></p>");
        out.push_str("</form>");
        out
    }

    /// A stateful guestbook server: GET / lists entries and sets a session
    /// cookie, POST /add appends an entry.
    fn serve_guestbook() -> (String, mpsc::Receiver<TestRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut entries = vec!["Pavel was here".to_string()];
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let Some(request) = read_request(&mut stream) else { continue };
                let _ = tx.send(request.clone());
                match (request.method.as_str(), request.path.as_str()) {
                    ("GET", "/") => write_response(
                        &mut stream,
                        "200 OK",
                        &["Set-Cookie: sid=abc; SameSite=Lax; HttpOnly".to_string()],
                        &guestbook_page(&entries),
                    ),
                    ("POST", "/add") => {
                        if let Some(guest) = request
                            .body
                            .split('&')
                            .find_map(|field| field.strip_prefix("guest="))
                        {
                            entries.push(guest.to_string());
                        }
                        write_response(&mut stream, "200 OK", &[], &guestbook_page(&entries));
                    }
                    ("GET", _) => {
                        write_response(&mut stream, "200 OK", &[], &guestbook_page(&entries))
                    }
                    _ => write_response(&mut stream, "404 Not Found", &[], "<h1>not found</h1>"),
                }
            }
        });
        (format!("http://127.0.0.1:{}/", port), rx)
    }

    struct Page {
        path: &'static str,
        body: String,
        headers: Vec<String>,
        delay: Duration,
    }

    /// A static-page server with optional per-page response delays.
    fn serve_pages(pages: Vec<Page>) -> (String, mpsc::Receiver<TestRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let Some(request) = read_request(&mut stream) else { continue };
                let _ = tx.send(request.clone());
                match pages.iter().find(|p| p.path == request.path) {
                    Some(page) => {
                        if !page.delay.is_zero() {
                            std::thread::sleep(page.delay);
                        }
                        write_response(&mut stream, "200 OK", &page.headers, &page.body);
                    }
                    None => write_response(&mut stream, "404 Not Found", &[], "missing"),
                }
            }
        });
        (format!("http://127.0.0.1:{}/", port), rx)
    }

    fn browser_tab() -> Rc<RefCell<Tab>> {
        let ctx = egui::Context::default();
        // One empty frame so layout can measure text.
        let _ = ctx.run(egui::RawInput::default(), |_| {});
        Tab::new(ctx, Arc::new(Mutex::new(CookieJar::new())))
    }

    fn find_element(tab: &Rc<RefCell<Tab>>, tag: &str) -> Rc<RefCell<HtmlNode>> {
        let root = tab.borrow().nodes.clone().expect("document loaded");
        HtmlNode::tree_to_vec(&root)
            .into_iter()
            .find(|n| n.borrow().is_element(tag))
            .expect("element present")
    }

    fn page_text(tab: &Rc<RefCell<Tab>>) -> String {
        let root = tab.borrow().nodes.clone().expect("document loaded");
        HtmlNode::text_content(&root)
    }

    #[test]
    fn sign_the_book_flow() {
        let (base, requests) = serve_guestbook();
        let tab = browser_tab();
        Tab::load(&tab, Url::parse(&base).expect("base url"), None);

        let first = requests.recv_timeout(Duration::from_secs(5)).expect("initial GET");
        assert_eq!((first.method.as_str(), first.path.as_str()), ("GET", "/"));
        assert!(page_text(&tab).contains("Pavel was here"));
        assert!(!tab.borrow().display_list.is_empty());

        // Click the guest input: it focuses and clears.
        let input_rect = tab
            .borrow()
            .widget_boxes
            .iter()
            .find_map(|(node, rect)| {
                let node = node.upgrade()?;
                (node.borrow().attr("name").as_deref() == Some("guest")).then_some(*rect)
            })
            .expect("guest input laid out");
        Tab::click(
            &tab,
            Pos2::new((input_rect.left + input_rect.right) / 2.0, (input_rect.top + input_rect.bottom) / 2.0),
        );
        let input = find_element(&tab, "input");
        assert!(input.borrow().focused);
        assert_eq!(input.borrow().attr("value").as_deref(), Some(""));

        for ch in "Alice".chars() {
            Tab::keypress(&tab, ch);
        }
        assert_eq!(input.borrow().attr("value").as_deref(), Some("Alice"));

        // Enter submits the surrounding form as a POST.
        Tab::enter(&tab);
        let post = requests.recv_timeout(Duration::from_secs(5)).expect("form POST");
        assert_eq!((post.method.as_str(), post.path.as_str()), ("POST", "/add"));
        assert_eq!(post.body, "guest=Alice");
        // Same-site POST still carries the Lax cookie set on the first load.
        assert_eq!(post.headers.get("cookie").map(String::as_str), Some("sid=abc"));
        assert!(page_text(&tab).contains("Alice"));

        {
            let borrowed = tab.borrow();
            assert_eq!(borrowed.history.len(), 2);
            assert_eq!(borrowed.history[1].method, "POST");
            assert_eq!(borrowed.history[1].body.as_deref(), Some("guest=Alice"));
        }

        // HttpOnly: invisible to scripts.
        let js = tab.borrow().js.clone().expect("script context");
        assert_eq!(js.evaluate("document.cookie"), Some(String::new()));

        // Reload re-issues a GET, never the POST.
        Tab::reload(&tab);
        let reload = requests.recv_timeout(Duration::from_secs(5)).expect("reload GET");
        assert_eq!((reload.method.as_str(), reload.path.as_str()), ("GET", "/add"));

        // Synchronous XHR blocks and hands the body straight back.
        let js = tab.borrow().js.clone().expect("script context");
        let fetched = js
            .evaluate(
                "var xhr = new XMLHttpRequest(); xhr.open('GET', '/', false); xhr.send();",
            )
            .expect("sync xhr body");
        assert!(fetched.contains("Pavel was here"));
    }

    #[test]
    fn cross_site_post_omits_lax_cookie() {
        let (base, requests) = serve_guestbook();
        let url = Url::parse(&base).expect("base url");
        let jar = Arc::new(Mutex::new(CookieJar::new()));

        url.request(&RequestOptions { jar: Some(jar.clone()), ..Default::default() })
            .expect("seed cookie");
        let _ = requests.recv_timeout(Duration::from_secs(5));

        // Same-origin POST carries the cookie.
        url.resolve("/add")
            .expect("resolve")
            .request(&RequestOptions {
                jar: Some(jar.clone()),
                initiator: Some(url.origin()),
                payload: Some("guest=x".to_string()),
                ..Default::default()
            })
            .expect("same-site POST");
        let same_site = requests.recv_timeout(Duration::from_secs(5)).expect("request");
        assert_eq!(same_site.headers.get("cookie").map(String::as_str), Some("sid=abc"));

        // Cross-site POST omits it.
        url.resolve("/add")
            .expect("resolve")
            .request(&RequestOptions {
                jar: Some(jar.clone()),
                initiator: Some("http://evil.test:80".to_string()),
                payload: Some("guest=y".to_string()),
                ..Default::default()
            })
            .expect("cross-site POST");
        let cross_site = requests.recv_timeout(Duration::from_secs(5)).expect("request");
        assert_eq!(cross_site.headers.get("cookie"), None);
    }

    #[test]
    fn csp_blocks_script_fetch_and_prevents_retry() {
        let (base, requests) = serve_pages(vec![Page {
            path: "/",
            body: "<script src=/app.js></script><p>hi</p>".to_string(),
            headers: vec!["Content-Security-Policy: default-src http://allowed.example/".to_string()],
            delay: Duration::ZERO,
        }]);
        let tab = browser_tab();
        Tab::load(&tab, Url::parse(&base).expect("base url"), None);

        // A second rescan must not retry the blocked fetch either.
        tab.borrow_mut().needs_render = true;
        Tab::render(&tab);

        let first = requests.recv_timeout(Duration::from_secs(5)).expect("page GET");
        assert_eq!(first.path, "/");
        assert!(
            requests.recv_timeout(Duration::from_millis(300)).is_err(),
            "blocked script was fetched"
        );

        // A blocked XHR fails with a script-visible error instead.
        let js = tab.borrow().js.clone().expect("script context");
        let outcome = js.evaluate(
            "var r; try { var x = new XMLHttpRequest(); \
             x.open('GET', 'http://blocked.example/data', false); x.send(); r = 'ok'; } \
             catch (e) { r = 'blocked'; } r",
        );
        assert_eq!(outcome, Some("blocked".to_string()));
    }

    #[test]
    fn fetched_script_runs_as_a_task_and_rerenders() {
        let (base, requests) = serve_pages(vec![
            Page {
                path: "/",
                body: "<p id=target>old</p><script src=/app.js></script>".to_string(),
                headers: Vec::new(),
                delay: Duration::ZERO,
            },
            Page {
                path: "/app.js",
                body: "target.innerHTML = 'fresh';".to_string(),
                headers: Vec::new(),
                delay: Duration::ZERO,
            },
        ]);
        let tab = browser_tab();
        Tab::load(&tab, Url::parse(&base).expect("base url"), None);

        let paths: Vec<String> = (0..2)
            .map(|_| requests.recv_timeout(Duration::from_secs(5)).expect("request").path)
            .collect();
        assert_eq!(paths, ["/", "/app.js"]);

        // The fetched source was queued, not run inline.
        assert!(page_text(&tab).contains("old"));
        let runner = tab.borrow().task_runner.clone();
        while let Some(task) = runner.try_dequeue() {
            Tab::run_task(&tab, task);
        }
        assert!(page_text(&tab).contains("fresh"));

        let p = find_element(&tab, "p");
        match &p.borrow().children[0].borrow().node_type {
            HtmlNodeType::Text(t) => assert_eq!(t.text, "fresh"),
            HtmlNodeType::Element(_) => panic!("expected text child"),
        }
    }

    #[test]
    fn tls_failure_sets_cert_error_and_keeps_previous_document() {
        let (base, _requests) = serve_pages(vec![Page {
            path: "/",
            body: "<p>safe page</p>".to_string(),
            headers: Vec::new(),
            delay: Duration::ZERO,
        }]);
        let tab = browser_tab();
        Tab::load(&tab, Url::parse(&base).expect("base url"), None);
        assert!(page_text(&tab).contains("safe page"));

        // A listener that hangs up mid-handshake: the client sees a TLS
        // failure, not a response.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                drop(stream);
            }
        });
        let https = Url::parse(&format!("https://127.0.0.1:{}/", port)).expect("https url");
        Tab::load(&tab, https, None);

        let borrowed = tab.borrow();
        assert!(borrowed.cert_error);
        assert!(borrowed.status_message.is_some());
        drop(borrowed);
        // The previous document stays up.
        assert!(page_text(&tab).contains("safe page"));
    }

    #[test]
    fn async_xhr_from_a_discarded_context_is_dropped() {
        let (base, _requests) = serve_pages(vec![
            Page {
                path: "/",
                body: "<p>first</p>".to_string(),
                headers: Vec::new(),
                delay: Duration::ZERO,
            },
            Page {
                path: "/slow",
                body: "late data".to_string(),
                headers: Vec::new(),
                delay: Duration::from_millis(400),
            },
            Page {
                path: "/other",
                body: "<p>second</p>".to_string(),
                headers: Vec::new(),
                delay: Duration::ZERO,
            },
        ]);
        let tab = browser_tab();
        let base_url = Url::parse(&base).expect("base url");
        Tab::load(&tab, base_url.clone(), None);

        let old_generation = tab.borrow().js.clone().expect("script context").generation;
        let started =
            Tab::xhr_from_script(&tab, "GET", "/slow", String::new(), true, 1, old_generation);
        assert_eq!(started, Some(String::new()));

        // Navigate away while the request is in flight.
        Tab::load(&tab, base_url.resolve("/other").expect("resolve"), None);
        std::thread::sleep(Duration::from_millis(700));

        let runner = tab.borrow().task_runner.clone();
        let task = runner.try_dequeue().expect("response arrived");
        let stale_generation = match &task {
            Task::XhrOnload { generation, .. } => *generation,
            other => panic!("unexpected task {:?}", other),
        };
        assert_ne!(stale_generation, tab.borrow().js.clone().expect("context").generation);
        // Running it is a no-op on the new page.
        Tab::run_task(&tab, task);
        assert!(page_text(&tab).contains("second"));
    }
}
