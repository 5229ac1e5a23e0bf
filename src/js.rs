use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use rquickjs::function::Func;
use rquickjs::{Context, Runtime};

use crate::css_parser::CssParser;
use crate::html_parser::HtmlParser;
use crate::node::{HtmlNode, HtmlNodeType};
use crate::style::INHERITED_PROPERTIES;
use crate::tab::Tab;

const RUNTIME_JS: &str = include_str!("../assets/runtime.js");

/// Two matched maps translating between DOM nodes and the integer handles
/// scripts hold. Handles are assigned lazily, increase monotonically, and
/// stay valid for the life of the script context.
pub struct HandleTable {
    next: Cell<i32>,
    by_ptr: RefCell<HashMap<usize, i32>>,
    by_handle: RefCell<HashMap<i32, Rc<RefCell<HtmlNode>>>>,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            next: Cell::new(1),
            by_ptr: RefCell::new(HashMap::new()),
            by_handle: RefCell::new(HashMap::new()),
        }
    }

    pub fn get_or_assign(&self, node: &Rc<RefCell<HtmlNode>>) -> i32 {
        let key = Rc::as_ptr(node) as usize;
        if let Some(handle) = self.by_ptr.borrow().get(&key) {
            return *handle;
        }
        let handle = self.next.get();
        self.next.set(handle + 1);
        self.by_ptr.borrow_mut().insert(key, handle);
        self.by_handle.borrow_mut().insert(handle, node.clone());
        handle
    }

    pub fn node_for(&self, handle: i32) -> Option<Rc<RefCell<HtmlNode>>> {
        self.by_handle.borrow().get(&handle).cloned()
    }
}

/// One tab's sandboxed script world: a QuickJS context, the handle table,
/// and the discarded flag stale callbacks check before touching anything.
///
/// The tables are never cleared on navigation; the whole context is dropped
/// once the discarded bit is set, which keeps handles stable while stale
/// callbacks unwind.
pub struct JsContext {
    _runtime: Runtime,
    context: Context,
    pub handles: Rc<HandleTable>,
    discarded: Rc<Cell<bool>>,
    pub generation: u64,
}

impl JsContext {
    pub fn new(tab: Weak<RefCell<Tab>>, generation: u64) -> rquickjs::Result<JsContext> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;
        let handles = Rc::new(HandleTable::new());
        let discarded = Rc::new(Cell::new(false));
        context.with(|ctx| -> rquickjs::Result<()> {
            register_natives(&ctx, &tab, &handles, &discarded, generation)?;
            ctx.eval::<rquickjs::Value, _>(RUNTIME_JS).map(|_| ())
        })?;
        Ok(JsContext { _runtime: runtime, context, handles, discarded, generation })
    }

    pub fn discard(&self) {
        self.discarded.set(true);
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded.get()
    }

    /// Runs script source, logging one error at the boundary on failure.
    pub fn run(&self, source: &str, label: &str) {
        if self.discarded.get() {
            return;
        }
        self.context.with(|ctx| {
            if let Err(error) = ctx.eval::<rquickjs::Value, _>(source).map(|_| ()) {
                report_error(&ctx, label, error);
            }
        });
    }

    /// Evaluates an expression and returns its string result, mainly for
    /// tests and debugging.
    pub fn evaluate(&self, source: &str) -> Option<String> {
        if self.discarded.get() {
            return None;
        }
        self.context.with(|ctx| match ctx.eval::<String, _>(source) {
            Ok(value) => Some(value),
            Err(error) => {
                report_error(&ctx, "evaluate", error);
                None
            }
        })
    }

    /// Dispatches an event of `kind` at `node`, bubbling script-side.
    /// Returns whether the default action should still run; errors never
    /// cancel the default.
    pub fn dispatch_event(&self, kind: &str, node: &Rc<RefCell<HtmlNode>>) -> bool {
        if self.discarded.get() {
            return true;
        }
        let handle = self.handles.get_or_assign(node);
        self.context.with(|ctx| {
            let result: rquickjs::Result<bool> = (|| {
                let dispatch: rquickjs::Function = ctx.globals().get("__dispatchEvent")?;
                dispatch.call((handle, kind))
            })();
            match result {
                Ok(do_default) => do_default,
                Err(error) => {
                    report_error(&ctx, "dispatchEvent", error);
                    true
                }
            }
        })
    }

    pub fn fire_timer(&self, id: i32) {
        if self.discarded.get() {
            return;
        }
        self.context.with(|ctx| {
            let result: rquickjs::Result<()> = (|| {
                let fire: rquickjs::Function = ctx.globals().get("__fireTimer")?;
                fire.call::<_, rquickjs::Value>((id,)).map(|_| ())
            })();
            if let Err(error) = result {
                report_error(&ctx, "setTimeout", error);
            }
        });
    }

    pub fn xhr_onload(&self, handle: i32, body: &str) {
        if self.discarded.get() {
            return;
        }
        self.context.with(|ctx| {
            let result: rquickjs::Result<()> = (|| {
                let onload: rquickjs::Function = ctx.globals().get("__xhrOnload")?;
                onload.call::<_, rquickjs::Value>((handle, body)).map(|_| ())
            })();
            if let Err(error) = result {
                report_error(&ctx, "XMLHttpRequest onload", error);
            }
        });
    }

    /// Runs and resets the callbacks accumulated by requestAnimationFrame.
    pub fn run_raf_handlers(&self) {
        self.run("__runRAFHandlers()", "requestAnimationFrame");
    }

    /// (Re-)binds `id` attributes as script globals, so `<p id=para>` is
    /// reachable as `para`.
    pub fn rebind_id_globals(&self, root: &Rc<RefCell<HtmlNode>>) {
        if self.discarded.get() {
            return;
        }
        let mut script = String::new();
        for node in HtmlNode::tree_to_vec(root) {
            let Some(id) = node.borrow().attr("id") else {
                continue;
            };
            if !is_valid_identifier(&id) {
                continue;
            }
            let handle = self.handles.get_or_assign(&node);
            script.push_str(&format!("var {} = new Node({});\n", id, handle));
        }
        if !script.is_empty() {
            self.run(&script, "id bindings");
        }
    }
}

fn is_valid_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn report_error(ctx: &rquickjs::Ctx, label: &str, error: rquickjs::Error) {
    match error {
        rquickjs::Error::Exception => {
            let caught = ctx.catch();
            tracing::error!(target: "js", "script error in {label}: {caught:?}");
        }
        other => {
            tracing::error!(target: "js", "script error in {label}: {other}");
        }
    }
}

/// Installs the `dom_*`/`browser_*` primitives the runtime glue wraps.
/// Every closure re-checks the discarded flag and treats unknown handles as
/// no-ops; a dead page must never crash a live callback.
fn register_natives(
    ctx: &rquickjs::Ctx,
    tab: &Weak<RefCell<Tab>>,
    handles: &Rc<HandleTable>,
    discarded: &Rc<Cell<bool>>,
    generation: u64,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        "browser_log",
        Func::from(|message: String| {
            tracing::info!(target: "js", "{message}");
        }),
    )?;

    {
        let (tab, handles, discarded) = (tab.clone(), handles.clone(), discarded.clone());
        globals.set(
            "dom_query_selector_all",
            Func::from(move |selector: String| -> Vec<i32> {
                if discarded.get() {
                    return Vec::new();
                }
                let Some(tab) = tab.upgrade() else {
                    return Vec::new();
                };
                let Some(root) = tab.borrow().nodes.clone() else {
                    return Vec::new();
                };
                let Ok(parsed) = CssParser::new(&selector).selector() else {
                    return Vec::new();
                };
                HtmlNode::tree_to_vec(&root)
                    .iter()
                    .filter(|n| parsed.matches(n))
                    .map(|n| handles.get_or_assign(n))
                    .collect()
            }),
        )?;
    }

    {
        let (handles, discarded) = (handles.clone(), discarded.clone());
        globals.set(
            "dom_get_attribute",
            Func::from(move |handle: i32, name: String| -> String {
                if discarded.get() {
                    return String::new();
                }
                handles
                    .node_for(handle)
                    .and_then(|n| n.borrow().attr(&name.to_ascii_lowercase()))
                    .unwrap_or_default()
            }),
        )?;
    }

    {
        let (tab, handles, discarded) = (tab.clone(), handles.clone(), discarded.clone());
        globals.set(
            "dom_set_attribute",
            Func::from(move |handle: i32, name: String, value: String| {
                if discarded.get() {
                    return;
                }
                let Some(node) = handles.node_for(handle) else {
                    return;
                };
                node.borrow_mut().set_attr(&name, &value);
                if let Some(tab) = tab.upgrade() {
                    Tab::on_bridge_mutation(&tab);
                }
            }),
        )?;
    }

    {
        let (handles, discarded) = (handles.clone(), discarded.clone());
        globals.set(
            "dom_children",
            Func::from(move |handle: i32| -> Vec<i32> {
                if discarded.get() {
                    return Vec::new();
                }
                let Some(node) = handles.node_for(handle) else {
                    return Vec::new();
                };
                let children = node.borrow().children.clone();
                children
                    .iter()
                    .filter(|c| matches!(c.borrow().node_type, HtmlNodeType::Element(_)))
                    .map(|c| handles.get_or_assign(c))
                    .collect()
            }),
        )?;
    }

    {
        let (handles, discarded) = (handles.clone(), discarded.clone());
        globals.set(
            "dom_parent",
            Func::from(move |handle: i32| -> i32 {
                if discarded.get() {
                    return -1;
                }
                handles
                    .node_for(handle)
                    .and_then(|n| n.borrow().parent_node())
                    .map(|p| handles.get_or_assign(&p))
                    .unwrap_or(-1)
            }),
        )?;
    }

    {
        let (handles, discarded) = (handles.clone(), discarded.clone());
        globals.set(
            "dom_create_element",
            Func::from(move |tag: String| -> i32 {
                if discarded.get() {
                    return -1;
                }
                let node = HtmlNode::new_element(&tag.to_ascii_lowercase(), HashMap::new());
                {
                    let mut borrowed = node.borrow_mut();
                    for (property, default) in INHERITED_PROPERTIES.iter() {
                        borrowed.style.insert(property.to_string(), default.to_string());
                    }
                }
                handles.get_or_assign(&node)
            }),
        )?;
    }

    {
        let (tab, handles, discarded) = (tab.clone(), handles.clone(), discarded.clone());
        globals.set(
            "dom_append_child",
            Func::from(move |parent: i32, child: i32| {
                if discarded.get() {
                    return;
                }
                let (Some(parent), Some(child)) = (handles.node_for(parent), handles.node_for(child))
                else {
                    return;
                };
                // Refuse to create a cycle.
                if HtmlNode::tree_to_vec(&child).iter().any(|n| Rc::ptr_eq(n, &parent)) {
                    return;
                }
                HtmlNode::append_child(&parent, &child);
                if let Some(tab) = tab.upgrade() {
                    Tab::on_bridge_mutation(&tab);
                }
            }),
        )?;
    }

    {
        let (tab, handles, discarded) = (tab.clone(), handles.clone(), discarded.clone());
        globals.set(
            "dom_insert_before",
            Func::from(move |parent: i32, child: i32, reference: i32| {
                if discarded.get() {
                    return;
                }
                let (Some(parent), Some(child)) = (handles.node_for(parent), handles.node_for(child))
                else {
                    return;
                };
                if HtmlNode::tree_to_vec(&child).iter().any(|n| Rc::ptr_eq(n, &parent)) {
                    return;
                }
                let reference = if reference < 0 { None } else { handles.node_for(reference) };
                HtmlNode::insert_before(&parent, &child, reference.as_ref());
                if let Some(tab) = tab.upgrade() {
                    Tab::on_bridge_mutation(&tab);
                }
            }),
        )?;
    }

    {
        let (tab, handles, discarded) = (tab.clone(), handles.clone(), discarded.clone());
        globals.set(
            "dom_remove_child",
            Func::from(move |parent: i32, child: i32| {
                if discarded.get() {
                    return;
                }
                let (Some(parent), Some(child)) = (handles.node_for(parent), handles.node_for(child))
                else {
                    return;
                };
                HtmlNode::remove_child(&parent, &child);
                if let Some(tab) = tab.upgrade() {
                    Tab::on_bridge_mutation(&tab);
                }
            }),
        )?;
    }

    {
        let (handles, discarded) = (handles.clone(), discarded.clone());
        globals.set(
            "dom_inner_html_get",
            Func::from(move |handle: i32| -> String {
                if discarded.get() {
                    return String::new();
                }
                handles
                    .node_for(handle)
                    .map(|n| HtmlNode::serialize_children(&n))
                    .unwrap_or_default()
            }),
        )?;
    }

    {
        let (handles, discarded) = (handles.clone(), discarded.clone());
        globals.set(
            "dom_outer_html_get",
            Func::from(move |handle: i32| -> String {
                if discarded.get() {
                    return String::new();
                }
                handles.node_for(handle).map(|n| HtmlNode::serialize(&n)).unwrap_or_default()
            }),
        )?;
    }

    {
        let (tab, handles, discarded) = (tab.clone(), handles.clone(), discarded.clone());
        globals.set(
            "dom_inner_html_set",
            Func::from(move |handle: i32, source: String| {
                if discarded.get() {
                    return;
                }
                let Some(node) = handles.node_for(handle) else {
                    return;
                };
                // Reparse as a document body, then adopt the children in one
                // swap so the tree is never half-replaced.
                let doc = HtmlParser::new(&format!("<html><body>{}</body></html>", source)).parse();
                let body = doc
                    .borrow()
                    .children
                    .iter()
                    .find(|c| c.borrow().is_element("body"))
                    .cloned();
                let new_children = body.map(|b| b.borrow().children.clone()).unwrap_or_default();
                let old_children = std::mem::take(&mut node.borrow_mut().children);
                for old in old_children {
                    old.borrow_mut().parent = None;
                }
                for new in &new_children {
                    new.borrow_mut().parent = Some(Rc::downgrade(&node));
                }
                node.borrow_mut().children = new_children;
                if let Some(tab) = tab.upgrade() {
                    Tab::on_bridge_mutation(&tab);
                }
            }),
        )?;
    }

    {
        let (tab, handles, discarded) = (tab.clone(), handles.clone(), discarded.clone());
        globals.set(
            "dom_style_set",
            Func::from(move |handle: i32, value: String| {
                if discarded.get() {
                    return;
                }
                let Some(node) = handles.node_for(handle) else {
                    return;
                };
                node.borrow_mut().set_attr("style", &value);
                if let Some(tab) = tab.upgrade() {
                    Tab::on_bridge_mutation(&tab);
                }
            }),
        )?;
    }

    {
        let (tab, discarded) = (tab.clone(), discarded.clone());
        globals.set(
            "browser_cookie_get",
            Func::from(move || -> String {
                if discarded.get() {
                    return String::new();
                }
                let Some(tab) = tab.upgrade() else {
                    return String::new();
                };
                let (jar, origin) = {
                    let borrowed = tab.borrow();
                    match &borrowed.url {
                        Some(url) => (borrowed.cookie_jar.clone(), url.origin()),
                        None => return String::new(),
                    }
                };
                jar.lock().expect("cookie jar poisoned").script_string(&origin)
            }),
        )?;
    }

    {
        let (tab, discarded) = (tab.clone(), discarded.clone());
        globals.set(
            "browser_cookie_set",
            Func::from(move |value: String| {
                if discarded.get() {
                    return;
                }
                let Some(tab) = tab.upgrade() else {
                    return;
                };
                let (jar, origin) = {
                    let borrowed = tab.borrow();
                    match &borrowed.url {
                        Some(url) => (borrowed.cookie_jar.clone(), url.origin()),
                        None => return,
                    }
                };
                jar.lock().expect("cookie jar poisoned").set_from_script(&origin, &value);
            }),
        )?;
    }

    {
        let (tab, discarded) = (tab.clone(), discarded.clone());
        globals.set(
            "browser_xhr_send",
            Func::from(
                move |method: String, url: String, body: String, is_async: bool, handle: i32| -> Option<String> {
                    if discarded.get() {
                        return None;
                    }
                    let tab = tab.upgrade()?;
                    Tab::xhr_from_script(&tab, &method, &url, body, is_async, handle, generation)
                },
            ),
        )?;
    }

    {
        let (tab, discarded) = (tab.clone(), discarded.clone());
        globals.set(
            "browser_set_timeout",
            Func::from(move |id: i32, ms: f64| {
                if discarded.get() {
                    return;
                }
                let Some(tab) = tab.upgrade() else {
                    return;
                };
                Tab::set_timeout_from_script(&tab, id, ms, generation);
            }),
        )?;
    }

    {
        let (tab, discarded) = (tab.clone(), discarded.clone());
        globals.set(
            "browser_request_animation_frame",
            Func::from(move || {
                if discarded.get() {
                    return;
                }
                let Some(tab) = tab.upgrade() else {
                    return;
                };
                Tab::request_animation_frame(&tab);
            }),
        )?;
    }

    Ok(())
}
