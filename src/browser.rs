use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eframe::egui;
use egui::{Align2, Color32, Event, FontId, Key, PointerButton, Pos2};

use crate::cookies::{COOKIE_JAR, CookieJar};
use crate::layout::HEIGHT;
use crate::tab::Tab;
use crate::url::Url;

/// Animation-frame cadence while a page has callbacks pending.
const REFRESH_RATE: Duration = Duration::from_millis(33);

/// The window-toolkit seam: routes egui input into the active tab, drains
/// task queues once per tick, and executes the tab's display list.
pub struct Browser {
    tabs: Vec<Rc<RefCell<Tab>>>,
    active: usize,
    cookie_jar: Arc<Mutex<CookieJar>>,
}

impl Browser {
    /// Configures the initial context and opens the first tab.
    pub fn new(cc: &eframe::CreationContext<'_>, initial_url: Option<String>) -> Self {
        // Enforce light mode so black text is visible against the page.
        cc.egui_ctx.set_visuals(egui::Visuals::light());

        let cookie_jar = COOKIE_JAR.clone();
        let tab = Tab::new(cc.egui_ctx.clone(), cookie_jar.clone());
        if let Some(raw) = initial_url {
            match Url::parse(&raw) {
                Ok(url) => Tab::load(&tab, url, None),
                Err(error) => tracing::error!(%error, url = %raw, "cannot open initial URL"),
            }
        }
        Browser { tabs: vec![tab], active: 0, cookie_jar }
    }

    pub fn new_tab(&mut self, ctx: &egui::Context) -> Rc<RefCell<Tab>> {
        let tab = Tab::new(ctx.clone(), self.cookie_jar.clone());
        self.tabs.push(tab.clone());
        self.active = self.tabs.len() - 1;
        tab
    }

    fn active_tab(&self) -> Rc<RefCell<Tab>> {
        self.tabs[self.active].clone()
    }

    fn handle_events(&mut self, ctx: &egui::Context) {
        let tab = self.active_tab();
        let events = ctx.input(|i| i.events.clone());
        for event in events {
            match event {
                Event::PointerButton {
                    pos,
                    button: PointerButton::Primary,
                    pressed: true,
                    ..
                } => Tab::click(&tab, pos),
                Event::Text(text) => {
                    for ch in text.chars() {
                        Tab::keypress(&tab, ch);
                    }
                }
                Event::Key { key: Key::T, pressed: true, modifiers, .. } if modifiers.ctrl => {
                    self.new_tab(ctx);
                }
                Event::Key { key: Key::Enter, pressed: true, .. } => Tab::enter(&tab),
                Event::Key { key: Key::Backspace, pressed: true, .. } => Tab::backspace(&tab),
                Event::Key { key: Key::ArrowLeft, pressed: true, modifiers, .. }
                    if modifiers.alt =>
                {
                    Tab::back(&tab);
                }
                Event::Key { key: Key::ArrowRight, pressed: true, modifiers, .. }
                    if modifiers.alt =>
                {
                    Tab::forward(&tab);
                }
                Event::Key { key: Key::ArrowDown, pressed: true, .. } => {
                    tab.borrow_mut().scroll_down()
                }
                Event::Key { key: Key::ArrowUp, pressed: true, .. } => {
                    tab.borrow_mut().scroll_up()
                }
                Event::MouseWheel { delta, .. } => tab.borrow_mut().scroll_by(delta.y),
                _ => {}
            }
        }
    }

    /// One queue pass per tick; tasks run to completion on this thread.
    fn drain_tasks(&mut self) {
        for tab in self.tabs.clone() {
            let runner = tab.borrow().task_runner.clone();
            while let Some(task) = runner.try_dequeue() {
                Tab::run_task(&tab, task);
            }
        }
    }

    fn draw_page(&self, ctx: &egui::Context) {
        let tab = self.active_tab();
        egui::CentralPanel::default()
            .frame(egui::Frame::new().fill(Color32::WHITE))
            .show(ctx, |ui| {
                let painter = ui.painter();
                let borrowed = tab.borrow();
                let scroll = borrowed.scroll_y;
                for command in &borrowed.display_list {
                    // Skip primitives that are entirely off-screen.
                    if command.bottom() < scroll || command.top() > scroll + HEIGHT {
                        continue;
                    }
                    command.execute(scroll, painter);
                }
                if let Some(message) = &borrowed.status_message {
                    painter.text(
                        Pos2::new(4.0, HEIGHT - 4.0),
                        Align2::LEFT_BOTTOM,
                        message,
                        FontId::proportional(12.0),
                        Color32::DARK_RED,
                    );
                }
            });
    }
}

impl eframe::App for Browser {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_events(ctx);
        self.drain_tasks();

        let tab = self.active_tab();
        if tab.borrow().needs_raf {
            Tab::run_animation_frame(&tab);
            ctx.request_repaint_after(REFRESH_RATE);
        }
        Tab::render(&tab);

        self.draw_page(ctx);
    }
}
