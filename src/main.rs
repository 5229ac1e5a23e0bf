mod browser;
mod cookies;
mod css_parser;
mod fonts;
mod html_parser;
mod js;
mod layout;
mod node;
mod paint;
mod rect;
mod selector;
mod style;
mod tab;
mod task;
mod url;

use tracing_subscriber::EnvFilter;

use crate::browser::Browser;
use crate::layout::{HEIGHT, WIDTH};

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let initial_url = std::env::args().nth(1);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([WIDTH, HEIGHT]),
        ..Default::default()
    };
    eframe::run_native(
        "RipCurl",
        options,
        Box::new(|cc| Ok(Box::new(Browser::new(cc, initial_url)))),
    )
}
