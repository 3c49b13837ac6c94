mod app;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use eframe::egui;
use tokio::runtime::Handle;

use crate::batch::BatchRunner;
use crate::browser::BrowserSession;
use crate::config::Config;
use crate::phone_resolver::PhoneResolver;
use crate::receita::ReceitaClient;

pub use app::CnpjApp;

const WINDOW_TITLE: &str = "Consulta CNPJ";

/// Opens the desktop window and blocks until it is closed. Work triggered
/// from the window runs on `runtime`.
pub fn run(runtime: Handle, config: &Config, session: Option<Arc<BrowserSession>>) -> Result<()> {
    let registry = Arc::new(ReceitaClient::new(config)?);
    let batch = Arc::new(BatchRunner::new(
        Arc::clone(&registry),
        config.rate_limit,
        config.output_file.clone(),
    ));
    let resolver = session.map(|session| Arc::new(PhoneResolver::new(session)));

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size([780.0, 620.0])
            .with_resizable(false),
        ..Default::default()
    };

    eframe::run_native(
        WINDOW_TITLE,
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
            Ok(Box::new(CnpjApp::new(runtime, registry, batch, resolver)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Desktop window failed: {e}"))
}
