use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use super::state::{AppState, BatchProgress, Mode, PanelState, UiEvent};
use crate::batch::BatchRunner;
use crate::browser::BrowserSession;
use crate::phone_resolver::{PhoneError, PhoneResolver};
use crate::receita::{CompanyRecord, ReceitaClient};

const PANEL_WIDTH: f32 = 300.0;
const TOAST_REFRESH: Duration = Duration::from_millis(250);

pub struct CnpjApp {
    state: AppState,
    runtime: Handle,
    registry: Arc<ReceitaClient>,
    batch: Arc<BatchRunner<ReceitaClient>>,
    resolver: Option<Arc<PhoneResolver<BrowserSession>>>,
    events_tx: UnboundedSender<UiEvent>,
    events_rx: UnboundedReceiver<UiEvent>,
}

impl CnpjApp {
    pub fn new(
        runtime: Handle,
        registry: Arc<ReceitaClient>,
        batch: Arc<BatchRunner<ReceitaClient>>,
        resolver: Option<Arc<PhoneResolver<BrowserSession>>>,
    ) -> Self {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            state: AppState::default(),
            runtime,
            registry,
            batch,
            resolver,
            events_tx,
            events_rx,
        }
    }

    fn spawn_lookup(&self, ctx: &egui::Context, raw: String) {
        let registry = Arc::clone(&self.registry);
        let tx = self.events_tx.clone();
        let ctx = ctx.clone();

        self.runtime.spawn(async move {
            let result = registry.lookup(&raw).await;
            let _ = tx.send(UiEvent::LookupFinished(result));
            ctx.request_repaint();
        });
    }

    fn spawn_batch(&self, ctx: &egui::Context, path: PathBuf) {
        let batch = Arc::clone(&self.batch);
        let tx = self.events_tx.clone();
        let ctx = ctx.clone();

        self.runtime.spawn(async move {
            let progress_tx = tx.clone();
            let progress_ctx = ctx.clone();
            let outcome = batch
                .run(&path, move |current, total| {
                    let _ = progress_tx.send(UiEvent::BatchProgress(BatchProgress { current, total }));
                    progress_ctx.request_repaint();
                })
                .await
                .map_err(|e| {
                    warn!("Batch from {} failed: {}", path.display(), e);
                    e.to_string()
                });

            let _ = tx.send(UiEvent::BatchFinished(outcome));
            ctx.request_repaint();
        });
    }

    fn spawn_phone(&self, ctx: &egui::Context, raw: String) {
        let Some(resolver) = self.resolver.clone() else {
            let _ = self
                .events_tx
                .send(UiEvent::PhoneFinished(Err(PhoneError::SessionUnavailable.to_string())));
            ctx.request_repaint();
            return;
        };
        let tx = self.events_tx.clone();
        let ctx = ctx.clone();

        self.runtime.spawn(async move {
            let outcome = resolver.resolve(&raw).await.map_err(|e| e.to_string());
            let _ = tx.send(UiEvent::PhoneFinished(outcome));
            ctx.request_repaint();
        });
    }

    fn cnpj_panel(&mut self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("Consulta por CNPJ (API)").size(18.0).strong());

        let mut batch_mode = self.state.mode == Mode::Batch;
        let toggle = ui.add_enabled(
            !self.state.left_busy(),
            egui::Checkbox::new(&mut batch_mode, "Modo Lote"),
        );
        if toggle.changed() {
            self.state
                .set_mode(if batch_mode { Mode::Batch } else { Mode::Single });
        }
        ui.separator();

        match self.state.mode {
            Mode::Single => self.single_view(ui),
            Mode::Batch => self.batch_view(ui),
        }
    }

    fn single_view(&mut self, ui: &mut egui::Ui) {
        ui.add(
            egui::TextEdit::singleline(&mut self.state.cnpj_input)
                .hint_text("CNPJ (14 dígitos)")
                .desired_width(PANEL_WIDTH),
        );

        ui.horizontal(|ui| {
            let running = self.state.single.is_running();
            let consult = egui::Button::new("Consultar").min_size(egui::vec2(150.0, 0.0));
            if ui.add_enabled(!running, consult).clicked() {
                if let Some(raw) = self.state.start_lookup() {
                    info!("Single lookup requested for {:?}", raw);
                    self.spawn_lookup(ui.ctx(), raw);
                }
            }
            if running {
                ui.add(egui::Spinner::new().size(24.0));
            }

            let copy = egui::Button::new("Copiar").min_size(egui::vec2(100.0, 0.0));
            if ui
                .add_enabled(self.state.single.done().is_some(), copy)
                .clicked()
            {
                if let Some(line) = self.state.copy_left(Instant::now()) {
                    ui.ctx().copy_text(line);
                }
            }
        });

        if let Some(record) = self.state.single.done() {
            record_view(ui, record);
        }
    }

    fn batch_view(&mut self, ui: &mut egui::Ui) {
        ui.add(
            egui::TextEdit::singleline(&mut self.state.batch_path)
                .hint_text("Caminho do TXT (ex: C:\\arquivo.txt)")
                .desired_width(PANEL_WIDTH),
        );

        ui.horizontal(|ui| {
            let running = self.state.batch.is_running();
            let process = egui::Button::new("Processar lote").min_size(egui::vec2(150.0, 0.0));
            if ui.add_enabled(!running, process).clicked() {
                if let Some(path) = self.state.start_batch() {
                    info!("Batch requested for {}", path.display());
                    self.spawn_batch(ui.ctx(), path);
                }
            }
            if running {
                ui.add(egui::Spinner::new().size(24.0));
            }
        });

        match &self.state.batch {
            PanelState::Running(progress) => {
                ui.add(egui::ProgressBar::new(progress.fraction()).desired_width(PANEL_WIDTH));
                ui.label(egui::RichText::new(progress.to_string()).size(14.0));
            }
            PanelState::Done(report) => {
                ui.label(egui::RichText::new("Batch concluído!").size(14.0));
                ui.label(format!(
                    "{} consultas, {} com erro → {}",
                    report.total,
                    report.failed,
                    report.output_path.display()
                ));
            }
            PanelState::Idle | PanelState::Error(_) => {}
        }
    }

    fn phone_panel(&mut self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("Consulta por Telefone").size(18.0).strong());
        ui.separator();
        ui.label(
            egui::RichText::new("Insira um telefone para pesquisa automática do CNPJ.").size(12.0),
        );
        ui.add(
            egui::TextEdit::singleline(&mut self.state.phone_input)
                .hint_text("Telefone (10 ou 11 dígitos)")
                .desired_width(PANEL_WIDTH),
        );

        ui.horizontal(|ui| {
            let running = self.state.phone.is_running();
            let consult = egui::Button::new("Consultar Tel.").min_size(egui::vec2(150.0, 0.0));
            if ui.add_enabled(!running, consult).clicked() {
                if let Some(raw) = self.state.start_phone() {
                    self.spawn_phone(ui.ctx(), raw);
                }
            }

            if ui
                .add_enabled(self.state.phone.done().is_some(), egui::Button::new("Copiar"))
                .clicked()
            {
                if let Some(cnpj) = self.state.copy_phone(Instant::now()) {
                    ui.ctx().copy_text(cnpj);
                }
            }
            if running {
                ui.add(egui::Spinner::new().size(22.0));
            }
        });

        if let Some(cnpj) = self.state.phone.done() {
            ui.label(egui::RichText::new(format!("CNPJ: {cnpj}")).size(16.0).strong());
        }
    }

    fn toast(&self, ctx: &egui::Context, now: Instant) {
        let Some(message) = self.state.active_toast(now) else {
            return;
        };

        egui::Area::new(egui::Id::new("toast"))
            .anchor(egui::Align2::CENTER_BOTTOM, egui::vec2(0.0, -20.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.label(message);
                });
            });
        ctx.request_repaint_after(TOAST_REFRESH);
    }
}

fn record_view(ui: &mut egui::Ui, record: &CompanyRecord) {
    ui.label(egui::RichText::new(format!("Razão Social: {}", record.legal_name)).size(14.0));
    ui.label(egui::RichText::new(format!("E-mail: {}", record.email)).size(14.0));
    ui.label(egui::RichText::new(format!("Telefone: {}", record.phone)).size(14.0));
    ui.label(
        egui::RichText::new(format!(
            "CNAE: {} – {}",
            record.activity_code, record.activity_description
        ))
        .size(14.0),
    );

    if !record.partners.is_empty() {
        ui.separator();
        ui.label(egui::RichText::new("Quadro Social:").size(14.0).strong());
        for partner in &record.partners {
            ui.label(egui::RichText::new(format!("– {partner}")).size(12.0));
        }
    }
}

fn panel_frame() -> egui::Frame {
    egui::Frame::none()
        .fill(egui::Color32::from_gray(28))
        .rounding(8.0)
        .inner_margin(16.0)
}

impl eframe::App for CnpjApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        while let Ok(event) = self.events_rx.try_recv() {
            self.state.apply(event, now);
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.columns(2, |columns| {
                panel_frame().show(&mut columns[0], |ui| {
                    ui.spacing_mut().item_spacing.y = 12.0;
                    self.cnpj_panel(ui);
                });
                panel_frame().show(&mut columns[1], |ui| {
                    ui.spacing_mut().item_spacing.y = 12.0;
                    self.phone_panel(ui);
                });
            });
        });

        self.toast(ctx, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_phone_without_browser_reports_unavailable() {
        let config = Config::default();
        let registry = Arc::new(ReceitaClient::new(&config).unwrap());
        let batch = Arc::new(BatchRunner::new(
            Arc::clone(&registry),
            config.rate_limit,
            config.output_file.clone(),
        ));
        let mut app = CnpjApp::new(Handle::current(), registry, batch, None);
        let ctx = egui::Context::default();

        app.state.phone_input = "11987654321".to_string();
        let raw = app.state.start_phone().unwrap();
        app.spawn_phone(&ctx, raw);

        let event = app.events_rx.try_recv().unwrap();
        assert!(matches!(
            &event,
            UiEvent::PhoneFinished(Err(msg)) if msg == "Navegador indisponível"
        ));

        app.state.apply(event, Instant::now());
        assert!(!app.state.phone.is_running());
        assert_eq!(
            app.state.active_toast(Instant::now()),
            Some("Erro: Navegador indisponível")
        );
    }
}
