use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::batch::BatchReport;
use crate::receita::{CompanyRecord, LookupResult};

pub const TOAST_DURATION: Duration = Duration::from_secs(3);
pub const NO_CNPJ_FOUND: &str = "Nenhum CNPJ encontrado";

/// Lifecycle of one panel. What the panel draws is derived from this alone.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelState<T, P = ()> {
    Idle,
    Running(P),
    Done(T),
    Error(String),
}

impl<T, P> PanelState<T, P> {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    pub fn done(&self) -> Option<&T> {
        match self {
            Self::Done(value) => Some(value),
            _ => None,
        }
    }

    /// Drops a stale error; running work and finished results are kept.
    fn reset_transient(&mut self) {
        if matches!(self, Self::Error(_)) {
            *self = Self::Idle;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}

impl fmt::Display for BatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Single,
    Batch,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    shown_at: Instant,
}

/// Messages sent back to the window by background work.
#[derive(Debug)]
pub enum UiEvent {
    LookupFinished(LookupResult),
    BatchProgress(BatchProgress),
    BatchFinished(Result<BatchReport, String>),
    PhoneFinished(Result<Option<String>, String>),
}

#[derive(Debug, Default)]
pub struct AppState {
    pub mode: Mode,
    pub cnpj_input: String,
    pub single: PanelState<CompanyRecord>,
    pub batch_path: String,
    pub batch: PanelState<BatchReport, BatchProgress>,
    pub phone_input: String,
    pub phone: PanelState<String>,
    toast: Option<Toast>,
}

impl<T, P> Default for PanelState<T, P> {
    fn default() -> Self {
        Self::Idle
    }
}

impl AppState {
    pub fn left_busy(&self) -> bool {
        self.single.is_running() || self.batch.is_running()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode || self.left_busy() {
            return;
        }
        self.mode = mode;
        self.single.reset_transient();
        self.batch.reset_transient();
    }

    /// Moves the single lookup to `Running` and hands back the raw input.
    pub fn start_lookup(&mut self) -> Option<String> {
        if self.left_busy() {
            return None;
        }
        self.single = PanelState::Running(());
        Some(self.cnpj_input.trim().to_string())
    }

    pub fn start_batch(&mut self) -> Option<PathBuf> {
        if self.left_busy() {
            return None;
        }
        self.batch = PanelState::Running(BatchProgress::default());
        Some(PathBuf::from(self.batch_path.trim()))
    }

    pub fn start_phone(&mut self) -> Option<String> {
        if self.phone.is_running() {
            return None;
        }
        self.phone = PanelState::Running(());
        Some(self.phone_input.trim().to_string())
    }

    pub fn apply(&mut self, event: UiEvent, now: Instant) {
        match event {
            UiEvent::LookupFinished(LookupResult::Found(record)) => {
                self.single = PanelState::Done(record);
            }
            UiEvent::LookupFinished(LookupResult::Failed { error, .. }) => {
                let message = error.to_string();
                self.notify(message.clone(), now);
                self.single = PanelState::Error(message);
            }
            UiEvent::BatchProgress(progress) => {
                if self.batch.is_running() {
                    self.batch = PanelState::Running(progress);
                }
            }
            UiEvent::BatchFinished(Ok(report)) => {
                self.notify("Arquivo gerado", now);
                self.batch = PanelState::Done(report);
            }
            UiEvent::BatchFinished(Err(message)) => {
                self.notify(message.clone(), now);
                self.batch = PanelState::Error(message);
            }
            UiEvent::PhoneFinished(Ok(Some(cnpj))) => {
                self.phone = PanelState::Done(cnpj);
            }
            UiEvent::PhoneFinished(Ok(None)) => {
                self.notify(format!("Erro: {NO_CNPJ_FOUND}"), now);
                self.phone = PanelState::Error(NO_CNPJ_FOUND.to_string());
            }
            UiEvent::PhoneFinished(Err(message)) => {
                self.notify(format!("Erro: {message}"), now);
                self.phone = PanelState::Error(message);
            }
        }
    }

    /// Full record line of the last successful single lookup.
    pub fn copy_left(&mut self, now: Instant) -> Option<String> {
        let line = self.single.done().map(CompanyRecord::to_string)?;
        self.notify("Copiado!", now);
        Some(line)
    }

    pub fn copy_phone(&mut self, now: Instant) -> Option<String> {
        let cnpj = self.phone.done().cloned()?;
        self.notify("Copiado!", now);
        Some(cnpj)
    }

    pub fn notify(&mut self, message: impl Into<String>, now: Instant) {
        self.toast = Some(Toast {
            message: message.into(),
            shown_at: now,
        });
    }

    pub fn active_toast(&self, now: Instant) -> Option<&str> {
        self.toast
            .as_ref()
            .filter(|toast| now.saturating_duration_since(toast.shown_at) < TOAST_DURATION)
            .map(|toast| toast.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receita::LookupError;

    fn record() -> CompanyRecord {
        CompanyRecord {
            cnpj: "11222333000181".to_string(),
            legal_name: "ACME LTDA".to_string(),
            email: "contato@acme.com.br".to_string(),
            phone: "(11) 4002-8922".to_string(),
            activity_code: "6201501".to_string(),
            activity_description: "Desenvolvimento de programas".to_string(),
            partners: vec![],
        }
    }

    fn report() -> BatchReport {
        BatchReport {
            total: 2,
            succeeded: 1,
            failed: 1,
            duration_secs: 6.0,
            output_path: PathBuf::from("resultado_consulta.txt"),
        }
    }

    #[test]
    fn test_lookup_success_enables_copy() {
        let now = Instant::now();
        let mut state = AppState::default();
        state.cnpj_input = " 11.222.333/0001-81 ".to_string();

        assert_eq!(state.start_lookup().as_deref(), Some("11.222.333/0001-81"));
        assert!(state.single.is_running());
        assert!(state.start_lookup().is_none());

        state.apply(UiEvent::LookupFinished(LookupResult::Found(record())), now);
        assert_eq!(state.single.done(), Some(&record()));
        assert_eq!(
            state.copy_left(now).as_deref(),
            Some("11222333000181;ACME LTDA;contato@acme.com.br;(11) 4002-8922;6201501;Desenvolvimento de programas;")
        );
        assert_eq!(state.active_toast(now), Some("Copiado!"));
    }

    #[test]
    fn test_lookup_failure_shows_tag() {
        let now = Instant::now();
        let mut state = AppState::default();
        state.start_lookup();
        state.apply(
            UiEvent::LookupFinished(LookupResult::failed("123", LookupError::InvalidFormat)),
            now,
        );

        assert_eq!(state.single, PanelState::Error("FORMATO_INVALIDO".to_string()));
        assert_eq!(state.active_toast(now), Some("FORMATO_INVALIDO"));
        assert!(state.copy_left(now).is_none());
    }

    #[test]
    fn test_toggle_keeps_results_and_clears_errors() {
        let now = Instant::now();
        let mut state = AppState::default();
        state.start_lookup();
        state.apply(UiEvent::LookupFinished(LookupResult::Found(record())), now);
        state.batch = PanelState::Error("Arquivo não encontrado".to_string());

        state.set_mode(Mode::Batch);
        assert_eq!(state.mode, Mode::Batch);
        assert_eq!(state.batch, PanelState::Idle);

        state.set_mode(Mode::Single);
        assert_eq!(state.single.done(), Some(&record()));
    }

    #[test]
    fn test_toggle_blocked_while_running() {
        let mut state = AppState::default();
        state.batch_path = "lista.txt".to_string();
        assert_eq!(state.start_batch(), Some(PathBuf::from("lista.txt")));

        state.set_mode(Mode::Batch);
        state.set_mode(Mode::Single);
        assert_eq!(state.mode, Mode::Single);
        assert!(state.start_lookup().is_none());
    }

    #[test]
    fn test_batch_progress_then_done() {
        let now = Instant::now();
        let mut state = AppState::default();
        state.mode = Mode::Batch;
        state.start_batch();

        state.apply(UiEvent::BatchProgress(BatchProgress { current: 1, total: 4 }), now);
        match &state.batch {
            PanelState::Running(progress) => {
                assert_eq!(progress.to_string(), "1/4");
                assert!((progress.fraction() - 0.25).abs() < f32::EPSILON);
            }
            other => panic!("unexpected state {other:?}"),
        }

        state.apply(UiEvent::BatchFinished(Ok(report())), now);
        assert_eq!(state.batch.done().map(|r| r.total), Some(2));
        assert_eq!(state.active_toast(now), Some("Arquivo gerado"));

        // late progress never resurrects a finished run
        state.apply(UiEvent::BatchProgress(BatchProgress { current: 2, total: 4 }), now);
        assert!(state.batch.done().is_some());
    }

    #[test]
    fn test_phone_outcomes() {
        let now = Instant::now();
        let mut state = AppState::default();

        state.start_phone();
        state.apply(UiEvent::PhoneFinished(Ok(None)), now);
        assert_eq!(state.phone, PanelState::Error(NO_CNPJ_FOUND.to_string()));
        assert_eq!(state.active_toast(now), Some("Erro: Nenhum CNPJ encontrado"));

        state.start_phone();
        state.apply(UiEvent::PhoneFinished(Ok(Some("11222333000181".into()))), now);
        assert_eq!(state.copy_phone(now).as_deref(), Some("11222333000181"));

        state.start_phone();
        assert!(state.copy_phone(now).is_none());
        state.apply(UiEvent::PhoneFinished(Err("Navegador indisponível".into())), now);
        assert_eq!(state.active_toast(now), Some("Erro: Navegador indisponível"));
    }

    #[test]
    fn test_toast_expires() {
        let now = Instant::now();
        let mut state = AppState::default();
        state.notify("Copiado!", now);

        assert!(state.active_toast(now + Duration::from_secs(1)).is_some());
        assert!(state.active_toast(now + TOAST_DURATION).is_none());
    }
}
