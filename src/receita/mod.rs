use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;

pub const CNPJ_LEN: usize = 14;
const MAX_ATTEMPTS: u32 = 2;

/// Failure tags embedded in a result line after the `;;` separator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("FORMATO_INVALIDO")]
    InvalidFormat,
    #[error("ERRO:HTTP_{0}")]
    HttpStatus(u16),
    #[error("ERRO:{0}")]
    Api(String),
    #[error("ERRO:HTTP_429_PERSISTENTE")]
    RateLimited,
    #[error("ERRO:TIMEOUT")]
    Timeout,
    #[error("ERRO:CONEXAO")]
    Connection,
    #[error("ERRO:RESPOSTA_INVALIDA")]
    InvalidResponse,
}

/// One entry of the QSA (partners and administrators), rendered `name(role)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerEntry {
    pub name: String,
    pub role: String,
}

impl fmt::Display for PartnerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRecord {
    pub cnpj: String,
    pub legal_name: String,
    pub email: String,
    pub phone: String,
    pub activity_code: String,
    pub activity_description: String,
    pub partners: Vec<PartnerEntry>,
}

impl CompanyRecord {
    /// Partners joined with `|`, empty when the company reports none.
    pub fn partner_list(&self) -> String {
        self.partners
            .iter()
            .map(PartnerEntry::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Display for CompanyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{};{};{};{}",
            self.cnpj,
            self.legal_name,
            self.email,
            self.phone,
            self.activity_code,
            self.activity_description,
            self.partner_list()
        )
    }
}

/// Outcome of a single CNPJ lookup. `Display` yields the semicolon-joined
/// line written to the batch output file and copied to the clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(CompanyRecord),
    Failed { cnpj: String, error: LookupError },
}

impl LookupResult {
    pub fn failed(cnpj: impl Into<String>, error: LookupError) -> Self {
        Self::Failed {
            cnpj: cnpj.into(),
            error,
        }
    }

    pub fn cnpj(&self) -> &str {
        match self {
            Self::Found(record) => &record.cnpj,
            Self::Failed { cnpj, .. } => cnpj,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl fmt::Display for LookupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(record) => fmt::Display::fmt(record, f),
            Self::Failed { cnpj, error } => write!(f, "{cnpj};;{error}"),
        }
    }
}

/// Anything able to turn a raw identifier into a result line.
#[async_trait]
pub trait CnpjLookup: Send + Sync {
    async fn lookup(&self, raw: &str) -> LookupResult;
}

#[derive(Debug, Default, Deserialize)]
struct ReceitaResponse {
    status: Option<String>,
    message: Option<String>,
    nome: Option<String>,
    email: Option<String>,
    telefone: Option<String>,
    cnae_fiscal: Option<String>,
    cnae_fiscal_descricao: Option<String>,
    atividade_principal: Option<Vec<ReceitaActivity>>,
    qsa: Option<Vec<ReceitaPartner>>,
}

#[derive(Debug, Deserialize)]
struct ReceitaActivity {
    code: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceitaPartner {
    nome: Option<String>,
    qual: Option<String>,
}

fn trimmed(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

impl ReceitaResponse {
    fn is_error(&self) -> bool {
        self.status.as_deref() == Some("ERROR")
    }

    fn into_record(self, cnpj: &str) -> CompanyRecord {
        let mut activity_code = trimmed(self.cnae_fiscal);
        let mut activity_description = trimmed(self.cnae_fiscal_descricao);

        if activity_code.is_empty() {
            if let Some(primary) = self.atividade_principal.and_then(|list| list.into_iter().next()) {
                activity_code = trimmed(primary.code);
                activity_description = trimmed(primary.text);
            }
        }

        let partners = self
            .qsa
            .unwrap_or_default()
            .into_iter()
            .map(|p| PartnerEntry {
                name: p.nome.unwrap_or_default(),
                role: p.qual.unwrap_or_default(),
            })
            .collect();

        CompanyRecord {
            cnpj: cnpj.to_string(),
            legal_name: trimmed(self.nome),
            email: trimmed(self.email),
            phone: trimmed(self.telefone),
            activity_code,
            activity_description,
            partners,
        }
    }
}

pub fn normalize_cnpj(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Client for the public ReceitaWS CNPJ endpoint.
#[derive(Clone, Debug)]
pub struct ReceitaClient {
    http: reqwest::Client,
    api_url: String,
    backoff_429: Duration,
}

impl ReceitaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .use_rustls_tls()
            .build()
            .context("Unable to construct reqwest client")?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            backoff_429: config.backoff_429,
        })
    }

    pub async fn lookup(&self, raw: &str) -> LookupResult {
        let cnpj = normalize_cnpj(raw);
        if cnpj.len() != CNPJ_LEN {
            debug!("Rejecting {:?}: {} digits after normalization", raw, cnpj.len());
            return LookupResult::failed(cnpj, LookupError::InvalidFormat);
        }

        match self.fetch_record(&cnpj).await {
            Ok(record) => {
                info!("CNPJ {} resolved to {}", cnpj, record.legal_name);
                LookupResult::Found(record)
            }
            Err(error) => {
                warn!("CNPJ {} lookup failed: {}", cnpj, error);
                LookupResult::failed(cnpj, error)
            }
        }
    }

    async fn fetch_record(&self, cnpj: &str) -> Result<CompanyRecord, LookupError> {
        let url = format!("{}/{cnpj}", self.api_url.trim_end_matches('/'));

        for attempt in 1..=MAX_ATTEMPTS {
            let resp = self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(transport_error)?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < MAX_ATTEMPTS {
                    warn!(
                        "HTTP 429 for {}, backing off {}s before retrying",
                        cnpj,
                        self.backoff_429.as_secs()
                    );
                    sleep(self.backoff_429).await;
                    continue;
                }
                break;
            }
            if status != StatusCode::OK {
                return Err(LookupError::HttpStatus(status.as_u16()));
            }

            let body = resp.text().await.map_err(transport_error)?;
            let payload: ReceitaResponse =
                serde_json::from_str(&body).map_err(|_| LookupError::InvalidResponse)?;

            if payload.is_error() {
                return Err(LookupError::Api(payload.message.unwrap_or_default()));
            }
            return Ok(payload.into_record(cnpj));
        }

        Err(LookupError::RateLimited)
    }
}

#[async_trait]
impl CnpjLookup for ReceitaClient {
    async fn lookup(&self, raw: &str) -> LookupResult {
        ReceitaClient::lookup(self, raw).await
    }
}

fn transport_error(err: reqwest::Error) -> LookupError {
    if err.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> ReceitaResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_normalize_cnpj_strips_punctuation() {
        assert_eq!(normalize_cnpj("11.222.333/0001-81"), "11222333000181");
        assert_eq!(normalize_cnpj("  abc "), "");
    }

    #[test]
    fn test_record_line_layout() {
        let record = parse(serde_json::json!({
            "nome": " ACME LTDA ",
            "email": "contato@acme.com.br",
            "telefone": "(11) 4002-8922",
            "cnae_fiscal": "6201501",
            "cnae_fiscal_descricao": "Desenvolvimento de programas",
            "qsa": [
                {"nome": "MARIA SILVA", "qual": "49-Sócio-Administrador"},
                {"nome": "JOAO SOUZA", "qual": "22-Sócio"}
            ]
        }))
        .into_record("11222333000181");

        assert_eq!(
            LookupResult::Found(record).to_string(),
            "11222333000181;ACME LTDA;contato@acme.com.br;(11) 4002-8922;6201501;\
             Desenvolvimento de programas;MARIA SILVA(49-Sócio-Administrador)|JOAO SOUZA(22-Sócio)"
        );
    }

    #[test]
    fn test_primary_activity_fallback() {
        let record = parse(serde_json::json!({
            "nome": "ACME",
            "atividade_principal": [
                {"code": "62.01-5-01", "text": "Desenvolvimento de programas"},
                {"code": "00.00-0-00", "text": "Ignorada"}
            ]
        }))
        .into_record("11222333000181");

        assert_eq!(record.activity_code, "62.01-5-01");
        assert_eq!(record.activity_description, "Desenvolvimento de programas");
    }

    #[test]
    fn test_fallback_not_used_when_cnae_present() {
        let record = parse(serde_json::json!({
            "cnae_fiscal": "6201501",
            "cnae_fiscal_descricao": "Fiscal",
            "atividade_principal": [{"code": "62.01-5-01", "text": "Principal"}]
        }))
        .into_record("11222333000181");

        assert_eq!(record.activity_code, "6201501");
        assert_eq!(record.activity_description, "Fiscal");
    }

    #[test]
    fn test_missing_fields_and_null_lists() {
        let record = parse(serde_json::json!({
            "nome": "SEM SOCIOS",
            "qsa": null,
            "atividade_principal": []
        }))
        .into_record("11222333000181");

        assert_eq!(record.partner_list(), "");
        assert_eq!(record.to_string(), "11222333000181;SEM SOCIOS;;;;;");
    }

    #[test]
    fn test_failure_lines() {
        assert_eq!(
            LookupResult::failed("123", LookupError::InvalidFormat).to_string(),
            "123;;FORMATO_INVALIDO"
        );
        assert_eq!(
            LookupResult::failed("11222333000181", LookupError::HttpStatus(500)).to_string(),
            "11222333000181;;ERRO:HTTP_500"
        );
        assert_eq!(
            LookupResult::failed("11222333000181", LookupError::RateLimited).to_string(),
            "11222333000181;;ERRO:HTTP_429_PERSISTENTE"
        );
        assert_eq!(
            LookupResult::failed("11222333000181", LookupError::Api("CNPJ inválido".into()))
                .to_string(),
            "11222333000181;;ERRO:CNPJ inválido"
        );
    }

    #[test]
    fn test_error_status_detected() {
        let payload = parse(serde_json::json!({"status": "ERROR", "message": "CNPJ rejeitado"}));
        assert!(payload.is_error());
        assert!(!parse(serde_json::json!({"status": "OK"})).is_error());
    }

    #[tokio::test]
    async fn test_invalid_format_short_circuits() {
        let config = Config {
            api_url: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        };
        let client = ReceitaClient::new(&config).unwrap();

        let result = client.lookup("12.345").await;
        assert_eq!(result, LookupResult::failed("12345", LookupError::InvalidFormat));
        assert!(!result.is_found());
    }
}
