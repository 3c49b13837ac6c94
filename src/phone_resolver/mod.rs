use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

static CNPJ_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{14})\b").expect("Invalid CNPJ_TOKEN regex"));

#[derive(Debug, Error)]
pub enum PhoneError {
    #[error("Telefone inválido: use 10 ou 11 dígitos (recebidos {0})")]
    InvalidFormat(usize),
    #[error("Elemento não encontrado: {0}")]
    ElementNotFound(String),
    #[error("Navegador indisponível")]
    SessionUnavailable,
    #[error("Falha no navegador: {0}")]
    Browser(String),
}

/// Formats a raw phone as `XX XXXX-XXXX` (landline) or `XX XXXXX-XXXX`
/// (mobile), the way it is usually printed next to a company name.
pub fn format_phone(raw: &str) -> Result<String, PhoneError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Ok(format!("{} {}-{}", &digits[..2], &digits[2..6], &digits[6..])),
        11 => Ok(format!("{} {}-{}", &digits[..2], &digits[2..7], &digits[7..])),
        n => Err(PhoneError::InvalidFormat(n)),
    }
}

/// First 14-digit run found across the headings, in the order given.
pub fn first_cnpj_in<I, S>(headings: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    headings.into_iter().find_map(|heading| {
        CNPJ_TOKEN
            .captures(heading.as_ref())
            .map(|caps| caps[1].to_string())
    })
}

/// A browser able to run a web search and hand back the text of the
/// result headings in document order.
#[async_trait]
pub trait SearchSession: Send + Sync {
    async fn search_headings(&self, query: &str) -> Result<Vec<String>, PhoneError>;
}

pub struct PhoneResolver<S> {
    session: Arc<S>,
}

impl<S: SearchSession> PhoneResolver<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session }
    }

    /// Resolves a phone to the CNPJ shown in the search results.
    /// `Ok(None)` means the search ran but no heading carried a CNPJ.
    pub async fn resolve(&self, raw_phone: &str) -> Result<Option<String>, PhoneError> {
        let formatted = format_phone(raw_phone)?;
        info!("Searching CNPJ for phone {}", formatted);

        let headings = self.session.search_headings(&formatted).await?;
        debug!("Search returned {} headings", headings.len());

        let cnpj = first_cnpj_in(&headings);
        match &cnpj {
            Some(cnpj) => info!("Phone {} matched CNPJ {}", formatted, cnpj),
            None => info!("No CNPJ found in results for {}", formatted),
        }
        Ok(cnpj)
    }
}
