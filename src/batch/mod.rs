use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::receita::CnpjLookup;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Arquivo não encontrado: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Falha ao ler {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Falha ao gravar {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Summary of a finished batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_secs: f64,
    pub output_path: PathBuf,
}

impl BatchReport {
    pub fn lookups_per_minute(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.total as f64 / self.duration_secs) * 60.0
        } else {
            0.0
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total > 0 {
            (self.succeeded as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn format_duration(&self) -> String {
        let total_secs = self.duration_secs as u64;
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    pub fn display(&self) {
        println!("\n╔══════════════════════════════════════════════════════════╗");
        println!("║              RESUMO DO LOTE                              ║");
        println!("╠══════════════════════════════════════════════════════════╣");
        println!("║  Total:                   {:>30} ║", self.total);
        println!("║  Encontrados:             {:>30} ║", self.succeeded);
        println!("║  Com erro:                {:>30} ║", self.failed);
        println!("║  Duração:                 {:>30} ║", self.format_duration());
        println!(
            "║  Ritmo:                   {:>26.2}/min ║",
            self.lookups_per_minute()
        );
        println!("║  Sucesso:                 {:>29.1}% ║", self.success_rate());
        println!(
            "║  Arquivo:                 {:>30} ║",
            self.output_path.display()
        );
        println!("╚══════════════════════════════════════════════════════════╝\n");
    }
}

/// Reads the non-blank, trimmed lines of a batch input file, in file order.
pub fn read_inputs(path: &Path) -> Result<Vec<String>, BatchError> {
    if !path.is_file() {
        return Err(BatchError::NotFound(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path).map_err(|source| BatchError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(contents
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Sequential, rate-limited batch of CNPJ lookups.
pub struct BatchRunner<L> {
    lookup: Arc<L>,
    rate_limit: Duration,
    output_path: PathBuf,
}

impl<L: CnpjLookup> BatchRunner<L> {
    pub fn new(lookup: Arc<L>, rate_limit: Duration, output_path: impl Into<PathBuf>) -> Self {
        Self {
            lookup,
            rate_limit,
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Looks up every line of `input`, calling `progress(current, total)`
    /// (1-based) before each lookup, and writes the result lines to the
    /// output file once all of them are done.
    pub async fn run<F>(&self, input: &Path, mut progress: F) -> Result<BatchReport, BatchError>
    where
        F: FnMut(usize, usize),
    {
        let jobs = read_inputs(input)?;
        let total = jobs.len();
        let started = Instant::now();
        info!("Processing {} identifiers from {}", total, input.display());

        let mut lines = Vec::with_capacity(total);
        let mut succeeded = 0;

        for (idx, raw) in jobs.iter().enumerate() {
            let current = idx + 1;
            progress(current, total);

            let result = self.lookup.lookup(raw).await;
            if result.is_found() {
                succeeded += 1;
                info!("  [{}/{}] ✓ {}", current, total, result.cnpj());
            } else {
                info!("  [{}/{}] ✗ {}", current, total, result);
            }
            lines.push(result.to_string());

            // Rate limiting
            sleep(self.rate_limit).await;
        }

        std::fs::write(&self.output_path, lines.join("\n")).map_err(|source| {
            BatchError::Write {
                path: self.output_path.clone(),
                source,
            }
        })?;
        info!(
            "Batch complete: {} lines written to {}",
            total,
            self.output_path.display()
        );

        Ok(BatchReport {
            total,
            succeeded,
            failed: total - succeeded,
            duration_secs: started.elapsed().as_secs_f64(),
            output_path: self.output_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn report(total: usize, succeeded: usize, duration_secs: f64) -> BatchReport {
        BatchReport {
            total,
            succeeded,
            failed: total - succeeded,
            duration_secs,
            output_path: PathBuf::from("resultado_consulta.txt"),
        }
    }

    #[test]
    fn test_read_inputs_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "  11222333000181  \n\n   \n44.555.666/0001-99\r\n").unwrap();

        let inputs = read_inputs(file.path()).unwrap();
        assert_eq!(inputs, vec!["11222333000181", "44.555.666/0001-99"]);
    }

    #[test]
    fn test_read_inputs_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nao_existe.txt");
        assert!(matches!(read_inputs(&missing), Err(BatchError::NotFound(_))));
        // a directory is not a usable input either
        assert!(matches!(read_inputs(dir.path()), Err(BatchError::NotFound(_))));
    }

    #[test]
    fn test_report_rates() {
        let r = report(10, 8, 30.0);
        assert_eq!(r.failed, 2);
        assert!((r.lookups_per_minute() - 20.0).abs() < 1e-9);
        assert!((r.success_rate() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_empty_batch() {
        let r = report(0, 0, 0.0);
        assert_eq!(r.lookups_per_minute(), 0.0);
        assert_eq!(r.success_rate(), 0.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(report(1, 1, 42.0).format_duration(), "42s");
        assert_eq!(report(1, 1, 185.0).format_duration(), "3m 5s");
        assert_eq!(report(1, 1, 3725.0).format_duration(), "1h 2m 5s");
    }
}
