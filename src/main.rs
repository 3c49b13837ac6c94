use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing::{info, warn};

use cnpj_lookup::batch::BatchRunner;
use cnpj_lookup::browser::{BrowserSession, ChromeDriverProcess};
use cnpj_lookup::config::Config;
use cnpj_lookup::phone_resolver::{format_phone, PhoneResolver};
use cnpj_lookup::receita::{LookupResult, ReceitaClient};
use cnpj_lookup::ui;

#[derive(Parser)]
#[command(name = "cnpj-lookup")]
#[command(about = "Consulta de CNPJ pela ReceitaWS e busca reversa por telefone", long_about = None)]
struct Cli {
    /// Run Chrome without a visible window
    #[arg(long, global = true, default_value_t = false)]
    headless: bool,

    #[arg(long, global = true)]
    webdriver_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the desktop window (default)
    Gui,

    /// Look up a single CNPJ and print its result line
    Lookup { cnpj: String },

    /// Look up every CNPJ listed in a text file, one per line
    Batch {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Find the CNPJ published next to a phone number
    Phone { phone: String },
}

fn start_chromedriver(config: &Config) -> Result<Option<ChromeDriverProcess>> {
    match config.chromedriver_path.as_deref() {
        Some(path) => Ok(Some(ChromeDriverProcess::spawn(path, config.webdriver_port())?)),
        None => {
            info!("Using WebDriver already listening at {}", config.webdriver_url);
            Ok(None)
        }
    }
}

fn run_gui(runtime: &Runtime, config: &Config) -> Result<()> {
    let _chromedriver = start_chromedriver(config)?;

    let session = match runtime.block_on(BrowserSession::connect(config)) {
        Ok(session) => Some(Arc::new(session)),
        Err(e) => {
            warn!("Browser unavailable, phone search disabled: {:#}", e);
            None
        }
    };

    let result = ui::run(runtime.handle().clone(), config, session.clone());

    if let Some(session) = session {
        if let Err(e) = runtime.block_on(session.close()) {
            warn!("Failed to close browser session cleanly: {:#}", e);
        }
    }

    result
}

fn run_phone(runtime: &Runtime, config: &Config, phone: &str) -> Result<()> {
    // reject malformed input before a browser is ever launched
    let formatted = format_phone(phone)?;
    let _chromedriver = start_chromedriver(config)?;

    runtime.block_on(async {
        let session = Arc::new(BrowserSession::connect(config).await?);
        let outcome = PhoneResolver::new(Arc::clone(&session)).resolve(phone).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close browser session cleanly: {:#}", e);
        }

        match outcome? {
            Some(cnpj) => println!("{cnpj}"),
            None => bail!("Nenhum CNPJ encontrado para {formatted}"),
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if cli.headless {
        config.headless = true;
    }
    if let Some(url) = cli.webdriver_url {
        config.webdriver_url = url;
    }

    let runtime = Runtime::new().context("Failed to start tokio runtime")?;

    match cli.command.unwrap_or(Commands::Gui) {
        Commands::Gui => run_gui(&runtime, &config)?,

        Commands::Lookup { cnpj } => {
            let client = ReceitaClient::new(&config)?;
            let result = runtime.block_on(client.lookup(&cnpj));
            println!("{result}");

            if let LookupResult::Failed { error, .. } = result {
                bail!("Lookup failed: {error}");
            }
        }

        Commands::Batch { file, output } => {
            let client = Arc::new(ReceitaClient::new(&config)?);
            let output = output.unwrap_or_else(|| config.output_file.clone());
            let runner = BatchRunner::new(client, config.rate_limit, output);

            let report = runtime.block_on(runner.run(&file, |current, total| {
                info!("[{}/{}] Consultando...", current, total);
            }))?;
            report.display();
        }

        Commands::Phone { phone } => run_phone(&runtime, &config, &phone)?,
    }

    Ok(())
}
