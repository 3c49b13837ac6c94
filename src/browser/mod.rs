use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;
use thirtyfour::Key;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::phone_resolver::{PhoneError, SearchSession};

const CHROMEDRIVER_STARTUP_MS: u64 = 1500;

/// chromedriver child process, killed when dropped.
pub struct ChromeDriverProcess {
    child: Child,
}

impl ChromeDriverProcess {
    pub fn spawn(path: &Path, port: u16) -> Result<Self> {
        info!("Starting ChromeDriver from {:?} on port {}", path, port);
        let child = Command::new(path)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start chromedriver at {}", path.display()))?;

        // chromedriver needs a moment before it accepts sessions
        std::thread::sleep(Duration::from_millis(CHROMEDRIVER_STARTUP_MS));
        Ok(Self { child })
    }
}

impl Drop for ChromeDriverProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop chromedriver: {}", e);
        }
        let _ = self.child.wait();
    }
}

/// The single Chrome session used for reverse phone searches.
///
/// Created once at startup and shared behind an `Arc`. The mutex keeps two
/// searches from driving the same tab at once; `close` ends the session and
/// later searches fail with `SessionUnavailable`.
pub struct BrowserSession {
    driver: Mutex<Option<WebDriver>>,
    search_url: String,
    query_input_name: String,
    heading_selector: String,
    element_wait: Duration,
    element_poll: Duration,
}

impl BrowserSession {
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        if config.headless {
            caps.add_chrome_arg("--headless")?;
        }
        caps.add_chrome_arg("--start-maximized")?;
        caps.add_chrome_arg("--log-level=3")?;
        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;

        let driver = WebDriver::new(config.webdriver_url.as_str(), caps)
            .await
            .context("Failed to connect to WebDriver")?;

        // open the search page right away so the first lookup starts warm
        driver
            .goto(config.search_url.as_str())
            .await
            .context("Failed to open search page")?;
        info!("Browser session ready at {}", config.search_url);

        Ok(Self {
            driver: Mutex::new(Some(driver)),
            search_url: config.search_url.clone(),
            query_input_name: config.query_input_name.clone(),
            heading_selector: config.heading_selector.clone(),
            element_wait: config.element_wait,
            element_poll: config.element_poll,
        })
    }

    /// Ends the WebDriver session. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            driver.quit().await.context("Failed to quit WebDriver session")?;
            info!("Browser session closed");
        }
        Ok(())
    }

    /// Polls until `locate` matches at least one element or the wait runs out.
    async fn wait_for_all<F>(
        &self,
        driver: &WebDriver,
        what: &str,
        locate: F,
    ) -> Result<Vec<WebElement>, PhoneError>
    where
        F: Fn() -> By,
    {
        let deadline = Instant::now() + self.element_wait;
        loop {
            match driver.find_all(locate()).await {
                Ok(elements) if !elements.is_empty() => return Ok(elements),
                Ok(_) => {}
                Err(e) => debug!("Lookup of {} not ready yet: {}", what, e),
            }

            if Instant::now() >= deadline {
                return Err(PhoneError::ElementNotFound(format!(
                    "{} (após {}s)",
                    what,
                    self.element_wait.as_secs()
                )));
            }
            sleep(self.element_poll).await;
        }
    }
}

fn browser_error(err: WebDriverError) -> PhoneError {
    PhoneError::Browser(err.to_string())
}

#[async_trait]
impl SearchSession for BrowserSession {
    async fn search_headings(&self, query: &str) -> Result<Vec<String>, PhoneError> {
        let guard = self.driver.lock().await;
        let driver = guard.as_ref().ok_or(PhoneError::SessionUnavailable)?;

        driver.goto(self.search_url.as_str()).await.map_err(browser_error)?;

        let inputs = self
            .wait_for_all(driver, &self.query_input_name, || {
                By::Name(self.query_input_name.as_str())
            })
            .await?;
        let query_input = &inputs[0];
        query_input.clear().await.map_err(browser_error)?;
        query_input.send_keys(query).await.map_err(browser_error)?;
        query_input.send_keys(Key::Enter.to_string()).await.map_err(browser_error)?;
        debug!("Submitted search for {}", query);

        let headings = self
            .wait_for_all(driver, &self.heading_selector, || {
                By::Css(self.heading_selector.as_str())
            })
            .await?;

        let mut texts = Vec::with_capacity(headings.len());
        for heading in &headings {
            match heading.text().await {
                Ok(text) => texts.push(text),
                Err(e) => warn!("Could not read result heading: {}", e),
            }
        }
        Ok(texts)
    }
}
