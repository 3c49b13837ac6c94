pub mod batch;
pub mod browser;
pub mod config;
pub mod phone_resolver;
pub mod receita;
pub mod ui;
