mod api;
mod cache;
mod catalog;
mod dashboard;
mod error;
mod filter;
mod render;
mod resolver;
mod search;
mod session;
mod settings;
mod table;
mod warehouse;
mod web;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    catalog::Catalog,
    dashboard::Dashboard,
    search::{AnswersClient, SearchGate},
    settings::{Args, Settings},
    warehouse::{SqlApiExecutor, Warehouse},
    web::Tls,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_file(&args.config)
        .with_context(|| format!("cannot load settings from {}", args.config.display()))?;
    info!("Search Term Dashboard {}", env!("CARGO_PKG_VERSION"));

    let warehouse_timeout = settings.warehouse.timeout();
    let executor = SqlApiExecutor::new(settings.warehouse)?;
    let warehouse = Warehouse::new(Arc::new(executor), settings.cache, warehouse_timeout);

    let search_timeout = settings.search.timeout();
    let answers = AnswersClient::new(settings.search)?;
    let search = SearchGate::new(Arc::new(answers), settings.cache, search_timeout);

    let dashboard = Arc::new(Dashboard::new(
        Arc::new(Catalog::new()),
        Arc::new(warehouse),
        Arc::new(search),
        settings.defaults,
    ));
    let schema = api::schema(Arc::clone(&dashboard));

    let tls = match (args.cert, args.key) {
        (Some(cert), Some(key)) => Some(Tls { cert, key }),
        _ => None,
    };
    web::serve(schema, dashboard, settings.web.address, tls).await;
    Ok(())
}
