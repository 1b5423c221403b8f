use anyhow::Result;
use common::observability::{build_dispatch, LogTarget};
use common::warehouse::{Warehouse, WarehouseError};
use transfers::{build_normalized_view, Allowlist, Dialect};

mod cli;
mod loader;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Warehouse failures get the same one-line notice the dashboard shows.
        match e.downcast_ref::<WarehouseError>() {
            Some(w) => eprintln!("{}", w.user_message()),
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;

    let config = common::config::Config::load()?;
    let (dispatch, _otel_guard) =
        build_dispatch("reporter", &config.general.log_level, LogTarget::Stderr);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let client = common::warehouse::connect(&config.warehouse).await?;
    let allowlist = Allowlist::new(&config.dashboard.allowlist)?;
    let view = build_normalized_view(
        Dialect::for_backend(client.backend()),
        &config.sources,
        &allowlist,
    )?;
    tracing::debug!(
        backend = client.backend().as_str(),
        allowlist = allowlist.len(),
        "reporter ready"
    );

    let ctx = cli::Context {
        config,
        client,
        view,
        today: chrono::Utc::now().date_naive(),
    };
    cli::run_command(&ctx, cmd).await
}
