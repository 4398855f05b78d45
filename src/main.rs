use anyhow::Context;
use loyalty_ledger::accrual::HttpAccrualClient;
use loyalty_ledger::config::AppConfig;
use loyalty_ledger::db::Database;
use loyalty_ledger::ledger::PgLedgerStore;
use loyalty_ledger::reconcile::start_reconciliation;
use std::sync::Arc;

fn get_arg(long: &str, short: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == long || args[i] == short) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg("--env", "-e").unwrap_or_else(|| "dev".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config =
        AppConfig::load(&env).with_context(|| format!("loading config for env '{}'", env))?;
    app_config.apply_overrides(get_arg("--database", "-d"), get_arg("--accrual", "-r"));
    app_config.validate()?;

    let _log_guard = loyalty_ledger::logging::init_logging(&app_config.logging);

    tracing::info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        "Starting loyalty ledger"
    );

    let db = Database::connect(&app_config.database)
        .await
        .context("connecting to PostgreSQL")?;
    db.migrate().await.context("applying migrations")?;

    let store = Arc::new(PgLedgerStore::new(
        db.pool().clone(),
        app_config.database.operation_timeout(),
    ));
    let authority = Arc::new(
        HttpAccrualClient::new(app_config.accrual.client_config())
            .context("building accrual client")?,
    );
    tracing::info!(
        accrual = %app_config.accrual.base_address,
        "Accrual authority configured"
    );

    let handle = start_reconciliation(store, authority, app_config.accrual.reconciler_config());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    handle.stop();
    handle.join().await;
    db.pool().close().await;

    tracing::info!("Loyalty ledger stopped");
    Ok(())
}
