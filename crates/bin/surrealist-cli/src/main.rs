//! Headless Surrealist client.
//!
//! Connects with the options given on the command line, runs one query the way
//! the editor does, prints the responses as JSON and optionally keeps printing
//! live query messages for a while.

mod config;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use surrealist_core::{
    LogInterface,
    MemoryStore,
    Session,
    SessionConfig,
    SessionStore,
    SurrealTransport,
    SurrealTransportConfig,
    UserQueryOptions,
};
use surrealist_model::QueryTab;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

const TAB_ID: &str = "cli";
const LIVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("surrealist_core=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::from_args()?;
    let endpoint = config.connection.endpoint();

    let store = Arc::new(MemoryStore::new().with_connection(config.connection.clone()));
    store.add_tab(
        QueryTab::new(TAB_ID, "CLI")
            .with_query(config.query.clone())
            .with_variables(config.variables.clone()),
    );

    let transport = SurrealTransport::new(
        SurrealTransportConfig::new().with_health_check_interval(config.health_check_interval),
    );
    let session = Session::with_config(
        transport,
        store.clone(),
        Arc::new(LogInterface),
        SessionConfig::new().with_version_check_timeout(config.version_check_timeout),
    );
    session.spawn_disconnect_watcher();

    session.open_connection(None).await?;
    if !store.is_connected() {
        session.shutdown().await;
        return Err(format!("could not connect to {endpoint}").into());
    }
    info!(%endpoint, version = %store.version(), "connected");

    let result = run(&session, store.as_ref(), config.watch).await;
    session.shutdown().await;
    result
}

async fn run(
    session: &Session<SurrealTransport>,
    store: &MemoryStore,
    watch: Option<Duration>,
) -> Result<(), Box<dyn Error>> {
    let response = session
        .execute_user_query(UserQueryOptions::default())
        .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let Some(watch) = watch else {
        return Ok(());
    };
    if !store.is_live(TAB_ID) {
        return Ok(());
    }

    info!(seconds = watch.as_secs(), "following live query messages");
    let deadline = tokio::time::Instant::now() + watch;
    let mut ticker = tokio::time::interval(LIVE_POLL_INTERVAL);
    let mut printed = 0;
    while tokio::time::Instant::now() < deadline && store.is_connected() {
        ticker.tick().await;
        let messages = store.live_messages(TAB_ID);
        for message in messages.iter().skip(printed) {
            println!("{}", serde_json::to_string(message)?);
        }
        printed = messages.len();
    }
    Ok(())
}
