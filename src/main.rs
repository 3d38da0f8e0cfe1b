extern crate dotenv;

use std::sync::Arc;

use dotenv::dotenv;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

use oracle_provider::admin::{self, AdminTask};
use oracle_provider::chain::{AlloyChainClient, ChainClient, ChainEvent, EventKind, EventStream};
use oracle_provider::config::Config;
use oracle_provider::constants::PAIR_REFRESH_INTERVAL;
use oracle_provider::dex::refresh::refresh_dex_pairs;
use oracle_provider::dex::{build_modules, DexAggregator, DexModule, SubgraphClient};
use oracle_provider::error::OracleError;
use oracle_provider::indexing::{Ingestor, IngestorTracker};
use oracle_provider::processing::{ApiResolver, JobScheduler, Resolver};
use oracle_provider::server::{run_server, ServerState};
use oracle_provider::store::postgres::{build_pool, run_migrations};
use oracle_provider::store::{JobStore, MemoryStore, PgStore};
use oracle_provider::submitter::TxSubmitter;

const MEMORY_STORE_URL: &str = "memory://";
const ADMIN_QUEUE_SIZE: usize = 32;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    let filter = EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {e}");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Refusing to start: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("Successfully loaded config: {:?}", config);

    if let Err(e) = run(config).await {
        tracing::error!("Provider stopped: {e}");
        std::process::exit(1);
    }
}

async fn open_store(database_url: &str) -> Result<Arc<dyn JobStore>, OracleError> {
    if database_url.starts_with(MEMORY_STORE_URL) {
        tracing::warn!("Using the in-memory store, nothing will survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    run_migrations(database_url).await?;
    Ok(Arc::new(PgStore::new(build_pool(database_url)?)))
}

async fn run(config: Config) -> Result<(), OracleError> {
    let signer = config.key_source.load_signer()?;
    tracing::info!("Provider address {}", signer.address());

    let store = open_store(&config.database_url).await?;
    let chain: Arc<dyn ChainClient> =
        Arc::new(AlloyChainClient::connect(&config.chain, signer.clone())?);

    let submitter = Arc::new(TxSubmitter::new(
        Arc::clone(&chain),
        signer,
        config.chain.contract_address,
        config.chain.gas_limit,
        config.max_gas_price_wei(),
    ));
    let nonce = submitter.init_nonce().await?;
    tracing::info!("Starting from nonce {nonce}");

    let api = ApiResolver::new(&config.jobs.api_base_url, Arc::clone(&store))?;
    let subgraph = SubgraphClient::new()?;
    let modules = build_modules(&config.dex_overrides, config.subgraph_api_key.as_deref());
    tracing::info!(
        "DEX modules enabled: {:?}",
        modules.iter().map(|m| m.name().to_string()).collect::<Vec<_>>()
    );
    let dex = DexAggregator::new(modules.clone(), subgraph.clone(), Arc::clone(&store));

    let network = config.chain.network_id.to_string();
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::new(Resolver::new(api.clone(), dex)),
        Arc::clone(&submitter),
        config.jobs.wait_confirmations,
        network.clone(),
    ));

    let tracker = Arc::new(IngestorTracker::new());
    let ingestor = Ingestor::new(
        Arc::clone(&store),
        Arc::clone(&chain),
        config.chain.first_block,
        network,
        Arc::clone(&tracker),
    );

    let mut requested = ingestor.subscribe_with_backoff(EventKind::DataRequested).await;
    let mut fulfilled = ingestor.subscribe_with_backoff(EventKind::RequestFulfilled).await;
    ingestor.backfill().await?;

    let (admin_tx, mut admin_rx) = mpsc::channel::<AdminTask>(ADMIN_QUEUE_SIZE);
    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let addr = config.admin.socket_addr()?;
    let server = tokio::spawn(run_server(
        addr,
        ServerState::new(admin_tx, Arc::clone(&tracker)),
        async move {
            server_stopped.await.ok();
        },
    ));

    let mut jobs_ticker = interval(config.jobs.check_duration);
    jobs_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately and performs the start-up refresh.
    let mut refresh_ticker = interval(PAIR_REFRESH_INTERVAL);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = jobs_ticker.tick() => {
                let scheduler = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    if let Err(e) = scheduler.tick().await {
                        tracing::warn!("[JOBS] Tick failed: {e}");
                    }
                });
            }
            _ = refresh_ticker.tick() => {
                spawn_pair_refresh(api.clone(), modules.clone(), subgraph.clone(), Arc::clone(&store));
            }
            event = requested.next() => match event {
                Some(event) => handle(&ingestor, event).await,
                None => requested = resubscribe(&ingestor, EventKind::DataRequested).await,
            },
            event = fulfilled.next() => match event {
                Some(event) => handle(&ingestor, event).await,
                None => fulfilled = resubscribe(&ingestor, EventKind::RequestFulfilled).await,
            },
            Some(task) = admin_rx.recv() => {
                let submitter = Arc::clone(&submitter);
                tokio::spawn(async move {
                    let response = admin::execute(&submitter, &task.request).await;
                    if task.reply.send(response).is_err() {
                        tracing::warn!("[ADMIN] Caller went away before the reply");
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    tracing::info!("Shutting down");
    drop(requested);
    drop(fulfilled);
    match ingestor.checkpoint_head().await {
        Ok(head) => tracing::info!("Checkpoint moved to block {head}"),
        Err(e) => tracing::error!("Failed to checkpoint the chain head: {e}"),
    }
    stop_server.send(()).ok();
    match server.await {
        Ok(Err(e)) => tracing::error!("Admin server failed: {e}"),
        Err(e) => tracing::error!("Admin server task failed: {e}"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

async fn handle(ingestor: &Ingestor, event: ChainEvent) {
    if let Err(e) = ingestor.handle_event(event).await {
        tracing::error!("[INGESTOR] Failed to handle event: {e}");
    }
}

/// Reopens a closed stream, then replays what was missed while it was down.
async fn resubscribe(ingestor: &Ingestor, kind: EventKind) -> EventStream {
    ingestor.stream_closed(kind).await;
    let stream = ingestor.subscribe_with_backoff(kind).await;
    if let Err(e) = ingestor.backfill().await {
        tracing::error!("[INGESTOR] Backfill after resubscribe failed: {e}");
    }
    stream
}

fn spawn_pair_refresh(
    api: ApiResolver,
    modules: Vec<Arc<dyn DexModule>>,
    subgraph: SubgraphClient,
    store: Arc<dyn JobStore>,
) {
    tokio::spawn(async move {
        match api.refresh_supported_pairs().await {
            Ok(count) => tracing::info!("[PAIRS] {count} supported pairs cached"),
            Err(e) => tracing::warn!("[PAIRS] Supported pairs refresh failed: {e}"),
        }
    });
    tokio::spawn(refresh_dex_pairs(modules, subgraph, store));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
