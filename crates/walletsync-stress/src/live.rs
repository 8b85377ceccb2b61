/// Live mode: drive a real relay over WebSocket and report every engine
/// event. Useful for soaking a deployed relay through restarts.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use walletsync_backup::{
    BackupCategory, BackupConfig, BackupSession, LocalNodeStream, MemoryPersistence,
    SessionDeps, SharedSnapshots, SqlitePersistence, StaticIdentity, TrackerPersistence,
    TracingWarningSink, WalletIdentity, WalletNetwork,
};
use walletsync_transport::{TransportConfig, WsConnector};

use crate::events::{emit, EventBackup, EventStarted};

pub struct LiveConfig {
    pub relay: String,
    pub network: WalletNetwork,
    pub identity_seed: u64,
    pub state_db: Option<PathBuf>,
    pub mutations: u32,
    pub interval: Duration,
    pub category: BackupCategory,
}

pub async fn run(config: LiveConfig) -> anyhow::Result<()> {
    let start = Instant::now();
    let seed: [u8; 32] = StdRng::seed_from_u64(config.identity_seed).random();
    let persistence: Arc<dyn TrackerPersistence> = match &config.state_db {
        Some(path) => Arc::new(SqlitePersistence::open(path)?),
        None => Arc::new(MemoryPersistence::new()),
    };

    let snapshots = SharedSnapshots::new();
    let deps = SessionDeps {
        identity: Arc::new(StaticIdentity(WalletIdentity::from_seed(seed))),
        snapshots: Arc::new(snapshots.clone()),
        node_stream: Arc::new(LocalNodeStream::new()),
        warnings: Arc::new(TracingWarningSink),
        persistence,
    };
    let backup_config = BackupConfig::default().network(config.network);
    let transport_config = TransportConfig::new().endpoint(config.relay.clone());

    let mut session = BackupSession::start(WsConnector, transport_config, backup_config, deps).await?;
    emit(&EventStarted::new("live", session.namespace(), &config.relay));

    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            emit(&EventBackup::from_event(&event, start.elapsed().as_secs_f64()));
        }
    });

    let handle = session.handle();
    for i in 0..config.mutations {
        let blob = format!("{{\"live\":{i},\"at\":\"{}\"}}", chrono::Local::now().to_rfc3339());
        snapshots.set(config.category, blob.into_bytes());
        handle.notify_mutation(config.category).await?;
        tokio::time::sleep(config.interval).await;
    }

    // Let the last quiet period elapse and the write land.
    tokio::time::sleep(BackupConfig::default().debounce + Duration::from_secs(2)).await;

    match handle.list_backups(config.category).await {
        Ok(listing) => eprintln!("{} {} backups on the relay", listing.len(), config.category),
        Err(e) => eprintln!("listing failed: {e}"),
    }

    session.shutdown().await;
    let _ = reporter.await;
    Ok(())
}
