use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;

use herald::core::{Config, TokioClock};
use herald::features::reminders::{
    Agenda, JobRegistry, LogSink, ReminderKind, ReminderRegistry, ReminderScheduler,
};
use herald::features::unread::{
    CoordinatorSettings, CounterAggregator, EventFilter, MemoryEventSource, MemorySnapshotStore,
    ReconciliationCoordinator,
};
use herald::features::{get_features, get_version};

/// Scope the in-process unread counters subscribe to
const UNREAD_SCOPE: &str = "messages";

/// Read the agenda file off the runtime threads.
///
/// A missing file is an empty agenda; a file that fails to parse yields `None`
/// so the current reminders are kept rather than canceled on a bad edit.
async fn load_agenda(path: String) -> Option<Agenda> {
    let loaded = tokio::task::spawn_blocking(move || match Agenda::load(&path) {
        Ok(agenda) => Some(agenda),
        Err(e) => {
            if std::path::Path::new(&path).exists() {
                warn!("❌ Failed to load agenda from {path}: {e}");
                None
            } else {
                info!("📄 No agenda found at {path} - nothing to remind about");
                Some(Agenda::default())
            }
        }
    })
    .await;

    match loaded {
        Ok(agenda) => agenda,
        Err(e) => {
            error!("Agenda loader task failed: {e}");
            None
        }
    }
}

/// Reconcile every reminder kind against the agenda file
async fn refresh_agenda(config: &Config, scheduler: &ReminderScheduler) {
    let Some(agenda) = load_agenda(config.agenda_path.clone()).await else {
        return;
    };

    for kind in ReminderKind::ALL {
        scheduler.sync(kind, &agenda.entities(kind), config.lead_time(kind));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting herald v{}...", get_version());
    for feature in get_features() {
        info!("  {} v{}", feature.name, feature.version);
    }

    // Reminders
    let clock = Arc::new(TokioClock::new()?);
    let sink = Arc::new(LogSink);
    let registry = Arc::new(ReminderRegistry::new(clock, sink.clone()));
    let scheduler = Arc::new(ReminderScheduler::new(registry.clone(), sink));
    scheduler.set_enabled(config.reminders_enabled);
    if !config.reminders_enabled {
        warn!("Reminders are disabled (REMINDERS_ENABLED=false)");
    }

    info!(
        "⏰ Lead times: tasks {}m, meetings {}m; refreshing {} every {:?}",
        config.task_lead_time.num_minutes(),
        config.meeting_lead_time.num_minutes(),
        config.agenda_path,
        config.agenda_refresh
    );

    // Agenda refresh loop; first tick fires immediately
    let refresh_scheduler = scheduler.clone();
    let refresh_config = config.clone();
    let refresh = tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_config.agenda_refresh);
        loop {
            interval.tick().await;
            refresh_agenda(&refresh_config, &refresh_scheduler).await;
            info!(
                "Tracking {} tasks and {} meetings ({} armed)",
                refresh_scheduler.tracked_count(ReminderKind::Task),
                refresh_scheduler.tracked_count(ReminderKind::Meeting),
                refresh_scheduler.registry().len()
            );
        }
    });

    // Unread counters over the in-process event source and snapshot store
    let aggregator = Arc::new(CounterAggregator::new());
    let coordinator = ReconciliationCoordinator::new(
        aggregator.clone(),
        Arc::new(MemoryEventSource::new()),
        Arc::new(MemorySnapshotStore::new()),
        CoordinatorSettings::from_config(EventFilter::inserts(UNREAD_SCOPE), &config),
    );
    coordinator.start()?;
    if let Some(period) = config.resync_interval {
        info!("🔄 Unread counters resync every {:?}", period);
    }

    // Badge logger
    let mut total = aggregator.subscribe_total();
    let badge = tokio::spawn(async move {
        while total.changed().await.is_ok() {
            let unread = *total.borrow_and_update();
            info!("📬 Unread badge: {unread}");
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down...");
    refresh.abort();
    scheduler.cancel_all_kinds();
    registry.remove_all();
    coordinator.stop().await;
    badge.abort();
    info!("👋 herald stopped");

    Ok(())
}
