use std::sync::Arc;

use convo_crm::api::{self, AppState};
use convo_crm::channels::TransportRegistry;
use convo_crm::channels::instagram::{InstagramPublisher, InstagramTransport};
use convo_crm::channels::renewal::HttpSubscriptionRenewer;
use convo_crm::channels::whatsapp::WhatsAppTransport;
use convo_crm::config::AppConfig;
use convo_crm::contacts::{ContactLocks, ContactStateMachine};
use convo_crm::conversation::ConversationService;
use convo_crm::error::Result;
use convo_crm::events::{EventBus, spawn_heartbeat};
use convo_crm::scheduler::{PublishDriver, RenewalDriver, Scheduler};
use convo_crm::store::{Database, LibSqlBackend};
use convo_crm::threads::MessageThreadStore;
use convo_crm::{logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;

    // Held until exit so buffered log lines are flushed.
    let _log_guard = logging::init_tracing(config.log_dir.as_deref());

    eprintln!("convo-crm v{}", env!("CARGO_PKG_VERSION"));
    if let Some(dir) = &config.log_dir {
        eprintln!("   Logs: {}", dir.display());
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Core services ────────────────────────────────────────────────────
    let bus = EventBus::new();
    let locks = ContactLocks::new();
    let threads = Arc::new(MessageThreadStore::new(
        db.clone(),
        db.clone(),
        Arc::clone(&locks),
        bus.clone(),
    ));
    let contacts = Arc::new(ContactStateMachine::new(db.clone(), locks, bus.clone()));

    // ── Channels ─────────────────────────────────────────────────────────
    let mut transports = TransportRegistry::new();
    if let Some(wa) = &config.whatsapp {
        transports.register(Arc::new(WhatsAppTransport::new(
            config.graph_api_base.as_str(),
            wa.phone_number_id.as_str(),
            wa.access_token.clone(),
        )?));
        eprintln!("   WhatsApp: enabled");
    }
    if let Some(ig) = &config.instagram {
        transports.register(Arc::new(InstagramTransport::new(
            config.graph_api_base.as_str(),
            ig.account_id.as_str(),
            ig.access_token.clone(),
        )?));
        eprintln!("   Instagram: enabled");
    }
    if transports.channels().is_empty() {
        eprintln!("   Channels: none configured (outbound sends will fail)");
    }

    let conversations = Arc::new(ConversationService::new(
        db.clone(),
        threads.clone(),
        transports,
        bus.clone(),
    ));

    // ── Scheduler ────────────────────────────────────────────────────────
    let publish = match &config.instagram {
        Some(ig) => {
            let publisher = InstagramPublisher::new(
                config.graph_api_base.as_str(),
                ig.account_id.as_str(),
                ig.access_token.clone(),
            )?;
            Some(PublishDriver::new(db.clone(), Arc::new(publisher), bus.clone()))
        }
        None => None,
    };
    let renewal = match &config.renewal {
        Some(r) => {
            let renewer = HttpSubscriptionRenewer::new(r.endpoint.as_str(), r.token.clone())?;
            Some(
                RenewalDriver::new(db.clone(), Arc::new(renewer), bus.clone()).with_window(
                    config.scheduler.renewal_threshold,
                    config.scheduler.renewal_period,
                ),
            )
        }
        None => None,
    };
    let scheduler = Arc::new(Scheduler::new(publish, renewal).with_intervals(
        config.scheduler.publish_interval,
        config.scheduler.renewal_interval,
    ));
    if config.scheduler.enabled {
        scheduler.start_background_drivers();
        eprintln!(
            "   Scheduler: enabled (publish every {}s, renewal every {}s)",
            config.scheduler.publish_interval.as_secs(),
            config.scheduler.renewal_interval.as_secs(),
        );
    } else {
        eprintln!("   Scheduler: disabled (manual checks only)");
    }

    // ── Live updates + HTTP ──────────────────────────────────────────────
    let shutdown = shutdown::install_signal_handler();
    let heartbeat = spawn_heartbeat(bus.clone(), config.heartbeat_interval, shutdown.clone());

    let db: Arc<dyn Database> = db;
    let app = api::routes(AppState {
        db,
        threads,
        contacts,
        conversations,
        scheduler: scheduler.clone(),
        bus,
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server started");
    eprintln!("   Listening on 0.0.0.0:{}", config.port);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    scheduler.shutdown().await;
    if let Err(e) = heartbeat.await {
        tracing::warn!(error = %e, "Heartbeat task ended abnormally");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
