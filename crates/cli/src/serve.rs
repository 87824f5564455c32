//! Wire the stores, the WhatsApp session and the scheduler into the gateway
//! and run it until Ctrl-C or SIGTERM.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    rollcall_config::{MailConfig, RollcallConfig, Severity, WhatsAppConfig},
    rollcall_contacts::ContactCardExport,
    rollcall_cron::Scheduler,
    rollcall_gateway::{
        auth::AdminPassword,
        broadcast::StatusBroadcaster,
        distribution::{DistributionSettings, Distributor},
        jobs::{DistributionJobs, sync_system_jobs},
        request_throttle::{RequestThrottle, ThrottleLimits},
        server,
        state::{GatewaySettings, GatewayState},
    },
    rollcall_mail::{MailTransport, SmtpMailer, SmtpSettings},
    rollcall_whatsapp::{
        FileCredentialStore, LoginMethod, ReconnectPolicy, SessionAdapter, SessionOptions,
        SidecarConnector, SidecarLaunch, SidecarProcess, find_sidecar_dir, start_sidecar,
    },
    tokio::net::TcpListener,
    tracing::{error, info, warn},
};

/// Job database used when contacts live in a document database.
const FALLBACK_JOBS_URL: &str = "sqlite://rollcall-jobs.db?mode=rwc";

pub async fn run(config: RollcallConfig) -> Result<()> {
    let mut invalid = false;
    for d in rollcall_config::validate(&config) {
        match d.severity {
            Severity::Error => {
                error!(path = d.path, "{}", d.message);
                invalid = true;
            },
            Severity::Warning => warn!(path = d.path, "{}", d.message),
        }
    }
    if invalid {
        anyhow::bail!("configuration has errors; run `rollcall config check` for details");
    }

    // ── Storage ──────────────────────────────────────────────────────────
    let contacts = rollcall_contacts::open_store(&config.database.url, &config.database.name)
        .await
        .context("failed to open contact store")?;
    let jobs_url = if config.database.is_mongodb() {
        FALLBACK_JOBS_URL
    } else {
        config.database.url.as_str()
    };
    let job_store = rollcall_cron::store_sqlite::SqliteStore::new(jobs_url)
        .await
        .with_context(|| format!("failed to open job store at {jobs_url}"))?;
    let export = Arc::new(ContactCardExport::new(&config.export.path));

    // ── WhatsApp ─────────────────────────────────────────────────────────
    let mut sidecar = launch_sidecar(&config.whatsapp).await;
    let broadcaster = Arc::new(StatusBroadcaster::new());
    let connector = SidecarConnector::new(
        config.whatsapp.sidecar.port,
        config.whatsapp.account_id.clone(),
    )
    .with_browser(config.whatsapp.browser.clone());
    let session = Arc::new(SessionAdapter::new(
        Arc::new(connector),
        Arc::new(FileCredentialStore::new(&config.whatsapp.auth_dir)),
        broadcaster.clone(),
        session_options(&config.whatsapp),
    ));

    // ── Distribution and scheduling ──────────────────────────────────────
    let distributor = Arc::new(Distributor::new(
        Arc::clone(&contacts),
        Arc::clone(&export),
        Arc::clone(&session),
        build_mailer(&config.mail)?,
        DistributionSettings::from_config(&config),
    ));
    match distributor.refresh_export().await {
        Ok(count) => info!(count, path = %export.path().display(), "contact file ready"),
        Err(e) => warn!(error = %e, "failed to build contact file at startup"),
    }

    let scheduler = Scheduler::new(
        Arc::new(job_store),
        Arc::new(DistributionJobs::new(Arc::clone(&distributor))),
    );
    scheduler
        .start()
        .await
        .context("failed to start scheduler")?;
    sync_system_jobs(&scheduler, &config)
        .await
        .context("failed to sync distribution schedules")?;

    session.start();

    // ── HTTP ─────────────────────────────────────────────────────────────
    let admin_password = config.admin.password.clone().map(AdminPassword::new);
    let state = Arc::new(GatewayState {
        contacts,
        export,
        session: Arc::clone(&session),
        broadcaster,
        distributor,
        scheduler: Arc::clone(&scheduler),
        admin_password,
        settings: GatewaySettings::from_config(&config),
        request_throttle: RequestThrottle::new(ThrottleLimits::from_config(
            &config.server.rate_limits,
        )),
    });

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let served = server::serve(listener, state, shutdown_signal()).await;

    info!("shutting down");
    session.shutdown().await;
    scheduler.stop().await;
    if let Some(sidecar) = sidecar.as_mut() {
        sidecar.stop().await;
    }
    served.context("server error")
}

fn session_options(config: &WhatsAppConfig) -> SessionOptions {
    SessionOptions {
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(config.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect.max_delay_ms),
            max_attempts: config.reconnect.max_attempts,
        },
        announce_on_connect: config.announce_on_connect,
        default_login: LoginMethod::Qr,
    }
}

/// `None` when mail is disabled; a half-configured mailer is an error.
fn build_mailer(config: &MailConfig) -> Result<Option<Arc<dyn MailTransport>>> {
    if !config.enabled {
        info!("email delivery disabled");
        return Ok(None);
    }
    let settings = SmtpSettings {
        host: config
            .smtp_host
            .clone()
            .context("mail.smtp_host is required when mail is enabled")?,
        port: config.smtp_port,
        username: config.username.clone(),
        password: config.password.clone(),
        from: config
            .from
            .clone()
            .context("mail.from is required when mail is enabled")?,
    };
    let mailer = SmtpMailer::new(&settings).context("failed to set up SMTP transport")?;
    info!(host = %settings.host, port = settings.port, "email delivery enabled");
    Ok(Some(Arc::new(mailer)))
}

/// Start the Baileys sidecar when configured to. A failure is logged and the
/// session keeps retrying against the port, so an externally started sidecar
/// still works.
async fn launch_sidecar(config: &WhatsAppConfig) -> Option<SidecarProcess> {
    if !config.sidecar.auto_start {
        return None;
    }
    let dir = match find_sidecar_dir(config.sidecar.dir.as_deref()) {
        Ok(dir) => dir,
        Err(e) => {
            warn!(error = %e, "WhatsApp sidecar not found, expecting one on port {}", config.sidecar.port);
            return None;
        },
    };
    match start_sidecar(SidecarLaunch {
        dir,
        port: config.sidecar.port,
    })
    .await
    {
        Ok(process) => Some(process),
        Err(e) => {
            error!(error = %e, "failed to start WhatsApp sidecar");
            None
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
