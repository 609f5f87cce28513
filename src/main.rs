use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use contacts::ContactStoreClient;
use mail_api::MailApiClient;
use mailroom_config::{MailroomSettings, DEFAULT_CARDDAV_HOSTNAME, DEFAULT_MAIL_HOSTNAME};
use screener::{wait_for_trigger, ContactStoreAdapter, MailApiAdapter, ScreenerWorkflow};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

#[derive(Parser, Debug)]
#[command(name = "mailroom", author, version, about = "Push-triggered email triage automator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the triage service (default).
    Run,
    /// Reconcile required mailboxes and contact groups.
    Setup {
        /// Create missing resources instead of just printing the plan.
        #[arg(long)]
        apply: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match MailroomSettings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&settings);

    let exit_code = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Setup { apply } => setup::run_setup(settings, apply).await,
    };
    std::process::exit(exit_code);
}

fn init_tracing(settings: &MailroomSettings) {
    let level = match settings.logging.level {
        mailroom_config::LoggingLevel::Trace => tracing::Level::TRACE,
        mailroom_config::LoggingLevel::Debug => tracing::Level::DEBUG,
        mailroom_config::LoggingLevel::Info => tracing::Level::INFO,
        mailroom_config::LoggingLevel::Warn => tracing::Level::WARN,
        mailroom_config::LoggingLevel::Error => tracing::Level::ERROR,
    };
    let subscriber = tracing_subscriber::fmt().with_max_level(level);

    if let Some(path) = &settings.logging.log_file {
        let file = std::fs::File::create(path).expect("couldn't open log file");
        let subscriber = subscriber.with_writer(std::sync::Mutex::new(file)).finish();
        tracing::subscriber::set_global_default(subscriber).expect("couldn't set up tracing");
    } else {
        let subscriber = subscriber.finish();
        tracing::subscriber::set_global_default(subscriber).expect("couldn't set up tracing");
    }
}

/// The `run` subcommand: startup sequence, main debounced loop, signal-driven shutdown.
async fn run(settings: MailroomSettings) -> i32 {
    // 1. configuration already loaded and validated.

    // 2. Connect to the mail API.
    let mail_hostname = settings.mail_hostname.clone().unwrap_or_else(|| DEFAULT_MAIL_HOSTNAME.to_string());
    let mut mail_client = match MailApiClient::new(&settings.jmap_token, &mail_hostname) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build mail API client");
            return 1;
        }
    };
    if let Err(e) = mail_client.connect().await {
        tracing::error!(error = %e, "mail API connection failed");
        return 1;
    }

    // 3. Connect to the contact store.
    let (Some(username), Some(password)) = (&settings.carddav_username, &settings.carddav_password) else {
        tracing::error!("CardDAV credentials are required (MAILROOM_CARDDAV_USERNAME/MAILROOM_CARDDAV_PASSWORD)");
        return 1;
    };
    let carddav_hostname = settings.carddav_url.clone().unwrap_or_else(|| DEFAULT_CARDDAV_HOSTNAME.to_string());
    let mut contact_client = match ContactStoreClient::new(username, password, &carddav_hostname) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build contact store client");
            return 1;
        }
    };
    if let Err(e) = contact_client.connect().await {
        tracing::error!(error = %e, "contact store connection failed");
        return 1;
    }

    // 4. Resolve required mailboxes.
    let required_mailboxes = settings.required_mailboxes();
    let mailbox_ids = match mail_client.resolve_mailboxes(&required_mailboxes).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve required mailboxes");
            return 1;
        }
    };

    // 5. Validate required contact groups.
    let contact_groups = settings.contact_groups();
    if let Err(e) = contact_client.validate_groups(&contact_groups).await {
        tracing::error!(error = %e, "failed to validate required contact groups");
        return 1;
    }

    // 6. Build the workflow.
    let event_source_url = mail_client.event_source_url().map(str::to_string);
    let token = settings.jmap_token.clone();

    let label_mailbox_ids = mailbox_ids.clone();
    let destination_mailbox_ids = mailbox_ids.clone();
    let screener_mailbox_id = match mailbox_ids.get(&settings.sender_screen_mailbox) {
        Some(id) => id.clone(),
        None => {
            tracing::error!(mailbox = settings.sender_screen_mailbox, "screener mailbox not resolved");
            return 1;
        }
    };
    let error_label_id = match mailbox_ids.get(&settings.labels.error_label) {
        Some(id) => id.clone(),
        None => {
            tracing::error!(label = settings.labels.error_label, "error label mailbox not resolved");
            return 1;
        }
    };
    let warning_label_id = settings
        .labels
        .warning_label
        .as_ref()
        .and_then(|name| mailbox_ids.get(name).cloned());

    let workflow = ScreenerWorkflow::new(
        Arc::new(MailApiAdapter(mail_client)),
        Arc::new(ContactStoreAdapter(AsyncMutex::new(contact_client))),
        settings.categories.clone(),
        label_mailbox_ids,
        destination_mailbox_ids,
        screener_mailbox_id,
        error_label_id,
        warning_label_id,
    );

    let shutdown = CancellationToken::new();
    install_signal_handlers(shutdown.clone());

    // 7. Start the health-endpoint server (daemon).
    let health_state = Arc::new(health::HealthState::new());
    let poll_interval_secs = settings.polling.fallback_interval_secs;
    let health_addr: SocketAddr = DEFAULT_HEALTH_ADDR.parse().expect("valid default health address");
    {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(health_state, poll_interval_secs, health_addr).await {
                tracing::error!(error = %e, "health endpoint server exited");
            }
        });
    }

    // 8. Start the SSE listener, if the session provided an event-source URL.
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(url) = event_source_url {
        let health_state = health_state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            eventsource::run(&token, &url, tx, shutdown, health_state).await;
        });
    } else {
        tracing::warn!("mail session did not provide an eventSourceUrl; running on fallback polling only");
        drop(tx);
    }

    main_loop(workflow, &mut rx, shutdown, health_state, poll_interval_secs, settings.polling.debounce_secs).await
}

async fn main_loop<M: screener::MailApi, C: screener::ContactStore>(
    workflow: ScreenerWorkflow<M, C>,
    rx: &mut mpsc::UnboundedReceiver<()>,
    shutdown: CancellationToken,
    health_state: Arc<health::HealthState>,
    poll_interval_secs: u64,
    debounce_secs: u64,
) -> i32 {
    let poll_interval = Duration::from_secs(poll_interval_secs);
    let debounce = Duration::from_secs(debounce_secs);
    let mut consecutive_failures: u32 = 0;

    loop {
        let Some(_reason) = wait_for_trigger(rx, &shutdown, poll_interval, debounce).await else {
            tracing::info!("shutdown signal received, exiting main loop");
            return 0;
        };

        match workflow.poll().await {
            Ok(processed) => {
                consecutive_failures = 0;
                health_state.mark_poll_success();
                tracing::info!(senders_processed = processed, "triage cycle completed");
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::error!(error = %e, consecutive_failures, "triage cycle failed");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!("reached MAX_CONSECUTIVE_FAILURES, exiting");
                    return 1;
                }
            }
        }

        if shutdown.is_cancelled() {
            return 0;
        }
    }
}

fn install_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        }
        shutdown.cancel();
    });
}
