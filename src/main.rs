use doorbell_relay::bot::{Bot, SessionFactory};
use doorbell_relay::chat;
use doorbell_relay::config::Settings;
use doorbell_relay::http::create_http_client;
use doorbell_relay::logging::{init_logging, RedactionPatterns};
use doorbell_relay::notifier::Notifier;
use doorbell_relay::ring::client::load_or_create_hardware_id;
use doorbell_relay::ring::{Auth, Authenticator, DoorbellSession, RingOAuth, RingSession, TokenCache};
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Initialize redaction patterns early (before logging)
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    // Nothing touches the network before this succeeds
    let settings = init_settings();

    let mut bot = init_bot(&settings);
    let shutdown = bot.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("❗ Shutdown signal received...");
        shutdown.cancel();
    });

    if let Err(e) = bot.start().await {
        error!("Bot failed to start: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(settings) => {
            info!(chat = ?settings.chat, "Configuration loaded successfully.");
            settings
        }
        Err(e) => {
            error!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_bot(settings: &Settings) -> Bot {
    let http = create_http_client(settings.http_timeout, &settings.ring.user_agent);
    let cache = TokenCache::new(&settings.token_cache_path);
    let hardware_id = load_or_create_hardware_id(&cache.path().with_file_name("hardware_id"));

    let oauth = Arc::new(RingOAuth::new(http.clone(), hardware_id.clone()));
    let authenticator = Authenticator::new(&settings.ring, cache, oauth);

    let chat_client = chat::client_for(&settings.chat, settings.http_timeout);
    let notifier = Notifier::new(chat_client, settings.chat.channel_id());

    let user_agent = settings.ring.user_agent.clone();
    let connect: SessionFactory = Box::new(move |auth: Arc<Auth>| {
        Arc::new(RingSession::new(
            http.clone(),
            auth,
            hardware_id.clone(),
            &user_agent,
        )) as Arc<dyn DoorbellSession>
    });

    Bot::new(authenticator, notifier, connect, settings)
}

/// Wait for `signal`. A handler that cannot be installed never fires.
async fn listen<E: std::fmt::Display>(
    signal: impl std::future::Future<Output = Result<(), E>>,
    name: &str,
) {
    if let Err(e) = signal.await {
        error!("Failed to listen for {name}: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        let mut stream = signal(SignalKind::terminate())?;
        stream.recv().await;
        Ok::<(), std::io::Error>(())
    };
    tokio::select! {
        () = listen(tokio::signal::ctrl_c(), "SIGINT") => {}
        () = listen(terminate, "SIGTERM") => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    listen(tokio::signal::ctrl_c(), "Ctrl+C").await;
}
