mod app;
mod handler;
mod tui;
mod ui;

use std::fs::{self, File};
use std::sync::{Arc, Mutex};
use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wanderlust_core::config::{API_KEY_ENV, ASSISTANT_ID_ENV};
use wanderlust_core::{ensure_assistant, AssistantApi, Config, Conversation, MapStore, OpenAiAssistants, ToolRegistry};

use app::App;
use tui::EventHandler;

/// Log to a file in the config directory; the terminal belongs to the UI
fn init_tracing() -> Result<()> {
    let log_dir = Config::config_dir()?;
    fs::create_dir_all(&log_dir)?;
    let log_file = File::create(log_dir.join("wanderlust.log"))
        .context("Failed to create log file")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wanderlust_tui=info,wanderlust_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Config::load()?;
    let api_key = config.resolve_api_key(std::env::var(API_KEY_ENV).ok())?;
    let api: Arc<dyn AssistantApi> = Arc::new(OpenAiAssistants::with_base_url(&api_key, config.api_base()));

    let tools = ToolRegistry::new(MapStore::new());
    let configured = config.resolve_assistant_id(std::env::var(ASSISTANT_ID_ENV).ok());
    let (assistant_id, created) =
        ensure_assistant(api.as_ref(), configured, config.model(), &tools.definitions())
            .await
            .context("Failed to set up the assistant")?;
    if created {
        Config::save_assistant_id(&assistant_id)?;
    }

    let conversation = Conversation::start(api, assistant_id, tools, config.poll_settings())
        .await
        .context("Failed to start a conversation thread")?;
    info!(thread_id = conversation.thread_id(), "Session ready");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, App::new(conversation)).await;
    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, mut app: App) -> Result<()> {
    let mut events = EventHandler::new();
    let mut log_rx = app.conversation.log().subscribe();
    let mut map_rx = app.conversation.map().subscribe();
    let mut status_rx = app.conversation.subscribe_status();

    loop {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        tokio::select! {
            event = events.next() => match event {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            },
            Ok(()) = log_rx.changed() => {}
            Ok(()) = map_rx.changed() => {}
            Ok(()) = status_rx.changed() => {}
        }

        app.refresh();
        if app.should_quit {
            break;
        }
    }

    info!("Shutting down");
    Ok(())
}
