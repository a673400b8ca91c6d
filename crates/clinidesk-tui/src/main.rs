use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Result;
use clinidesk_core::{ApiGateway, AppContext, Config, SessionStore, TokenStore};
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

/// Send tracing output to `<data_dir>/clinidesk/clinidesk.log`; stderr belongs to the terminal UI.
fn init_logging(config: &Config) -> Result<()> {
    let data_dir = Config::data_dir()?;
    fs::create_dir_all(&data_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("clinidesk.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring unreadable config ({e}), using defaults");
        Config::new()
    });

    if let Err(e) = init_logging(&config) {
        eprintln!("Logging disabled: {e}");
    }

    // One context shared by the gateway and the session store
    let ctx = AppContext::new();
    let gateway = ApiGateway::with_timeout(&config.api_base_url, config.request_timeout(), ctx.clone())?;
    tracing::info!(api = %gateway.base_url(), "clinidesk starting v{}", env!("CARGO_PKG_VERSION"));
    let session = SessionStore::new(ctx, TokenStore::from_config(&config)?);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    let mut app = App::new(&config, gateway, session, events.sender());
    app.start();

    let result = run(&mut terminal, &mut events, &mut app).await;

    app.shutdown();
    tui::restore()?;
    tracing::info!("clinidesk stopped");

    result
}

async fn run(terminal: &mut tui::Tui, events: &mut EventHandler, app: &mut App) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}
