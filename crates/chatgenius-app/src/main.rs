mod config;
mod input;
mod render;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use chatgenius_backend::LocalBackend;
use chatgenius_client::{ChatView, ClientError, ViewHandle};
use chatgenius_db::Database;

use crate::config::Config;
use crate::input::{HELP, Input};
use crate::render::Renderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the chat on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatgenius=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let db = Database::open(&config.db_path)?;
    info!("Database ready at {}", config.db_path.display());

    let backend = Arc::new(LocalBackend::new(db, config.jwt_secret, config.session_ttl));
    let (handle, view_task) = ChatView::spawn(backend);

    let mut states = handle.subscribe();
    let render_task = tokio::spawn(async move {
        let mut renderer = Renderer::new();
        loop {
            let state = states.borrow_and_update().clone();
            for line in renderer.update(&state) {
                println!("{}", line);
            }
            if states.changed().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match input::parse(&line) {
            Ok(input) => input,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match dispatch(&handle, input).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(ClientError::ViewClosed) => {
                error!("Chat view stopped unexpectedly");
                break;
            }
            Err(e) => println!("error: {}", e),
        }
    }

    let _ = handle.unmount().await;
    view_task.await?;
    render_task.await?;
    Ok(())
}

/// Run one input line against the view. Returns false to quit.
async fn dispatch(handle: &ViewHandle, input: Input) -> Result<bool, ClientError> {
    match input {
        Input::Blank => {}
        Input::Help => println!("{}", HELP),
        Input::Quit => return Ok(false),
        Input::SignUp { username, password } => handle.sign_up(&username, &password).await?,
        Input::SignIn { username, password } => handle.sign_in(&username, &password).await?,
        Input::SignOut => handle.sign_out().await?,
        Input::Channels => {
            println!("{}", render::channel_list(&handle.state()));
            handle.refresh_channels().await?;
        }
        // the renderer prints the list again if the refresh changes it
        Input::Users => {
            println!("{}", render::user_list(&handle.state()));
            handle.refresh_users().await?;
        }
        Input::NewChannel { name, description } => {
            handle.show_channel_form(true).await?;
            handle.create_channel(&name, &description).await?;
            println!("Created #{}", name.trim());
        }
        Input::Join(name) => {
            let channel = handle
                .state()
                .channels
                .into_iter()
                .find(|c| c.name == name);
            match channel {
                Some(channel) => handle.select_channel(channel.id).await?,
                None => println!("No channel named #{}", name),
            }
        }
        Input::Say(content) => handle.send_message(&content).await?,
    }
    Ok(true)
}
