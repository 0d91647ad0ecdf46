use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, warn, LevelFilter};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

use room_chat_client::login::{
    generate_user_id, normalize_room, validate_message, validate_username, wait_for_connection,
    CONNECT_POLL_INTERVAL, CONNECT_WAIT,
};
use room_chat_client::{
    ClientConfig, ConnectionChange, FileStore, KeyValueStore, MemoryStore, RoomView,
    SessionManager, Subscription, TransportKind,
};

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportArg {
    Polling,
    Websocket,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Polling => TransportKind::Polling,
            TransportArg::Websocket => TransportKind::Websocket,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "room_chat", about = "Join a chat room from the terminal")]
struct Args {
    /// TOML file with client settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay base URL, overrides the config file
    #[arg(long, env = "ROOM_CHAT_SERVER")]
    server: Option<String>,

    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// Where the user id and username are remembered between runs
    #[arg(long, default_value = "room_chat_state.json")]
    state_file: PathBuf,

    #[arg(long)]
    debug: bool,

    username: String,
    room: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .parse_default_env()
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let username = match validate_username(&args.username) {
        Ok(username) => username.to_string(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    let room = match normalize_room(&args.room) {
        Ok(room) => room,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let store: Arc<dyn KeyValueStore> = match FileStore::open(&args.state_file).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Cannot use {}: {e}, keeping state in memory", args.state_file.display());
            Arc::new(MemoryStore::new())
        }
    };

    let user_id = generate_user_id();
    let manager = SessionManager::with_socket_io(config, store);

    manager.initialize(&user_id, &username).await;
    if !wait_for_connection(&manager, CONNECT_WAIT, CONNECT_POLL_INTERVAL).await {
        eprintln!("Could not reach the chat server. Please try again.");
        manager.disconnect().await;
        std::process::exit(1);
    }

    let view = Arc::new(Mutex::new(RoomView::new()));
    view.lock().set_connected(true);
    let _subscriptions = subscribe(&manager, &view, &user_id, &username);

    manager.join_room(&room, Some(&username), Some(&user_id));
    println!("Joined #{room} as {username}. Type /users, /leave or /quit.");

    chat_loop(&manager, &view, &room, &user_id).await;

    manager.leave_room();
    manager.disconnect().await;
}

fn load_config(args: &Args) -> Result<ClientConfig, room_chat_client::ConfigError> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = &args.server {
        config.server_url.clone_from(server);
    }
    if let Some(transport) = args.transport {
        config.transport = transport.into();
    }
    config.validate()?;
    Ok(config)
}

fn subscribe(
    manager: &SessionManager,
    view: &Arc<Mutex<RoomView>>,
    user_id: &str,
    username: &str,
) -> Vec<Subscription> {
    let mut subscriptions = Vec::new();

    let messages = Arc::clone(view);
    let (own_id, own_name) = (user_id.to_string(), username.to_string());
    subscriptions.push(manager.on_message(move |message| {
        if !messages.lock().add_message(message) {
            return;
        }
        let who = if message.is_own(&own_id, &own_name) {
            "you"
        } else {
            message.username.as_str()
        };
        println!("[{}] {who}: {}", message.timestamp.format("%H:%M"), message.text);
    }));

    let joined = Arc::clone(view);
    subscriptions.push(manager.on_user_joined(move |user| {
        joined.lock().user_joined(user);
        println!("* {} joined", user.username);
    }));

    let left = Arc::clone(view);
    subscriptions.push(manager.on_user_left(move |user| {
        left.lock().user_left(user);
        println!("* {} left", user.username);
    }));

    let roster = Arc::clone(view);
    subscriptions.push(manager.on_room_users(move |users| {
        roster.lock().set_users(users);
    }));

    let status = Arc::clone(view);
    subscriptions.push(manager.on_connection(move |connected| {
        let change = status.lock().set_connected(connected);
        if let Some(change) = change {
            print_connection_change(change);
        }
    }));

    subscriptions
}

fn print_connection_change(change: ConnectionChange) {
    match change {
        ConnectionChange::Lost => println!("* connection lost, trying to reconnect"),
        ConnectionChange::Restored => println!("* connection restored"),
    }
}

async fn chat_loop(manager: &SessionManager, view: &Mutex<RoomView>, room: &str, user_id: &str) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // The session never reports a drop, so poll for it.
    let mut status = tokio::time::interval(STATUS_POLL_INTERVAL);
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => return,
            _ = status.tick() => {
                let change = view.lock().set_connected(manager.is_connected());
                if let Some(change) = change {
                    print_connection_change(change);
                }
                continue;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to read input: {e}");
                return;
            }
        };

        match line.trim() {
            "/quit" | "/leave" => return,
            "/users" => {
                let view = view.lock();
                let names: Vec<&str> = view.users().iter().map(|u| u.username.as_str()).collect();
                println!("* {} online: {}", names.len(), names.join(", "));
            }
            text => match validate_message(text) {
                Ok(_) if !manager.is_connected() => {
                    println!("* not connected, message not sent");
                }
                Ok(text) => manager.send_message(text, room, Some(user_id)),
                Err(e) => println!("* {e}"),
            },
        }
    }
}
