use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use vortex_client::appearance::{self, Theme};
use vortex_client::{
    AppearanceConfig, AuthService, Backend, ChatListView, Client, ClientConfig, ClientError,
    LiveHandle, MessageStreamReconciler, Session, StyleSheet,
};
use vortex_db::Database;
use vortex_gateway::{GatewayError, LocalBackend, ObjectStore};

const HELP: &str = "\
/list           show chats
/open N         open chat N from the list
/search QUERY   find people
/start USER_ID  open a chat with a user
/block USER_ID  block or unblock a user
/theme MODE     dark, light or auto
/quit           sign out and exit
anything else is sent to the open chat";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vortex=debug,vortex_client=debug,vortex_gateway=info".into()),
        )
        .init();

    // Config
    let config = ClientConfig::from_env()?;
    if config.has_placeholder_secret() {
        anyhow::bail!("VORTEX_JWT_SECRET is unset or a placeholder; set a real secret");
    }
    let email = std::env::var("VORTEX_EMAIL").map_err(|_| anyhow::anyhow!("VORTEX_EMAIL is required"))?;
    let password =
        std::env::var("VORTEX_PASSWORD").map_err(|_| anyhow::anyhow!("VORTEX_PASSWORD is required"))?;

    // Backend
    let db = Database::open(&config.db_path)?;
    let objects = ObjectStore::new(config.storage_dir.clone(), config.public_url.clone()).await?;
    let gateway = Arc::new(LocalBackend::new(db, config.jwt_secret.clone(), Some(objects)));

    let auth = AuthService::new(Backend::new(gateway.clone(), config.request_timeout));
    let session = sign_in_or_up(&auth, &email, &password).await?;
    info!("Signed in as {} ({})", session.email, session.user_id);

    let mut style = StyleSheet::default();
    appearance::apply(&AppearanceConfig::default(), &mut style, true);

    let mut client = Client::new(gateway, config.request_timeout, session.clone());
    let chat_list_live = client.chats.subscribe();
    if let Err(e) = client.chats.load().await {
        warn!("Initial chat list load failed: {}", e);
    }
    print_chats(&client.chats.snapshot());
    println!("{}", HELP);

    let mut printer: Option<LiveHandle> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();

        match command {
            "/quit" => break,
            "/help" => println!("{}", HELP),
            "/list" => {
                if let Err(e) = client.chats.load().await {
                    println!("chat list unavailable: {}", e);
                }
                print_chats(&client.chats.snapshot());
            }
            "/open" => {
                let view = client.chats.snapshot();
                let Some(summary) = arg
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| view.conversations.get(n.wrapping_sub(1)))
                else {
                    println!("no chat {}", arg);
                    continue;
                };
                if let Some(old) = printer.take() {
                    old.close().await;
                }
                println!("-- {} --", summary.other_user.name());
                let reconciler = client.conversation.open(summary.chat_id).await;
                printer = Some(follow(&reconciler, session.user_id));
            }
            "/search" => match client.profiles.search(arg).await {
                Ok(found) if found.is_empty() => println!("nobody found"),
                Ok(found) => {
                    for profile in found {
                        println!("{}  @{}  {}", profile.user_id, profile.username, profile.name());
                    }
                }
                Err(e) => println!("search failed: {}", e),
            },
            "/start" => {
                let Ok(other) = arg.parse::<Uuid>() else {
                    println!("not a user id: {}", arg);
                    continue;
                };
                match client.starter.start_chat(other).await {
                    Ok(chat_id) => {
                        if let Some(old) = printer.take() {
                            old.close().await;
                        }
                        let reconciler = client.conversation.open(chat_id).await;
                        printer = Some(follow(&reconciler, session.user_id));
                    }
                    Err(e) => println!("could not create chat: {}", e),
                }
            }
            "/block" => {
                let Ok(other) = arg.parse::<Uuid>() else {
                    println!("not a user id: {}", arg);
                    continue;
                };
                match client.blocks.toggle(other).await {
                    Ok(true) => println!("blocked"),
                    Ok(false) => println!("unblocked"),
                    Err(e) => println!("could not change block: {}", e),
                }
            }
            "/theme" => {
                let theme = match arg {
                    "dark" => Theme::Dark,
                    "light" => Theme::Light,
                    "auto" => Theme::Auto,
                    _ => {
                        println!("themes: dark, light, auto");
                        continue;
                    }
                };
                let config = AppearanceConfig {
                    theme,
                    ..AppearanceConfig::default()
                };
                appearance::apply(&config, &mut style, true);
                println!("light mode: {}", style.is_light());
            }
            _ => {
                let Some(reconciler) = client.conversation.current() else {
                    println!("open a chat first (/open N)");
                    continue;
                };
                if let Err(e) = reconciler.send(line).await {
                    println!("not sent: {}", e);
                }
            }
        }
    }

    if let Some(printer) = printer {
        printer.close().await;
    }
    client.conversation.close().await;
    chat_list_live.close().await;
    match auth.sign_out(&session).await {
        Ok(()) | Err(ClientError::Gateway(GatewayError::NotFound)) => {}
        Err(e) => warn!("Sign out failed: {}", e),
    }
    Ok(())
}

async fn sign_in_or_up(
    auth: &AuthService<LocalBackend>,
    email: &str,
    password: &str,
) -> anyhow::Result<Session> {
    match auth.sign_in(email, password).await {
        Ok(session) => Ok(session),
        Err(ClientError::Gateway(GatewayError::Unauthorized)) => {
            let username: String = email
                .split('@')
                .next()
                .unwrap_or_default()
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            info!("No account for {}, signing up as {}", email, username);
            Ok(auth.sign_up(email, password, &username, "").await?)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_chats(view: &ChatListView) {
    if view.conversations.is_empty() {
        println!("no chats yet, try /search");
        return;
    }
    for (i, summary) in view.conversations.iter().enumerate() {
        let preview = summary
            .last_message
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let unread = match summary.unread_count {
            0 => String::new(),
            n => format!(" ({})", n),
        };
        let pin = if summary.membership.is_pinned { "*" } else { " " };
        println!("{:>2}{} {}{}  {}", i + 1, pin, summary.other_user.name(), unread, preview);
    }
}

/// Print each message of the open chat once, as it appears.
fn follow(reconciler: &MessageStreamReconciler<LocalBackend>, me: Uuid) -> LiveHandle {
    let mut rx = reconciler.watch();
    LiveHandle::spawn(format!("printer for {}", reconciler.chat_id()), async move {
        let mut shown: HashSet<Uuid> = HashSet::new();
        loop {
            {
                let thread = rx.borrow_and_update();
                for view in &thread.messages {
                    if !shown.insert(view.id()) {
                        continue;
                    }
                    let who = if view.message.sender_id == me {
                        "you".to_string()
                    } else {
                        view.sender_profile
                            .as_ref()
                            .map(|p| p.name().to_string())
                            .unwrap_or_else(|| "?".to_string())
                    };
                    println!("[{}] {}: {}", view.message.created_at.format("%H:%M"), who, view.message.content);
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
