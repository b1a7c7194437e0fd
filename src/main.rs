use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};

use servicehub_client::api::{Credentials, FederatedIdentity, PaymentOutcome, ProfileFields};
use servicehub_client::common::{ChannelEvent, ChatMessage, ConnectionState, Delivery};
use servicehub_client::config::{self, AppConfig};
use servicehub_client::network::{ReqwestTransport, WebSocketConnector};
use servicehub_client::session::SessionEvent;
use servicehub_client::storage::{self, SessionStore};
use servicehub_client::{
    ApiClient, ChannelOptions, ChatChannel, Result, SessionContext, UnreadPoller,
};

#[derive(Parser)]
#[command(
    name = "servicehub",
    version,
    about = "Command-line client for the services marketplace"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a one-time sign-in code to a phone number
    SendOtp {
        #[arg(long)]
        phone: String,
    },
    /// Sign in with a phone number and the code it received
    VerifyOtp {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        otp: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in with a federated identity assertion
    GoogleLogin {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        photo: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in profile
    Whoami,
    /// Join a chat room; lines typed on stdin are sent
    Chat {
        #[arg(long)]
        room: String,
    },
    /// Show unread notification and chat counters
    Unread {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Settle the payment a gateway return URL describes
    PayResult {
        #[arg(long)]
        url: String,
    },
    /// Write the effective configuration to the config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    if matches!(cli.command, Command::InitConfig) {
        config::save_config(&cli.config, &app_config)?;
        println!("Configuration written to {}", cli.config);
        return Ok(());
    }

    let api = build_client(&app_config)?;
    watch_session(api.session());

    match cli.command {
        Command::SendOtp { phone } => {
            let challenge = api
                .auth()
                .send_otp(&phone, app_config.otp_resend_cooldown())
                .await?;
            println!(
                "Code sent to {}; a new one can be requested in {}s",
                challenge.phone(),
                challenge.resend_in().as_secs()
            );
        }
        Command::VerifyOtp {
            phone,
            otp,
            first_name,
            last_name,
            email,
        } => {
            let profile = ProfileFields {
                first_name,
                last_name,
                email,
            };
            let user = api.auth().verify_otp(&phone, &otp, &profile).await?;
            print_signed_in(user.map(|u| u.display_name()));
        }
        Command::Login { email, password } => {
            let user = api.auth().login(&Credentials { email, password }).await?;
            print_signed_in(user.map(|u| u.display_name()));
        }
        Command::GoogleLogin {
            uid,
            email,
            name,
            photo,
        } => {
            let identity = FederatedIdentity {
                uid,
                email,
                display_name: name,
                photo_url: photo,
            };
            let user = api.auth().google_login(&identity).await?;
            print_signed_in(user.map(|u| u.display_name()));
        }
        Command::Logout => {
            api.auth().logout().await?;
            println!("Signed out");
        }
        Command::Whoami => {
            let user = api.users().profile().await?;
            println!("{} ({:?}, id {})", user.display_name(), user.role, user.id);
        }
        Command::Chat { room } => run_chat(&app_config, api, room).await?,
        Command::Unread { watch } => run_unread(&app_config, api, watch).await?,
        Command::PayResult { url } => {
            let outcome = PaymentOutcome::from_return_url(&url)?;
            let result = api.payments().settle(&outcome).await?;
            println!("{result:?}");
        }
        Command::InitConfig => {}
    }

    Ok(())
}

fn build_client(app_config: &AppConfig) -> Result<ApiClient> {
    storage::ensure_data_dir(&app_config.data_dir)?;
    let store = SessionStore::with_path(app_config.session_db_path())?;
    let session = SessionContext::open(store, app_config.login_route.clone())?;
    let transport = ReqwestTransport::new(
        app_config.api_base_url.clone(),
        app_config.request_timeout(),
    )?;
    Ok(ApiClient::new(Arc::new(transport), session))
}

fn watch_session(session: &SessionContext) {
    let mut events = session.events();
    tokio::spawn(async move {
        while let Ok(SessionEvent::LoggedOut { reason, redirect_to }) = events.recv().await {
            eprintln!("Signed out ({reason:?}); sign in again via {redirect_to}");
        }
    });
}

fn print_signed_in(name: Option<String>) {
    match name {
        Some(name) => println!("Signed in as {name}"),
        None => println!("Signed in"),
    }
}

async fn run_chat(app_config: &AppConfig, api: ApiClient, room: String) -> Result<()> {
    let connector = Arc::new(WebSocketConnector::new(app_config.ws_base_url.clone()));
    let mut channel =
        ChatChannel::open(room, api, connector, ChannelOptions::from(app_config)).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let sent = channel.send_message(&line).await?;
                if sent.delivery == Delivery::Failed {
                    eprintln!("! not delivered: {}", sent.body);
                }
            }
            event = channel.next_event() => {
                let Some(event) = event else { break };
                print_event(&event);
            }
        }
    }

    channel.close().await;
    Ok(())
}

fn print_event(event: &ChannelEvent) {
    match event {
        ChannelEvent::History(messages) => messages.iter().for_each(print_message),
        ChannelEvent::MessageReceived(message) => print_message(message),
        ChannelEvent::Typing { user_id, is_typing } => {
            if *is_typing {
                println!("... {user_id} is typing");
            }
        }
        ChannelEvent::Notification(notification) => println!(
            "* {}",
            notification
                .title
                .as_deref()
                .or(notification.message.as_deref())
                .unwrap_or("notification")
        ),
        ChannelEvent::StateChanged(ConnectionState::Connected) => eprintln!("-- connected"),
        ChannelEvent::StateChanged(ConnectionState::Disconnected) => eprintln!("-- disconnected"),
        ChannelEvent::StateChanged(ConnectionState::Connecting) => {}
        ChannelEvent::ReconnectScheduled { attempt, delay } => {
            eprintln!("-- reconnecting in {}s (attempt {attempt})", delay.as_secs())
        }
    }
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        message.sender,
        message.body
    );
}

async fn run_unread(app_config: &AppConfig, api: ApiClient, watch: bool) -> Result<()> {
    if !watch {
        let notifications = api.notifications().unread_count().await?;
        let chat = api.chat().unread_count().await?;
        println!("notifications: {notifications}, chat: {chat}");
        return Ok(());
    }

    let poller = UnreadPoller::spawn(api, app_config.unread_poll_interval());
    let mut updates = poller.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let counts = *updates.borrow_and_update();
                println!("notifications: {}, chat: {}", counts.notifications, counts.chat);
            }
        }
    }
    poller.stop().await;
    Ok(())
}
