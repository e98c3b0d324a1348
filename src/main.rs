use std::future::Future;
use std::io::BufRead;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use colored::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use chatline::api::{Credentials, RestClient};
use chatline::cli::{parse_chat_line, Cli, Commands, CHAT_HELP};
use chatline::config::ClientConfig;
use chatline::engine::{ChatSession, Command};
use chatline::error::{ChatError, Result};
use chatline::render::{failure_lines, Renderer};
use chatline::session::{Session, SessionStore};
use chatline::transport::{live_url, WsConnector};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they never interleave with the timeline on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "chatline=info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            for line in failure_lines(&e) {
                eprintln!("{line}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "chatline", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    debug!(?config, "effective configuration");

    let api = RestClient::new(&config.rest_config())?;
    let mut store = SessionStore::new(&config.state_dir);
    store.load();

    match cli.command {
        Commands::SignIn { username, password } => {
            let session = store.sign_in(&api, &Credentials::new(username, password)).await?;
            println!("{} {}", "signed in as".bright_green(), describe(&session));
        }
        Commands::SignUp { username, password } => {
            let session = store.sign_up(&api, &Credentials::new(username, password)).await?;
            println!("{} {}", "registered and signed in as".bright_green(), describe(&session));
        }
        Commands::SignOut => {
            store.sign_out();
            println!("{}", "signed out".bright_green());
        }
        Commands::ChangePassword { old, new } => {
            store.change_password(&api, &old, &new).await?;
            println!("{}", "password changed".bright_green());
        }
        Commands::Whoami => match store.current() {
            Some(session) => println!("{}", describe(session)),
            None => println!("{}", "not signed in".yellow()),
        },
        Commands::Chat => chat(&config, api, &store).await?,
        Commands::Completions { .. } => {}
    }
    Ok(())
}

fn describe(session: &Session) -> String {
    let name = session.username.as_deref().unwrap_or("(unknown)");
    match session.expiry.and_then(|exp| chrono::DateTime::from_timestamp(exp, 0)) {
        Some(until) => format!("{} (until {})", name.bold(), until.to_rfc3339()),
        None => name.bold().to_string(),
    }
}

async fn chat(config: &ClientConfig, api: RestClient, store: &SessionStore) -> Result<()> {
    let (Some(token), Some(username)) = (store.bearer(), store.username()) else {
        return Err(ChatError::Authentication("not signed in".into()));
    };
    api.set_token(Some(token.to_string()));

    let connector = WsConnector::new(live_url(&config.live.url, username)?, config.connect_timeout());
    let session = ChatSession::new(username, api, connector, config.calendar())
        .with_reconnect(config.reconnect_policy());

    let (tx, rx) = mpsc::channel(32);
    spawn_input_reader(tx);

    println!("{}", CHAT_HELP.dimmed());
    let renderer = Renderer::new(username);
    let shutdown = interrupted(tokio::signal::ctrl_c());
    let report = session
        .run(rx, shutdown, |event| {
            for line in renderer.render(&event) {
                println!("{line}");
            }
        })
        .await;
    info!(entries = report.timeline.len(), online = report.presence.count, "chat session ended");
    Ok(())
}

/// Resolves when `signal` fires. If the handler could not be installed it
/// never resolves, so only `/quit` or end of input ends the session.
async fn interrupted<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Read stdin on a plain thread; a blocking read must not hold up runtime
/// shutdown.
fn spawn_input_reader(tx: mpsc::Sender<Command>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_chat_line(&line) {
                Ok(command) => {
                    let quit = command == Command::Quit;
                    if tx.blocking_send(command).is_err() || quit {
                        break;
                    }
                }
                Err(msg) => eprintln!("{}", msg.yellow()),
            }
        }
    });
}
