use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::config::ClientConfig;
use crate::engine::{Command, Target};
use crate::timeline::MessageId;

#[derive(Parser, Debug)]
#[command(name = "chatline")]
#[command(version)]
#[command(about = "Terminal client for a realtime group chat")]
pub struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override api.base_url
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Override live.url
    #[arg(long, global = true)]
    pub live_url: Option<String>,

    /// Override state_dir (where the session token is kept)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Sign in and store the session token
    SignIn {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Create an account, then sign in
    SignUp {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Forget the stored session
    SignOut,
    /// Change the signed-in user's password
    ChangePassword {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
    /// Show who is signed in and until when
    Whoami,
    /// Join the chat room
    Chat,
    /// Print shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Apply command-line overrides on top of file configuration.
    pub fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.base_url {
            config.api.base_url = url.clone();
        }
        if let Some(url) = &self.live_url {
            config.live.url = url.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
    }
}

pub const CHAT_HELP: &str = "/edit ID TEXT   /delete ID   /who   /quit   (ID may be #N for the Nth line)";

/// Turn one line of chat input into a command. Lines that do not start with
/// `/` are sent as-is.
pub fn parse_chat_line(line: &str) -> Result<Command, String> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };
    let mut parts = rest.splitn(3, char::is_whitespace);
    let verb = parts.next().unwrap_or_default();
    match verb {
        "quit" | "q" => Ok(Command::Quit),
        "who" => Ok(Command::Who),
        "delete" | "del" => {
            let target = parts.next().filter(|s| !s.is_empty()).ok_or("usage: /delete ID")?;
            Ok(Command::Delete(parse_target(target)?))
        }
        "edit" => {
            let target = parts.next().filter(|s| !s.is_empty()).ok_or("usage: /edit ID TEXT")?;
            let text = parts.next().map(str::trim).filter(|s| !s.is_empty()).ok_or("usage: /edit ID TEXT")?;
            Ok(Command::Edit {
                target: parse_target(target)?,
                text: text.to_string(),
            })
        }
        other => Err(format!("unknown command /{other}; {CHAT_HELP}")),
    }
}

fn parse_target(raw: &str) -> Result<Target, String> {
    match raw.strip_prefix('#') {
        Some(n) => n
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(Target::Entry)
            .ok_or_else(|| format!("bad line number '{raw}'")),
        None => Ok(Target::Id(MessageId::new(raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_sign_in_parses() {
        let cli = Cli::parse_from(["chatline", "sign-in", "-u", "alice", "-p", "pw"]);
        assert_eq!(
            cli.command,
            Commands::SignIn {
                username: "alice".into(),
                password: "pw".into()
            }
        );
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let cli = Cli::parse_from(["chatline", "chat", "--base-url", "http://x/api/"]);
        let mut cfg = ClientConfig::default();
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg.api.base_url, "http://x/api/");
        assert_eq!(cfg.live.url, "ws://localhost:8000/api/ws");
    }

    #[test]
    fn test_change_password_flags() {
        let cli = Cli::parse_from(["chatline", "change-password", "--old", "a", "--new", "b"]);
        assert!(matches!(cli.command, Commands::ChangePassword { .. }));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["chatline"]).is_err());
    }

    #[test]
    fn test_completions_shell() {
        let cli = Cli::parse_from(["chatline", "completions", "zsh"]);
        assert_eq!(cli.command, Commands::Completions { shell: Shell::Zsh });
    }

    #[rstest]
    #[case("hello there", Command::Send("hello there".into()))]
    #[case("", Command::Send(String::new()))]
    #[case("/quit", Command::Quit)]
    #[case("/who", Command::Who)]
    #[case("/delete 42", Command::Delete(Target::Id(MessageId::from(42))))]
    #[case("/delete #3", Command::Delete(Target::Entry(3)))]
    #[case(
        "/edit 7 fixed typo",
        Command::Edit { target: Target::Id(MessageId::from(7)), text: "fixed typo".into() }
    )]
    fn test_parse_chat_line(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(parse_chat_line(line).unwrap(), expected);
    }

    #[rstest]
    #[case("/delete")]
    #[case("/edit 7")]
    #[case("/delete #0")]
    #[case("/delete #x")]
    #[case("/dance")]
    fn test_parse_chat_line_rejects(#[case] line: &str) {
        assert!(parse_chat_line(line).is_err());
    }
}
