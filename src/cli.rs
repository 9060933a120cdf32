use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{RefreshMode, RefresherConfig, ReplyAck};
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "live-view-refresher")]
#[command(version)]
#[command(about = "Headless live view of a chat/session monitoring dashboard")]
pub struct Args {
    /// TOML config file; flags below override it
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Dashboard origin, e.g. http://127.0.0.1:8000
    #[arg(long)]
    pub base_url: Option<String>,

    /// Page to watch, relative to the base URL
    #[arg(long)]
    pub page: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// How reply success is detected
    #[arg(long, value_enum)]
    pub reply_ack: Option<ReplyAck>,

    /// Allow blank replies through to the server
    #[arg(long)]
    pub allow_empty: bool,

    /// Cookie to seed the jar with, e.g. "sessionid=abc" (repeatable)
    #[arg(long = "cookie")]
    pub cookies: Vec<String>,

    /// Log at debug level
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Poll the page and print new messages; stdin lines are sent as replies
    Watch {
        /// Session page polling or monitor-section refresh
        #[arg(long, value_enum, default_value = "session")]
        mode: RefreshMode,
    },
    /// Send one reply and exit
    Reply {
        /// Message body
        message: String,
    },
    /// Click the bot/human mode toggle and exit
    Toggle,
    /// Print the session id, last-seen id and server status
    Status,
}

impl Args {
    /// Load the config file (if any) and apply flag overrides.
    pub fn resolve_config(&self) -> Result<RefresherConfig> {
        let mut cfg = match &self.config {
            Some(path) => RefresherConfig::load(path)?,
            None => RefresherConfig::default(),
        };
        if let Some(base) = &self.base_url {
            cfg.base_url = base.clone();
        }
        if let Some(page) = &self.page {
            cfg.page_path = page.clone();
        }
        if let Some(ms) = self.interval_ms {
            cfg.poll_interval_ms = ms;
        }
        if let Some(ack) = self.reply_ack {
            cfg.reply_ack = ack;
        }
        if self.allow_empty {
            cfg.require_message = false;
        }
        if let Command::Watch { mode } = &self.command {
            cfg.mode = *mode;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Split a watch-mode input line into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Toggle,
    Quit,
    Reply(String),
    Blank,
}

pub fn parse_input_line(line: &str) -> InputLine {
    match line.trim() {
        "" => InputLine::Blank,
        "/toggle" => InputLine::Toggle,
        "/quit" | "/exit" => InputLine::Quit,
        _ => InputLine::Reply(line.to_string()),
    }
}
