use std::rc::Rc;

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use live_view_refresher::cli::{parse_input_line, Args, Command, InputLine};
use live_view_refresher::{init_tracing, ChatMessage, LiveViewRefresher, RefreshError, RefreshEvent};

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn role_of(message: &ChatMessage) -> &str {
    message
        .classes
        .iter()
        .map(String::as_str)
        .find(|c| *c != "message")
        .unwrap_or("")
}

fn print_message(message: &ChatMessage) {
    let role = role_of(message);
    let tag = format!("{:>10}", role);
    let tag = match role {
        "user" => tag.cyan(),
        "bot" | "assistant" => tag.green(),
        "staff" | "human" | "operator" => tag.yellow(),
        _ => tag.dimmed(),
    };
    println!("{} {} {}", tag, "│".dimmed(), message.text);
}

fn render_event(event: &RefreshEvent) {
    match event {
        RefreshEvent::Patched { new_messages, .. } => {
            for m in new_messages {
                print_message(m);
            }
        }
        RefreshEvent::SectionReplaced => {
            println!("{}", "· monitor section refreshed".dimmed());
        }
        RefreshEvent::Reloaded { user_id } => {
            let who = user_id.as_deref().unwrap_or("-");
            println!("{} {}", "· page reloaded, session".dimmed(), who.bold());
        }
        RefreshEvent::ReplySent => println!("{}", "· reply sent".green()),
        RefreshEvent::Toggled { human, status } => {
            let mode = if *human { "human" } else { "bot" };
            println!("{} {} (HTTP {})", "· mode switched to".yellow(), mode.bold(), status);
        }
    }
}

fn report(what: &str, result: Result<(), RefreshError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_silent() => {}
        Err(e) => eprintln!("{} {}: {}", "error".red().bold(), what, e),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn print_status(refresher: &LiveViewRefresher) -> Result<(), RefreshError> {
    let (user_id, last_seen, count) = {
        let view = refresher.view();
        (view.user_id().map(str::to_string), view.last_seen(), view.message_count())
    };
    println!("{:<12} {}", "page".bold(), refresher.client().page_url());
    println!("{:<12} {}", "session".bold(), user_id.as_deref().unwrap_or("-"));
    println!("{:<12} {}", "last seen".bold(), last_seen);
    println!("{:<12} {}", "messages".bold(), count);
    if let Some(user_id) = user_id {
        let status = refresher.client().fetch_status(&user_id).await?;
        let marker = if status.latest_id > last_seen {
            "new history available".yellow()
        } else {
            "up to date".green()
        };
        println!("{:<12} {} ({})", "server".bold(), status.latest_id, marker);
    }
    Ok(())
}

async fn watch(
    refresher: Rc<LiveViewRefresher>,
    mut events: mpsc::UnboundedReceiver<RefreshEvent>,
) {
    for m in refresher.view().messages() {
        print_message(&m);
    }

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let poller = tokio::task::spawn_local(Rc::clone(&refresher).run());
            let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
            let mut stdin_open = true;

            loop {
                tokio::select! {
                    Some(event) = events.recv() => render_event(&event),
                    line = lines.next(), if stdin_open => match line {
                        Some(Ok(line)) => match parse_input_line(&line) {
                            InputLine::Quit => break,
                            InputLine::Blank => {}
                            InputLine::Toggle => {
                                let this = Rc::clone(&refresher);
                                tokio::task::spawn_local(async move {
                                    report("toggle", this.toggle().await.map(|_| ()));
                                });
                            }
                            InputLine::Reply(text) => {
                                let this = Rc::clone(&refresher);
                                tokio::task::spawn_local(async move {
                                    report("reply", this.reply(&text).await);
                                });
                            }
                        },
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "stdin read failed, input disabled");
                            stdin_open = false;
                        }
                        None => stdin_open = false,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            poller.abort();
        })
        .await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.resolve_config()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let refresher = Rc::new(LiveViewRefresher::builder(config).events(tx).build()?);
    for cookie in &args.cookies {
        refresher.client().add_cookie(cookie);
    }
    refresher.load().await?;

    match args.command {
        Command::Status => print_status(&refresher).await?,
        Command::Reply { message } => {
            refresher.reply(&message).await?;
            println!("{}", "reply sent".green());
        }
        Command::Toggle => {
            let (human, status) = refresher.toggle().await?;
            let mode = if human { "human" } else { "bot" };
            println!("mode switched to {} (HTTP {})", mode.bold(), status.as_u16());
        }
        Command::Watch { .. } => watch(refresher, rx).await,
    }

    Ok(())
}
