//! Line-mode REPL driving the terminal protocol over stdin/stdout.
//!
//! Each stdin line is sent as `send-line`, Ctrl-C as `send-kill-signal`;
//! shell messages are printed as they arrive.

use anyhow::Context;
use async_channel::Receiver;
use clap::Parser;
use shell_runtime::{
    JsonFileStore, MemoryStore, Sessions, ShellConfig, ShellToUi, Store, TtyShell, UiToShell,
};
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "shell-repl", about = "Interactive shell runtime")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session key (one per terminal)
    #[arg(long, default_value = "tty")]
    session: String,

    /// JSON file for history and variables; in-memory when omitted
    #[arg(long)]
    store: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            ShellConfig::from_toml(&text)
        }
        None => ShellConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, repl(args, config))
}

async fn repl(args: Args, config: ShellConfig) -> anyhow::Result<()> {
    let store: Rc<dyn Store> = match args.store {
        Some(path) => Rc::new(JsonFileStore::open(path)),
        None => Rc::new(MemoryStore::new()),
    };
    let sessions = Sessions::new(config, store);
    let (tx, rx) = async_channel::unbounded();
    let session = sessions.attach(&args.session, tx);
    tracing::info!(session = %session.key, "attached");

    let printer = tokio::task::spawn_local(print_messages(rx));
    let shell = TtyShell::new(session);
    shell.prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(text) => shell.handle(UiToShell::SendLine { text }),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.context("listening for Ctrl-C")?;
                shell.handle(UiToShell::SendKillSignal);
            }
        }
    }

    drop(shell);
    sessions.detach(&args.session);
    printer.abort();
    Ok(())
}

async fn print_messages(rx: Receiver<ShellToUi>) {
    let mut stdout = std::io::stdout();
    while let Ok(msg) = rx.recv().await {
        match msg {
            ShellToUi::SetPrompt { text } => {
                print!("{}", text);
            }
            ShellToUi::Line { text } | ShellToUi::Info { msg: text } => println!("{}", text),
            ShellToUi::Error { msg } => eprintln!("{}", msg),
            ShellToUi::Clear => print!("\x1b[2J\x1b[H"),
            ShellToUi::LineReceivedAck | ShellToUi::HistoryLine { .. } => {}
        }
        let _ = stdout.flush();
    }
}
