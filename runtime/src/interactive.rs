//! Interactive terminal driver.
//!
//! Sits between a line-oriented terminal UI and a [`Session`]. Lines are
//! buffered until they parse as a complete command, then run in the
//! foreground while the UI waits for the next prompt. A line that arrives
//! while a builtin is waiting on `read` is handed to that reader instead.

use crate::shell::executor::run_foreground;
use crate::shell::parser;
use crate::shell::reconstruct::single_line;
use crate::shell::session::LEADER_PID;
use crate::shell::{ParseError, Session, Signal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Messages from the terminal UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", rename_all = "kebab-case")]
pub enum UiToShell {
    RequestHistoryLine { index: usize },
    SendLine { text: String },
    SendKillSignal,
}

/// Messages to the terminal UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", rename_all = "kebab-case")]
pub enum ShellToUi {
    SetPrompt {
        text: String,
    },
    Info {
        msg: String,
    },
    Error {
        msg: String,
    },
    Clear,
    LineReceivedAck,
    HistoryLine {
        text: String,
        #[serde(rename = "nextIndex")]
        next_index: usize,
    },
    /// One line of command output.
    Line {
        text: String,
    },
}

/// Bounded command history, oldest first.
#[derive(Debug, Clone, Default)]
pub struct History {
    lines: Vec<String>,
    max: usize,
}

impl History {
    pub fn new(max: usize) -> Self {
        Self {
            lines: Vec::new(),
            max,
        }
    }

    /// Record `line`. Blank lines and an immediate repeat are skipped; past
    /// the cap the oldest entries are dropped.
    pub fn push(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || self.lines.last().map(String::as_str) == Some(line) {
            return false;
        }
        self.lines.push(line.to_string());
        if self.lines.len() > self.max {
            let excess = self.lines.len() - self.max;
            self.lines.drain(0..excess);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Entry `index` steps back from the newest (0 is the newest).
    pub fn get(&self, index: usize) -> Option<&str> {
        let pos = self.lines.len().checked_sub(index + 1)?;
        self.lines.get(pos).map(String::as_str)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.lines.clone())
    }
}

/// Terminal driver for one session.
pub struct TtyShell {
    session: Rc<Session>,
    buffer: RefCell<Vec<String>>,
    running: Rc<Cell<bool>>,
}

impl TtyShell {
    pub fn new(session: Rc<Session>) -> Self {
        Self {
            session,
            buffer: RefCell::new(Vec::new()),
            running: Rc::new(Cell::new(false)),
        }
    }

    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }

    /// A foreground line is executing.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn prompt(&self) {
        send_prompt(&self.session);
    }

    /// React to one UI message. Execution is spawned on the current
    /// `LocalSet`; this never blocks.
    pub fn handle(&self, msg: UiToShell) {
        match msg {
            UiToShell::SendLine { text } => self.on_line(text),
            UiToShell::SendKillSignal => self.on_kill(),
            UiToShell::RequestHistoryLine { index } => {
                let reply = match self.session.history().get(index) {
                    Some(line) => ShellToUi::HistoryLine {
                        text: line.to_string(),
                        next_index: index + 1,
                    },
                    None => ShellToUi::HistoryLine {
                        text: String::new(),
                        next_index: index,
                    },
                };
                self.session.terminal().send(reply);
            }
        }
    }

    fn on_line(&self, text: String) {
        let terminal = self.session.terminal();
        terminal.send(ShellToUi::LineReceivedAck);

        if terminal.has_pending_read() {
            terminal.resolve_read(text);
            return;
        }
        if self.running.get() {
            tracing::debug!(line = %text, "dropping input while a command runs");
            return;
        }

        self.buffer.borrow_mut().push(text);
        let source = self.buffer.borrow().join("\n");
        match parser::parse(&source) {
            Err(ParseError::Incomplete) => {
                terminal.send(ShellToUi::SetPrompt {
                    text: self.session.config.continuation_prompt.clone(),
                });
            }
            Err(err) => {
                tracing::debug!(error = %err, "rejected input");
                self.buffer.borrow_mut().clear();
                terminal.error(err.to_string());
                self.prompt();
            }
            Ok(tree) => {
                self.buffer.borrow_mut().clear();
                if tree.is_empty() {
                    self.prompt();
                    return;
                }
                self.session.push_history(&single_line(&tree, tree.root()));

                self.running.set(true);
                let done = ForegroundDone {
                    session: self.session.clone(),
                    running: self.running.clone(),
                };
                tokio::task::spawn_local(async move {
                    let code = run_foreground(&done.session, Rc::new(tree)).await;
                    tracing::debug!(code, "foreground line finished");
                    drop(done);
                });
            }
        }
    }

    fn on_kill(&self) {
        self.buffer.borrow_mut().clear();
        self.session.terminal().reject_reads();
        if self.running.get() {
            if let Err(e) = self.session.signal(LEADER_PID, Signal::Int, true) {
                tracing::warn!(error = %e, "could not interrupt foreground");
            }
        } else {
            self.prompt();
        }
    }
}

/// Marks the foreground idle and re-prompts when its task ends, including
/// by a panic.
struct ForegroundDone {
    session: Rc<Session>,
    running: Rc<Cell<bool>>,
}

impl Drop for ForegroundDone {
    fn drop(&mut self) {
        self.running.set(false);
        send_prompt(&self.session);
    }
}

fn send_prompt(session: &Session) {
    session.terminal().send(ShellToUi::SetPrompt {
        text: session.config.prompt.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::store::MemoryStore;
    use async_channel::Receiver;
    use std::time::Duration;
    use tokio::task::LocalSet;

    fn shell() -> (TtyShell, Receiver<ShellToUi>) {
        let (tx, rx) = async_channel::unbounded();
        let session = Session::new("tty", ShellConfig::default(), Rc::new(MemoryStore::new()), tx);
        (TtyShell::new(session), rx)
    }

    fn drain(rx: &Receiver<ShellToUi>) -> Vec<ShellToUi> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn line(text: &str) -> UiToShell {
        UiToShell::SendLine { text: text.into() }
    }

    fn prompt() -> ShellToUi {
        ShellToUi::SetPrompt { text: "$ ".into() }
    }

    #[test]
    fn test_history_dedup_and_cap() {
        let mut history = History::new(3);
        assert!(history.push("a"));
        assert!(!history.push("a"));
        assert!(!history.push("   "));
        history.push("b");
        history.push("c");
        history.push("d");
        assert_eq!(history.len(), 3);
        assert_eq!(history.lines().collect::<Vec<_>>(), vec!["b", "c", "d"]);
        assert_eq!(history.get(0), Some("d"));
        assert_eq!(history.get(2), Some("b"));
        assert_eq!(history.get(3), None);
        // not consecutive, so kept
        history.push("c");
        assert_eq!(history.get(0), Some("c"));
    }

    #[test]
    fn test_protocol_wire_format() {
        let msg: UiToShell = serde_json::from_str(r#"{"key":"send-line","text":"ls"}"#).unwrap();
        assert_eq!(msg, line("ls"));
        let reply = ShellToUi::HistoryLine {
            text: "ls".into(),
            next_index: 1,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"key": "history-line", "text": "ls", "nextIndex": 1})
        );
        assert_eq!(
            serde_json::to_value(ShellToUi::LineReceivedAck).unwrap(),
            serde_json::json!({"key": "line-received-ack"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_line_input_and_syntax_errors() {
        LocalSet::new()
            .run_until(async {
                let (shell, rx) = shell();
                shell.handle(line("if true; then"));
                assert_eq!(
                    drain(&rx),
                    vec![
                        ShellToUi::LineReceivedAck,
                        ShellToUi::SetPrompt { text: "> ".into() }
                    ]
                );

                shell.handle(line("echo )"));
                let msgs = drain(&rx);
                assert!(matches!(msgs[1], ShellToUi::Error { .. }), "{:?}", msgs);
                assert_eq!(msgs.last(), Some(&prompt()));
                assert!(shell.buffer.borrow().is_empty());
                assert!(shell.session().history().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_runs_and_reprompts() {
        LocalSet::new()
            .run_until(async {
                let (shell, rx) = shell();
                shell.handle(line("echo hi"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                shell.handle(line("echo hi"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert!(!shell.is_running());
                let msgs = drain(&rx);
                assert!(msgs.contains(&ShellToUi::Line { text: "hi".into() }));
                assert_eq!(msgs.last(), Some(&prompt()));
                assert_eq!(shell.session().history().len(), 1);

                shell.handle(UiToShell::RequestHistoryLine { index: 0 });
                assert_eq!(
                    drain(&rx),
                    vec![ShellToUi::HistoryLine {
                        text: "echo hi".into(),
                        next_index: 1
                    }]
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_signal_resets_buffer() {
        LocalSet::new()
            .run_until(async {
                let (shell, rx) = shell();
                shell.handle(line("while true; do"));
                shell.handle(UiToShell::SendKillSignal);
                assert!(shell.buffer.borrow().is_empty());
                assert_eq!(drain(&rx).last(), Some(&prompt()));

                // the next line parses on its own
                shell.handle(line("true"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(drain(&rx).last(), Some(&prompt()));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_signal_interrupts_foreground() {
        LocalSet::new()
            .run_until(async {
                let (shell, rx) = shell();
                shell.handle(line("sleep 100"));
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert!(shell.is_running());
                drain(&rx);

                shell.handle(UiToShell::SendKillSignal);
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert!(!shell.is_running());
                assert_eq!(drain(&rx), vec![prompt()]);
                assert_eq!(shell.session().last_exit(false), 130);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_read() {
        LocalSet::new()
            .run_until(async {
                let (shell, rx) = shell();
                shell.handle(line("read answer; echo got $answer"));
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert!(shell.session().terminal().has_pending_read());

                shell.handle(line("42"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                let msgs = drain(&rx);
                assert!(msgs.contains(&ShellToUi::Line { text: "got 42".into() }), "{:?}", msgs);
                // the answer was not parsed as a command
                assert_eq!(shell.session().history().len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_signal_rejects_pending_read() {
        LocalSet::new()
            .run_until(async {
                let (shell, rx) = shell();
                shell.handle(line("read answer"));
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert!(shell.session().terminal().has_pending_read());

                shell.handle(UiToShell::SendKillSignal);
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert!(!shell.session().terminal().has_pending_read());
                assert!(!shell.is_running());
                assert_eq!(drain(&rx).last(), Some(&prompt()));
            })
            .await;
    }
}
