//! Logical processes and signals.
//!
//! A process is a cooperative task inside one session. It never blocks the
//! thread; instead every suspension point is wrapped in [`Process::guard`],
//! which parks while the process is stopped and fails with
//! [`ShellError::Kill`] as soon as the process is killed.

use super::error::ShellError;
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use tokio::sync::Notify;

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Int,
    Kill,
    /// Written to a pipe nobody reads any more.
    Pipe,
    Term,
    Stop,
    Cont,
}

impl Signal {
    pub fn number(self) -> i32 {
        match self {
            Signal::Int => 2,
            Signal::Kill => 9,
            Signal::Pipe => 13,
            Signal::Term => 15,
            Signal::Cont => 18,
            Signal::Stop => 19,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Int => "INT",
            Signal::Kill => "KILL",
            Signal::Pipe => "PIPE",
            Signal::Term => "TERM",
            Signal::Cont => "CONT",
            Signal::Stop => "STOP",
        }
    }

    /// Parse `TERM`, `SIGTERM`, `term` or `15`.
    pub fn parse(text: &str) -> Option<Signal> {
        let upper = text.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        let all = [
            Signal::Int,
            Signal::Kill,
            Signal::Pipe,
            Signal::Term,
            Signal::Stop,
            Signal::Cont,
        ];
        if let Ok(n) = name.parse::<i32>() {
            return all.into_iter().find(|s| s.number() == n);
        }
        all.into_iter().find(|s| s.name() == name)
    }
}

/// Unwinding payload of a kill.
///
/// `depth` counts dynamic scopes (function calls) the signal should pass
/// through before being absorbed; zero means it unwinds to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSignal {
    pub signal: Signal,
    pub pid: Pid,
    pub session: String,
    pub exit_code: Option<i32>,
    pub depth: u32,
}

impl KillSignal {
    pub fn new(signal: Signal, pid: Pid, session: impl Into<String>) -> Self {
        Self {
            signal,
            pid,
            session: session.into(),
            exit_code: None,
            depth: 0,
        }
    }

    /// Signal raised by `return` inside a function.
    pub fn function_return(pid: Pid, session: impl Into<String>, code: i32) -> Self {
        Self {
            exit_code: Some(code),
            depth: 1,
            ..Self::new(Signal::Term, pid, session)
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(128 + self.signal.number())
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} killed (SIG{})", self.pid, self.signal.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Suspended,
    Killed,
}

/// Return value of a suspend/resume hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Drop the hook after this run.
    Done,
    /// Keep the hook registered for the next transition.
    Keep,
}

type Hook = Box<dyn FnMut() -> HookOutcome>;
type Cleanup = Box<dyn FnOnce(&KillSignal)>;

pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    pgid: Cell<Pid>,
    pub session: String,
    /// Single-line source shown by `ps`.
    pub source: String,
    /// Runs under a background job; `$?` reads the background exit code.
    pub background: bool,
    /// Root of a background job; group signals to its parent skip it.
    detached: Cell<bool>,
    status: Cell<ProcessStatus>,
    kill: RefCell<Option<KillSignal>>,
    cleanups: RefCell<Vec<(u64, Cleanup)>>,
    next_cleanup: Cell<u64>,
    suspend_hooks: RefCell<Vec<Hook>>,
    resume_hooks: RefCell<Vec<Hook>>,
    positionals: RefCell<Vec<String>>,
    locals: RefCell<Map<String, Value>>,
    inherited: RefCell<Map<String, Value>>,
    wake: Notify,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("ppid", &self.ppid)
            .field("pgid", &self.pgid.get())
            .field("status", &self.status.get())
            .field("source", &self.source)
            .finish()
    }
}

impl Process {
    pub fn new(
        pid: Pid,
        ppid: Pid,
        pgid: Pid,
        session: impl Into<String>,
        source: impl Into<String>,
        background: bool,
    ) -> Self {
        Self {
            pid,
            ppid,
            pgid: Cell::new(pgid),
            session: session.into(),
            source: source.into(),
            background,
            detached: Cell::new(false),
            status: Cell::new(ProcessStatus::Running),
            kill: RefCell::new(None),
            cleanups: RefCell::new(Vec::new()),
            next_cleanup: Cell::new(0),
            suspend_hooks: RefCell::new(Vec::new()),
            resume_hooks: RefCell::new(Vec::new()),
            positionals: RefCell::new(Vec::new()),
            locals: RefCell::new(Map::new()),
            inherited: RefCell::new(Map::new()),
            wake: Notify::new(),
        }
    }

    pub fn pgid(&self) -> Pid {
        self.pgid.get()
    }

    pub fn set_pgid(&self, pgid: Pid) {
        self.pgid.set(pgid);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    pub fn set_detached(&self) {
        self.detached.set(true);
    }

    pub fn status(&self) -> ProcessStatus {
        self.status.get()
    }

    pub fn is_killed(&self) -> bool {
        self.status.get() == ProcessStatus::Killed
    }

    pub fn kill_signal(&self) -> Option<KillSignal> {
        self.kill.borrow().clone()
    }

    /// Register a callback run once when the process is killed.
    pub fn add_cleanup(&self, f: impl FnOnce(&KillSignal) + 'static) -> u64 {
        let id = self.next_cleanup.get();
        self.next_cleanup.set(id + 1);
        self.cleanups.borrow_mut().push((id, Box::new(f)));
        id
    }

    pub fn remove_cleanup(&self, id: u64) {
        self.cleanups.borrow_mut().retain(|(cid, _)| *cid != id);
    }

    pub fn on_suspend(&self, hook: impl FnMut() -> HookOutcome + 'static) {
        self.suspend_hooks.borrow_mut().push(Box::new(hook));
    }

    pub fn on_resume(&self, hook: impl FnMut() -> HookOutcome + 'static) {
        self.resume_hooks.borrow_mut().push(Box::new(hook));
    }

    /// Kill the process. Returns false if it was already dead.
    pub fn kill(&self, signal: KillSignal) -> bool {
        if self.is_killed() {
            return false;
        }
        tracing::debug!(pid = self.pid, signal = signal.signal.name(), "killing process");
        self.status.set(ProcessStatus::Killed);
        *self.kill.borrow_mut() = Some(signal.clone());
        self.suspend_hooks.borrow_mut().clear();
        self.resume_hooks.borrow_mut().clear();

        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for (_, cleanup) in cleanups {
            cleanup(&signal);
        }
        self.wake.notify_waiters();
        true
    }

    pub fn suspend(&self) {
        if self.status.get() != ProcessStatus::Running {
            return;
        }
        self.status.set(ProcessStatus::Suspended);
        run_hooks(&self.suspend_hooks);
        self.wake.notify_waiters();
    }

    pub fn resume(&self) {
        if self.status.get() != ProcessStatus::Suspended {
            return;
        }
        self.status.set(ProcessStatus::Running);
        run_hooks(&self.resume_hooks);
        self.wake.notify_waiters();
    }

    /// Drive `fut` while the process is running.
    ///
    /// While suspended `fut` is not polled. Once killed the future is
    /// dropped and the kill signal is returned as an error.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, ShellError> {
        let mut fut = std::pin::pin!(fut);
        loop {
            let notified = self.wake.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            if let Some(signal) = self.kill_signal() {
                return Err(ShellError::Kill(signal));
            }
            if self.status.get() == ProcessStatus::Suspended {
                notified.await;
                continue;
            }
            tokio::select! {
                biased;
                _ = notified.as_mut() => continue,
                out = fut.as_mut() => return Ok(out),
            }
        }
    }

    /// Fail if killed, park while suspended.
    pub async fn checkpoint(&self) -> Result<(), ShellError> {
        self.guard(async {}).await
    }

    pub fn positionals(&self) -> Vec<String> {
        self.positionals.borrow().clone()
    }

    pub fn set_positionals(&self, args: Vec<String>) {
        *self.positionals.borrow_mut() = args;
    }

    pub fn local(&self, name: &str) -> Option<Value> {
        self.locals.borrow().get(name).cloned()
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.locals.borrow().contains_key(name)
    }

    pub fn set_local(&self, name: &str, value: Value) {
        self.locals.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove_local(&self, name: &str) -> Option<Value> {
        self.locals.borrow_mut().remove(name)
    }

    pub fn inherited(&self, name: &str) -> Option<Value> {
        self.inherited.borrow().get(name).cloned()
    }

    pub fn has_inherited(&self, name: &str) -> bool {
        self.inherited.borrow().contains_key(name)
    }

    pub fn set_inherited(&self, name: &str, value: Value) {
        self.inherited.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove_inherited(&self, name: &str) -> Option<Value> {
        self.inherited.borrow_mut().remove(name)
    }

    /// Shallow snapshot handed to children: inherited overlaid by locals.
    pub fn scope_snapshot(&self) -> Map<String, Value> {
        let mut snapshot = self.inherited.borrow().clone();
        for (k, v) in self.locals.borrow().iter() {
            snapshot.insert(k.clone(), v.clone());
        }
        snapshot
    }

    pub fn inherit(&self, snapshot: Map<String, Value>) {
        *self.inherited.borrow_mut() = snapshot;
    }

    pub fn local_names(&self) -> Vec<String> {
        self.locals.borrow().keys().cloned().collect()
    }
}

/// Run hooks first-registered first, keeping those that ask to be kept.
fn run_hooks(hooks: &RefCell<Vec<Hook>>) {
    let current = std::mem::take(&mut *hooks.borrow_mut());
    let mut kept = Vec::with_capacity(current.len());
    for mut hook in current {
        if hook() == HookOutcome::Keep {
            kept.push(hook);
        }
    }
    // hooks registered while running go after the kept ones
    let mut slot = hooks.borrow_mut();
    let added = std::mem::take(&mut *slot);
    kept.extend(added);
    *slot = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::{block_on, poll_once};
    use std::rc::Rc;

    fn proc() -> Process {
        Process::new(3, 0, 3, "tty", "sleep 10", false)
    }

    #[test]
    fn test_signal_parse() {
        assert_eq!(Signal::parse("STOP"), Some(Signal::Stop));
        assert_eq!(Signal::parse("sigcont"), Some(Signal::Cont));
        assert_eq!(Signal::parse("9"), Some(Signal::Kill));
        assert_eq!(Signal::parse("HUP"), None);
    }

    #[test]
    fn test_kill_runs_cleanups_once() {
        let p = proc();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        p.add_cleanup(move |_| c.set(c.get() + 1));
        let removed = count.clone();
        let id = p.add_cleanup(move |_| removed.set(removed.get() + 100));
        p.remove_cleanup(id);

        assert!(p.kill(KillSignal::new(Signal::Term, 3, "tty")));
        assert!(!p.kill(KillSignal::new(Signal::Kill, 3, "tty")));
        assert_eq!(count.get(), 1);
        assert_eq!(p.status(), ProcessStatus::Killed);
        assert_eq!(p.kill_signal().map(|s| s.signal), Some(Signal::Term));
    }

    #[test]
    fn test_status_transitions() {
        let p = proc();
        p.resume();
        assert_eq!(p.status(), ProcessStatus::Running);
        p.suspend();
        assert_eq!(p.status(), ProcessStatus::Suspended);
        p.resume();
        assert_eq!(p.status(), ProcessStatus::Running);
        p.kill(KillSignal::new(Signal::Int, 3, "tty"));
        p.suspend();
        p.resume();
        assert_eq!(p.status(), ProcessStatus::Killed);
    }

    #[test]
    fn test_hooks_kept_only_when_asked() {
        let p = proc();
        let once = Rc::new(Cell::new(0));
        let kept = Rc::new(Cell::new(0));
        let o = once.clone();
        p.on_suspend(move || {
            o.set(o.get() + 1);
            HookOutcome::Done
        });
        let k = kept.clone();
        p.on_suspend(move || {
            k.set(k.get() + 1);
            HookOutcome::Keep
        });

        p.suspend();
        p.resume();
        p.suspend();
        assert_eq!(once.get(), 1);
        assert_eq!(kept.get(), 2);
    }

    #[test]
    fn test_guard_parks_while_suspended_and_fails_on_kill() {
        let p = proc();
        block_on(async {
            assert_eq!(p.guard(async { 5 }).await.unwrap(), 5);

            p.suspend();
            let mut parked = Box::pin(p.guard(async { 1 }));
            assert!(poll_once(&mut parked).await.is_none());
            p.resume();
            assert_eq!(poll_once(&mut parked).await.map(|r| r.unwrap()), Some(1));

            let mut pending = Box::pin(p.guard(std::future::pending::<()>()));
            assert!(poll_once(&mut pending).await.is_none());
            p.kill(KillSignal::new(Signal::Int, 3, "tty"));
            match poll_once(&mut pending).await {
                Some(Err(ShellError::Kill(sig))) => assert_eq!(sig.exit_code(), 130),
                other => panic!("expected kill, got {:?}", other.map(|r| r.is_ok())),
            }
        });
    }

    #[test]
    fn test_scope_snapshot_overlays_locals() {
        let p = proc();
        p.set_inherited("a", Value::from("parent"));
        p.set_inherited("b", Value::from("parent"));
        p.set_local("b", Value::from("mine"));
        let snap = p.scope_snapshot();
        assert_eq!(snap["a"], "parent");
        assert_eq!(snap["b"], "mine");
    }
}
