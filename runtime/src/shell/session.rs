//! Sessions: one per attached terminal.
//!
//! A session owns the process table, the function table, the home-scope
//! variables and the device registry. Everything here is single-threaded
//! and mutated only between suspension points.

use super::ast::SyntaxTree;
use super::devices::{
    Device, FifoDevice, LogSpeaker, NullDevice, SpeechDevice, TerminalDevice, VarDevice, VarMode,
};
use super::process::{KillSignal, Pid, Process, Signal};
use crate::config::ShellConfig;
use crate::interactive::{History, ShellToUi};
use crate::store::{history_key, vars_key, Store};
use async_channel::Sender;
use serde_json::{Map, Value};
use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};

pub const LEADER_PID: Pid = 0;

/// A declared shell function.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    /// Single-line source of the whole declaration.
    pub source: String,
    pub body: Rc<SyntaxTree>,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub ppid: Pid,
    /// Join this group; a new group led by the new pid otherwise.
    pub pgid: Option<Pid>,
    pub source: String,
    pub background: bool,
    /// Start a background job: a new group its parent's signals skip.
    pub detached: bool,
    /// Defaults to the parent's positionals.
    pub positionals: Option<Vec<String>>,
}

pub struct Session {
    pub key: String,
    pub config: ShellConfig,
    store: Rc<dyn Store>,
    this: Weak<Session>,
    processes: RefCell<BTreeMap<Pid, Rc<Process>>>,
    functions: RefCell<BTreeMap<String, FunctionDef>>,
    home: RefCell<Map<String, Value>>,
    cwd: RefCell<String>,
    next_pid: Cell<Pid>,
    next_device: Cell<u64>,
    last_exit_fg: Cell<i32>,
    last_exit_bg: Cell<i32>,
    last_bg_pid: Cell<Option<Pid>>,
    devices: RefCell<HashMap<String, Rc<dyn Device>>>,
    terminal: Rc<TerminalDevice>,
    history: RefCell<History>,
}

impl Session {
    /// Create a session, rehydrating history and variables from `store`.
    pub fn new(
        key: impl Into<String>,
        config: ShellConfig,
        store: Rc<dyn Store>,
        ui: Sender<ShellToUi>,
    ) -> Rc<Session> {
        let key = key.into();

        let mut history = History::new(config.history_max);
        if let Some(Value::Array(lines)) = store.get(&history_key(&key)) {
            for line in lines.iter().filter_map(Value::as_str) {
                history.push(line);
            }
        }
        let home = match store.get(&vars_key(&key)) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        tracing::debug!(session = %key, history = history.len(), vars = home.len(), "session created");

        let terminal = Rc::new(TerminalDevice::new(ui));
        let speech = Rc::new(SpeechDevice::new(Rc::new(LogSpeaker {
            ms_per_char: config.speech_ms_per_char,
        })));

        let session = Rc::new_cyclic(|this| Session {
            key,
            config,
            store,
            this: this.clone(),
            processes: RefCell::new(BTreeMap::new()),
            functions: RefCell::new(BTreeMap::new()),
            home: RefCell::new(home),
            cwd: RefCell::new("/home".to_string()),
            next_pid: Cell::new(1),
            next_device: Cell::new(0),
            last_exit_fg: Cell::new(0),
            last_exit_bg: Cell::new(0),
            last_bg_pid: Cell::new(None),
            devices: RefCell::new(HashMap::new()),
            terminal: terminal.clone(),
            history: RefCell::new(history),
        });
        session.register_device(terminal);
        session.register_device(Rc::new(NullDevice));
        session.register_device(speech);
        session.spawn_leader("");
        session
    }

    pub fn terminal(&self) -> &Rc<TerminalDevice> {
        &self.terminal
    }

    // --- processes ---

    /// (Re)create the session leader, pid 0, for a new foreground line.
    pub fn spawn_leader(&self, source: &str) -> Rc<Process> {
        let leader = Rc::new(Process::new(
            LEADER_PID, LEADER_PID, LEADER_PID, &self.key, source, false,
        ));
        self.processes
            .borrow_mut()
            .insert(LEADER_PID, leader.clone());
        leader
    }

    pub fn spawn(&self, opts: SpawnOptions) -> Rc<Process> {
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        let pgid = opts.pgid.unwrap_or(pid);
        let parent = self.process(opts.ppid);
        let background =
            opts.background || opts.detached || parent.as_ref().is_some_and(|p| p.background);

        let process = Rc::new(Process::new(
            pid,
            opts.ppid,
            pgid,
            &self.key,
            opts.source,
            background,
        ));
        if opts.detached {
            process.set_detached();
        }
        match parent {
            Some(parent) => {
                process.inherit(parent.scope_snapshot());
                process.set_positionals(opts.positionals.unwrap_or_else(|| parent.positionals()));
            }
            None => process.set_positionals(opts.positionals.unwrap_or_default()),
        }
        tracing::debug!(pid, ppid = opts.ppid, pgid, source = %process.source, "spawned process");
        self.processes.borrow_mut().insert(pid, process.clone());
        process
    }

    /// Forget a finished process. The leader stays until replaced.
    pub fn reap(&self, pid: Pid) {
        if pid == LEADER_PID {
            return;
        }
        if self.processes.borrow_mut().remove(&pid).is_some() {
            tracing::debug!(pid, "process exited");
        }
    }

    pub fn process(&self, pid: Pid) -> Option<Rc<Process>> {
        self.processes.borrow().get(&pid).cloned()
    }

    pub fn processes(&self) -> Vec<Rc<Process>> {
        self.processes.borrow().values().cloned().collect()
    }

    /// Processes to signal when `pid` is targeted: the process alone, or its
    /// whole group plus descendants when it leads the group (or `whole_group`).
    fn signal_targets(&self, target: &Process, whole_group: bool) -> Vec<Rc<Process>> {
        let table = self.processes.borrow();
        if !(whole_group || target.pid == target.pgid()) {
            return table.get(&target.pid).cloned().into_iter().collect();
        }
        let pgid = target.pgid();
        let mut members: BTreeSet<Pid> = table
            .values()
            .filter(|p| p.pgid() == pgid)
            .map(|p| p.pid)
            .collect();
        // pids only grow, so one ascending pass picks up every descendant
        for p in table.values() {
            if p.pid != p.ppid && !p.is_detached() && members.contains(&p.ppid) {
                members.insert(p.pid);
            }
        }
        members
            .into_iter()
            .rev()
            .filter_map(|pid| table.get(&pid).cloned())
            .collect()
    }

    /// Deliver `signal` to `pid`, or to its group (see [`Self::signal_targets`]).
    pub fn signal(&self, pid: Pid, signal: Signal, whole_group: bool) -> Result<usize, String> {
        let target = self
            .process(pid)
            .ok_or_else(|| format!("({}) - No such process", pid))?;
        let targets = self.signal_targets(&target, whole_group);
        tracing::debug!(pid, signal = signal.name(), count = targets.len(), "delivering signal");
        for process in &targets {
            match signal {
                Signal::Stop => process.suspend(),
                Signal::Cont => process.resume(),
                _ => {
                    process.kill(KillSignal::new(signal, process.pid, &self.key));
                }
            }
        }
        Ok(targets.len())
    }

    /// Kill every member of group `pgid` except `except`, newest first.
    pub fn kill_group(&self, pgid: Pid, signal: Signal, except: Option<Pid>) {
        let members: Vec<Rc<Process>> = self
            .processes
            .borrow()
            .values()
            .rev()
            .filter(|p| p.pgid() == pgid && Some(p.pid) != except)
            .cloned()
            .collect();
        for process in members {
            process.kill(KillSignal::new(signal, process.pid, &self.key));
        }
    }

    /// Kill everything, newest first.
    pub fn kill_all(&self) {
        let all: Vec<Rc<Process>> = self.processes.borrow().values().rev().cloned().collect();
        for process in all {
            process.kill(KillSignal::new(Signal::Kill, process.pid, &self.key));
        }
    }

    pub fn last_exit(&self, background: bool) -> i32 {
        if background {
            self.last_exit_bg.get()
        } else {
            self.last_exit_fg.get()
        }
    }

    pub fn set_last_exit(&self, background: bool, code: i32) {
        if background {
            self.last_exit_bg.set(code);
        } else {
            self.last_exit_fg.set(code);
        }
    }

    pub fn last_bg_pid(&self) -> Option<Pid> {
        self.last_bg_pid.get()
    }

    pub fn set_last_bg_pid(&self, pid: Pid) {
        self.last_bg_pid.set(Some(pid));
    }

    // --- variables ---

    /// Read through locals, then inherited, then home.
    pub fn lookup_var(&self, process: &Process, name: &str) -> Option<Value> {
        process
            .local(name)
            .or_else(|| process.inherited(name))
            .or_else(|| self.home.borrow().get(name).cloned())
    }

    /// Write to whichever tier already holds `name`, home otherwise.
    pub fn assign_var(&self, process: &Process, name: &str, value: Value) {
        if process.has_local(name) {
            process.set_local(name, value);
        } else if process.has_inherited(name) {
            process.set_inherited(name, value);
        } else {
            self.home.borrow_mut().insert(name.to_string(), value);
        }
    }

    /// Append to an array variable, creating it if needed.
    pub fn append_var(&self, process: &Process, name: &str, value: Value) {
        let array = match self.lookup_var(process, name) {
            Some(Value::Array(mut items)) => {
                items.push(value);
                items
            }
            _ => vec![value],
        };
        self.assign_var(process, name, Value::Array(array));
    }

    pub fn unset_var(&self, process: &Process, name: &str) -> bool {
        process.remove_local(name).is_some()
            || process.remove_inherited(name).is_some()
            || self.home.borrow_mut().remove(name).is_some()
    }

    pub fn home(&self) -> Ref<'_, Map<String, Value>> {
        self.home.borrow()
    }

    /// Mutate the home scope in place.
    pub fn with_home_mut<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.home.borrow_mut())
    }

    pub fn cwd(&self) -> String {
        self.cwd.borrow().clone()
    }

    pub fn set_cwd(&self, path: String) {
        *self.cwd.borrow_mut() = path;
    }

    // --- functions ---

    pub fn define_function(&self, name: &str, def: FunctionDef) {
        self.functions.borrow_mut().insert(name.to_string(), def);
    }

    pub fn function(&self, name: &str) -> Option<FunctionDef> {
        self.functions.borrow().get(name).cloned()
    }

    pub fn remove_function(&self, name: &str) -> bool {
        self.functions.borrow_mut().remove(name).is_some()
    }

    pub fn functions(&self) -> Vec<(String, FunctionDef)> {
        self.functions
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // --- devices ---

    pub fn register_device(&self, device: Rc<dyn Device>) {
        self.devices
            .borrow_mut()
            .insert(device.key().to_string(), device);
    }

    pub fn device(&self, key: &str) -> Option<Rc<dyn Device>> {
        self.devices.borrow().get(key).cloned()
    }

    pub fn release_device(&self, key: &str) {
        self.devices.borrow_mut().remove(key);
    }

    fn device_key(&self, kind: &str) -> String {
        let n = self.next_device.get();
        self.next_device.set(n + 1);
        format!("/dev/{}-{}", kind, n)
    }

    pub fn new_fifo(&self) -> Rc<FifoDevice> {
        let fifo = Rc::new(FifoDevice::new(
            self.device_key("fifo"),
            self.config.fifo_capacity,
        ));
        self.register_device(fifo.clone());
        fifo
    }

    pub fn new_var_device(&self, process: Rc<Process>, name: &str, mode: VarMode) -> Rc<VarDevice> {
        let device = Rc::new(VarDevice::new(
            self.device_key("var"),
            name,
            mode,
            self.this.clone(),
            process,
        ));
        self.register_device(device.clone());
        device
    }

    // --- persistence ---

    pub fn history(&self) -> Ref<'_, History> {
        self.history.borrow()
    }

    /// Record an accepted line and write history back to the store.
    pub fn push_history(&self, line: &str) {
        self.history.borrow_mut().push(line);
        let lines = self.history.borrow().to_value();
        self.store.put(&history_key(&self.key), lines);
    }

    /// Write the home scope back to the store.
    pub fn persist(&self) {
        let snapshot = Value::Object(self.home.borrow().clone());
        self.store.put(&vars_key(&self.key), snapshot);
        tracing::debug!(session = %self.key, "variables persisted");
    }

    /// Tear down: kill every process, save variables, drop devices.
    pub fn dispose(&self) {
        self.kill_all();
        self.terminal.reject_reads();
        self.persist();
        self.processes.borrow_mut().clear();
        self.devices.borrow_mut().clear();
        tracing::debug!(session = %self.key, "session disposed");
    }
}

/// All sessions of one host, keyed by terminal.
pub struct Sessions {
    config: ShellConfig,
    store: Rc<dyn Store>,
    sessions: RefCell<HashMap<String, Rc<Session>>>,
}

impl Sessions {
    pub fn new(config: ShellConfig, store: Rc<dyn Store>) -> Self {
        Self {
            config,
            store,
            sessions: RefCell::new(HashMap::new()),
        }
    }

    /// Session for terminal `key`, created on first attach.
    pub fn attach(&self, key: &str, ui: Sender<ShellToUi>) -> Rc<Session> {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let session = Session::new(key, self.config.clone(), self.store.clone(), ui);
        self.sessions
            .borrow_mut()
            .insert(key.to_string(), session.clone());
        session
    }

    pub fn get(&self, key: &str) -> Option<Rc<Session>> {
        self.sessions.borrow().get(key).cloned()
    }

    pub fn detach(&self, key: &str) -> bool {
        let removed = self.sessions.borrow_mut().remove(key);
        match removed {
            Some(session) => {
                session.dispose();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::process::ProcessStatus;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn session() -> Rc<Session> {
        let (tx, _rx) = async_channel::unbounded();
        Session::new("tty", ShellConfig::default(), Rc::new(MemoryStore::new()), tx)
    }

    fn child(s: &Session, ppid: Pid, pgid: Option<Pid>) -> Rc<Process> {
        s.spawn(SpawnOptions {
            ppid,
            pgid,
            source: "x".into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_pids_start_after_leader() {
        let s = session();
        assert_eq!(s.process(LEADER_PID).map(|p| p.pid), Some(0));
        let p = child(&s, 0, None);
        assert_eq!((p.pid, p.pgid()), (1, 1));
        s.reap(p.pid);
        assert!(s.process(1).is_none());
        s.reap(LEADER_PID);
        assert!(s.process(LEADER_PID).is_some());
    }

    #[test]
    fn test_variable_tiers() {
        let s = session();
        let leader = s.process(0).unwrap();
        s.assign_var(&leader, "x", json!("home"));
        assert_eq!(s.home().get("x"), Some(&json!("home")));

        leader.set_local("y", json!("parent"));
        let kid = child(&s, 0, None);
        assert_eq!(s.lookup_var(&kid, "y"), Some(json!("parent")));

        // child overrides only its own copy
        s.assign_var(&kid, "y", json!("child"));
        assert_eq!(s.lookup_var(&kid, "y"), Some(json!("child")));
        assert_eq!(s.lookup_var(&leader, "y"), Some(json!("parent")));

        // home writes are visible to everyone
        s.assign_var(&kid, "x", json!("shared"));
        assert_eq!(s.lookup_var(&leader, "x"), Some(json!("shared")));
    }

    #[test]
    fn test_append_creates_array() {
        let s = session();
        let leader = s.process(0).unwrap();
        s.append_var(&leader, "xs", json!(1));
        s.append_var(&leader, "xs", json!(2));
        assert_eq!(s.lookup_var(&leader, "xs"), Some(json!([1, 2])));
    }

    #[test]
    fn test_group_signal_reaches_descendants_newest_first() {
        let s = session();
        let a = child(&s, 0, Some(3));
        let b = child(&s, 0, Some(3));
        let c = child(&s, 0, None);
        assert_eq!(c.pid, 3);
        let grandchild = child(&s, a.pid, None);

        let order = Rc::new(RefCell::new(Vec::new()));
        for p in [&a, &b, &c, &grandchild] {
            let order = order.clone();
            let pid = p.pid;
            p.add_cleanup(move |_| order.borrow_mut().push(pid));
        }

        assert_eq!(s.signal(3, Signal::Term, false), Ok(4));
        assert_eq!(*order.borrow(), vec![4, 3, 2, 1]);
        assert_eq!(grandchild.status(), ProcessStatus::Killed);
    }

    #[test]
    fn test_group_signal_skips_background_jobs() {
        let s = session();
        let job = s.spawn(SpawnOptions {
            ppid: 0,
            detached: true,
            ..Default::default()
        });
        let stage = child(&s, job.pid, None);
        assert!(stage.background);
        s.signal(LEADER_PID, Signal::Int, false).unwrap();
        assert!(!job.is_killed());
        assert!(!stage.is_killed());
        s.signal(job.pid, Signal::Int, false).unwrap();
        assert!(stage.is_killed());
    }

    #[test]
    fn test_stop_and_cont() {
        let s = session();
        let a = child(&s, 0, None);
        s.signal(a.pid, Signal::Stop, false).unwrap();
        assert_eq!(a.status(), ProcessStatus::Suspended);
        s.signal(a.pid, Signal::Cont, false).unwrap();
        assert_eq!(a.status(), ProcessStatus::Running);
        assert!(s.signal(99, Signal::Term, false).is_err());
    }

    #[test]
    fn test_state_survives_reattach() {
        let store: Rc<dyn Store> = Rc::new(MemoryStore::new());
        let sessions = Sessions::new(ShellConfig::default(), store);
        let (tx, _rx) = async_channel::unbounded();

        let s = sessions.attach("tty-1", tx.clone());
        let leader = s.process(0).unwrap();
        s.assign_var(&leader, "greeting", json!("hi"));
        s.push_history("echo hi");
        let bg = child(&s, 0, None);
        assert!(sessions.detach("tty-1"));
        assert!(bg.is_killed());

        let s = sessions.attach("tty-1", tx);
        assert_eq!(s.home().get("greeting"), Some(&json!("hi")));
        assert_eq!(s.history().get(0), Some("echo hi"));
    }
}
