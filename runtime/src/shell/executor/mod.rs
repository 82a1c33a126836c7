//! Tree-walking interpreter.
//!
//! [`run_node`] executes one node of a process's tree and records its exit
//! code on the node. Everything that can wait (device I/O, sleeps, child
//! processes) goes through the running process's guard, so a kill unwinds
//! the interpreter as [`ShellError::Kill`] from the innermost await.
//!
//! Error policy:
//! - `Kill` propagates; function calls absorb it according to its depth.
//! - Every other error is reported at the command that raised it and
//!   becomes that command's exit code.

mod pipeline;
mod simple;
#[cfg(test)]
mod tests;

pub use pipeline::run_substitution;

use super::ast::{AndOrOp, ExecCtx, NodeId, NodeKind, SyntaxTree};
use super::devices::{Device, Item, ReadOpts, ReadResult, TTY_KEY};
use super::error::{ParseError, ShellError};
use super::expand::{expand_single, expand_word, Mode};
use super::parser;
use super::process::{KillSignal, Process, Signal};
use super::reconstruct;
use super::session::{FunctionDef, Session, SpawnOptions};
use super::testexpr::{self, glob_match, Dialect};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<i32, ShellError>> + 'a>>;

/// What a running piece of tree needs: its session, its process, its tree,
/// and the file descriptor table in effect.
#[derive(Clone)]
pub struct Frame {
    pub session: Rc<Session>,
    pub process: Rc<Process>,
    pub tree: Rc<SyntaxTree>,
    pub fds: Rc<BTreeMap<u32, String>>,
}

impl Frame {
    pub fn new(session: Rc<Session>, process: Rc<Process>, tree: Rc<SyntaxTree>) -> Self {
        let mut fds = tree.ctx().fds.clone();
        for fd in 0..=2 {
            fds.entry(fd).or_insert_with(|| TTY_KEY.to_string());
        }
        Self {
            session,
            process,
            tree,
            fds: Rc::new(fds),
        }
    }

    pub fn with_fds(&self, fds: BTreeMap<u32, String>) -> Self {
        Self {
            fds: Rc::new(fds),
            ..self.clone()
        }
    }

    pub fn device(&self, fd: u32) -> Result<Rc<dyn Device>, ShellError> {
        let key = self
            .fds
            .get(&fd)
            .ok_or_else(|| ShellError::command(format!("bad file descriptor: {}", fd), 1))?;
        self.session
            .device(key)
            .ok_or_else(|| ShellError::Internal(format!("no device {}", key)))
    }

    /// Write one item to `fd`, waiting for space.
    ///
    /// Writing to a pipe whose reader has gone kills this process with
    /// `SIGPIPE`.
    pub async fn write(&self, fd: u32, item: Item) -> Result<(), ShellError> {
        let device = self.device(fd)?;
        self.process.guard(device.write(item)).await?;
        if device.is_broken() {
            let signal = KillSignal::new(Signal::Pipe, self.process.pid, &self.session.key);
            tracing::debug!(pid = self.process.pid, fd, "broken pipe");
            self.process.kill(signal.clone());
            return Err(ShellError::Kill(signal));
        }
        Ok(())
    }

    pub async fn read(&self, fd: u32, opts: ReadOpts) -> Result<ReadResult, ShellError> {
        let device = self.device(fd)?;
        self.process.guard(device.read(opts)).await
    }

    /// Context for a tree cloned out of this frame for process `child`.
    pub fn child_ctx(&self, child: &Process, fds: BTreeMap<u32, String>) -> ExecCtx {
        let ctx = self.tree.ctx();
        ExecCtx {
            session: self.session.key.clone(),
            pid: child.pid,
            ppid: child.ppid,
            pgid: child.pgid(),
            fds,
            call_stack: ctx.call_stack.clone(),
            verbose: ctx.verbose,
        }
    }

    /// Report a failure on fd 2: an error line on the terminal, plain text
    /// anywhere else.
    pub async fn report(&self, err: &ShellError) {
        if let ShellError::Internal(msg) = err {
            tracing::error!(pid = self.process.pid, error = %msg, "internal error");
        }
        let message = err.to_string();
        match self.fds.get(&2).map(String::as_str) {
            Some(TTY_KEY) | None => self.session.terminal().error(message),
            Some(_) => {
                if let Err(e) = self.write(2, Item::text(message)).await {
                    tracing::debug!(error = %e, "could not report error");
                }
            }
        }
    }

    /// Turn a non-kill error into its exit code after reporting it.
    pub async fn absorb(&self, result: Result<i32, ShellError>) -> Result<i32, ShellError> {
        match result {
            Err(err) if !err.is_kill() => {
                self.report(&err).await;
                Ok(err.code())
            }
            other => other,
        }
    }
}

/// Execute node `id` of the frame's tree.
pub fn run_node(frame: &Frame, id: NodeId) -> ExecFuture<'_> {
    Box::pin(async move {
        let result = exec(frame, id).await;
        if let Ok(code) = &result {
            frame.tree.node(id).set_exit_code(*code);
        }
        result
    })
}

async fn exec(frame: &Frame, id: NodeId) -> Result<i32, ShellError> {
    match frame.tree.kind(id) {
        NodeKind::List { items } => {
            let mut code = 0;
            for item in items {
                code = run_node(frame, *item).await?;
            }
            Ok(code)
        }
        NodeKind::Stmt { body, background } => {
            frame.process.checkpoint().await?;
            if *background {
                spawn_background(frame, *body);
                Ok(0)
            } else {
                run_command(frame, *body).await
            }
        }
        NodeKind::AndOr { first, rest } => {
            let mut code = run_command(frame, *first).await?;
            for (op, next) in rest {
                let run = match op {
                    AndOrOp::And => code == 0,
                    AndOrOp::Or => code != 0,
                };
                if run {
                    code = run_command(frame, *next).await?;
                }
            }
            Ok(code)
        }
        NodeKind::Pipeline { bang, stages } => {
            let code = match stages.as_slice() {
                [single] => {
                    let result = run_node(frame, *single).await;
                    frame.absorb(result).await?
                }
                _ => pipeline::run_pipeline(frame, stages).await?,
            };
            let code = match (*bang, code) {
                (true, 0) => 1,
                (true, _) => 0,
                (false, code) => code,
            };
            frame.session.set_last_exit(frame.process.background, code);
            Ok(code)
        }
        NodeKind::Simple { .. } => simple::run_simple(frame, id).await,
        NodeKind::If {
            cond,
            then,
            otherwise,
        } => {
            if run_node(frame, *cond).await? == 0 {
                run_node(frame, *then).await
            } else if let Some(otherwise) = otherwise {
                run_node(frame, *otherwise).await
            } else {
                Ok(0)
            }
        }
        NodeKind::Else { body } | NodeKind::BraceGroup { body } => run_node(frame, *body).await,
        NodeKind::Loop { until, cond, body } => run_loop(frame, *until, *cond, *body).await,
        NodeKind::For { var, items, body } => {
            let values = match items {
                Some(items) => {
                    let mut values = Vec::new();
                    for item in items {
                        values.extend(expand_word(frame, *item, Mode::Default).await?);
                    }
                    values
                }
                None => frame.process.positionals(),
            };
            let mut code = 0;
            for value in values {
                frame.process.checkpoint().await?;
                frame
                    .session
                    .assign_var(&frame.process, var, serde_json::Value::from(value));
                code = run_node(frame, *body).await?;
            }
            Ok(code)
        }
        NodeKind::Case { word, items } => {
            let subject = expand_single(frame, *word).await?;
            for item in items {
                let NodeKind::CaseItem { patterns, body } = frame.tree.kind(*item) else {
                    continue;
                };
                for pattern in patterns {
                    let pattern = expand_single(frame, *pattern).await?;
                    if glob_match(&pattern, &subject) {
                        return match body {
                            Some(body) => run_node(frame, *body).await,
                            None => Ok(0),
                        };
                    }
                }
            }
            Ok(0)
        }
        NodeKind::Subshell { body } => {
            let source = reconstruct::single_line(&frame.tree, id);
            run_scoped(frame, *body, source, Scope::Subshell).await
        }
        NodeKind::FunctionDef { name, body } => {
            let source = reconstruct::single_line(&frame.tree, id);
            let body = Rc::new(frame.tree.subtree(*body, ExecCtx::default()));
            frame
                .session
                .define_function(name, FunctionDef { source, body });
            Ok(0)
        }
        NodeKind::Redirected { body, redirects } => {
            let (redirected, opened) = simple::apply_redirects(frame, redirects).await?;
            let result = run_node(&redirected, *body).await;
            simple::release(&redirected, opened);
            result
        }
        NodeKind::Test { words } => {
            let mut args = Vec::with_capacity(words.len());
            for word in words {
                args.push(expand_single(frame, *word).await?);
            }
            match testexpr::evaluate(&args, Dialect::Extended) {
                Ok(true) => Ok(0),
                Ok(false) => Ok(1),
                Err(msg) => Err(ShellError::command(format!("[[: {}", msg), 2)),
            }
        }
        NodeKind::Unsupported { what } => Err(ShellError::unsupported(what.clone(), 2)),
        other => Err(ShellError::Internal(format!(
            "node is not executable: {:?}",
            other
        ))),
    }
}

/// Run one command of a statement or `&&`/`||` chain and publish its code
/// as `$?`. Errors other than kills stop here.
async fn run_command(frame: &Frame, id: NodeId) -> Result<i32, ShellError> {
    let result = run_node(frame, id).await;
    let code = frame.absorb(result).await?;
    frame.session.set_last_exit(frame.process.background, code);
    Ok(code)
}

/// `while`/`until`. Each iteration lasts at least `loop_floor_ms`; the
/// remainder is slept out interruptibly.
async fn run_loop(frame: &Frame, until: bool, cond: NodeId, body: NodeId) -> Result<i32, ShellError> {
    let floor = Duration::from_millis(frame.session.config.loop_floor_ms);
    let mut code = 0;
    loop {
        let started = Instant::now();
        let test = run_node(frame, cond).await?;
        if (test == 0) == until {
            return Ok(code);
        }
        code = run_node(frame, body).await?;

        let elapsed = started.elapsed();
        if elapsed < floor {
            frame
                .process
                .guard(tokio::time::sleep(floor - elapsed))
                .await?;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Subshell,
    /// Function call: absorbs `return`.
    Function,
}

/// Run `body` of the frame's tree as a child process in the caller's group
/// and wait for it inline.
pub(crate) async fn run_scoped(
    frame: &Frame,
    body: NodeId,
    source: String,
    scope: Scope,
) -> Result<i32, ShellError> {
    let tree = Rc::new(frame.tree.subtree(body, ExecCtx::default()));
    run_child_tree(frame, tree, source, scope, None).await
}

/// Run a detached copy of `tree` in a child process of `frame`.
pub(crate) async fn run_child_tree(
    frame: &Frame,
    tree: Rc<SyntaxTree>,
    source: String,
    scope: Scope,
    function: Option<(&str, Vec<String>)>,
) -> Result<i32, ShellError> {
    let session = &frame.session;
    let (name, positionals) = match function {
        Some((name, args)) => (Some(name), Some(args)),
        None => (None, None),
    };
    let child = session.spawn(SpawnOptions {
        ppid: frame.process.pid,
        pgid: Some(frame.process.pgid()),
        source,
        background: false,
        detached: false,
        positionals,
    });

    let mut ctx = frame.child_ctx(&child, (*frame.fds).clone());
    if let Some(name) = name {
        ctx.call_stack.push(name.to_string());
    }
    *tree.ctx_mut() = ctx;
    let child_frame = Frame::new(session.clone(), child.clone(), tree);

    let link = {
        let child = child.clone();
        frame.process.add_cleanup(move |signal| {
            child.kill(signal.clone());
        })
    };
    let root = child_frame.tree.root();
    let result = run_node(&child_frame, root).await;
    frame.process.remove_cleanup(link);
    session.reap(child.pid);

    match (scope, result) {
        (Scope::Function, Err(ShellError::Kill(mut signal))) if signal.depth > 0 => {
            signal.depth -= 1;
            if signal.depth == 0 {
                Ok(signal.exit_code())
            } else {
                Err(ShellError::Kill(signal))
            }
        }
        (_, result) => result,
    }
}

/// Start `body` as a background job: a new group that nobody waits for.
fn spawn_background(frame: &Frame, body: NodeId) {
    let session = frame.session.clone();
    let source = reconstruct::single_line(&frame.tree, body);
    let child = session.spawn(SpawnOptions {
        ppid: frame.process.pid,
        pgid: None,
        source,
        background: true,
        detached: true,
        positionals: None,
    });
    session.set_last_bg_pid(child.pid);

    let tree = Rc::new(frame.tree.subtree(body, ExecCtx::default()));
    *tree.ctx_mut() = frame.child_ctx(&child, (*frame.fds).clone());
    let job = Frame::new(session.clone(), child.clone(), tree);

    tokio::task::spawn_local(async move {
        let root = job.tree.root();
        let result = run_node(&job, root).await;
        let code = match result {
            Ok(code) => code,
            Err(ShellError::Kill(signal)) => {
                // take down whatever the job left running
                if let Err(e) = job.session.signal(child.pid, signal.signal, true) {
                    tracing::debug!(error = %e, "background group already gone");
                }
                signal.exit_code()
            }
            Err(err) => {
                job.report(&err).await;
                err.code()
            }
        };
        tracing::debug!(pid = child.pid, code, "background job finished");
        job.session.set_last_exit(true, code);
        job.session.reap(child.pid);
    });
}

/// Run a parsed line in the foreground as the session leader.
///
/// Every outcome becomes an exit code; kills that reach this level have
/// already stopped the foreground group.
pub async fn run_foreground(session: &Rc<Session>, tree: Rc<SyntaxTree>) -> i32 {
    let source = reconstruct::single_line(&tree, tree.root());
    let leader = session.spawn_leader(&source);
    {
        let mut ctx = tree.ctx_mut();
        ctx.session = session.key.clone();
        ctx.pid = leader.pid;
        ctx.ppid = leader.ppid;
        ctx.pgid = leader.pgid();
        ctx.verbose = session.config.verbose;
    }
    let frame = Frame::new(session.clone(), leader, tree);
    let root = frame.tree.root();

    let code = match run_node(&frame, root).await {
        Ok(code) => code,
        Err(ShellError::Kill(signal)) => {
            tracing::debug!(%signal, "foreground interrupted");
            signal.exit_code()
        }
        Err(err) => {
            frame.report(&err).await;
            err.code()
        }
    };
    session.set_last_exit(false, code);
    code
}

/// Parse and run `source` in the foreground.
pub async fn run_source(session: &Rc<Session>, source: &str) -> Result<i32, ParseError> {
    let tree = parser::parse(source)?;
    Ok(run_foreground(session, Rc::new(tree)).await)
}

/// Copy fd 0 to fd 1 until end-of-file, chunks intact.
pub async fn copy_input(frame: &Frame) -> Result<(), ShellError> {
    let opts = ReadOpts {
        exactly_one: false,
        forward_chunks: true,
    };
    while let ReadResult::Data(item) = frame.read(0, opts).await? {
        frame.write(1, item).await?;
    }
    Ok(())
}
