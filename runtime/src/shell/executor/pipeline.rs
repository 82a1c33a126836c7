//! Multi-stage pipelines and command substitution.
//!
//! Stages run as sibling processes connected by FIFOs. A stage closes its
//! ends of the pipes as soon as it finishes, so readers see end-of-file and
//! writers stop blocking without waiting for the rest of the pipeline.

use super::{run_node, Frame};
use crate::shell::ast::{ExecCtx, NodeId};
use crate::shell::devices::{value_to_text, Device, FifoDevice, ReadOpts, ReadResult};
use crate::shell::error::ShellError;
use crate::shell::process::{Process, Signal};
use crate::shell::reconstruct::single_line;
use crate::shell::session::SpawnOptions;
use std::rc::Rc;

/// Run `stages` (two or more) concurrently and wait for all of them.
///
/// All stages share one new process group led by the last stage. A stage
/// that is killed takes its siblings down with it; an ordinary non-zero
/// exit does not. A stage whose reader has finished dies of `SIGPIPE` on
/// its next write, which stops only that stage.
pub(super) async fn run_pipeline(frame: &Frame, stages: &[NodeId]) -> Result<i32, ShellError> {
    let session = &frame.session;
    let parent = &frame.process;

    let children: Vec<Rc<Process>> = stages
        .iter()
        .map(|stage| {
            session.spawn(SpawnOptions {
                ppid: parent.pid,
                source: single_line(&frame.tree, *stage),
                ..SpawnOptions::default()
            })
        })
        .collect();
    let pgid = match children.last() {
        Some(last) => last.pid,
        None => return Ok(0),
    };
    for child in &children {
        child.set_pgid(pgid);
    }
    let fifos: Vec<Rc<FifoDevice>> = (1..stages.len()).map(|_| session.new_fifo()).collect();

    let link = {
        let session = Rc::downgrade(session);
        parent.add_cleanup(move |signal| {
            if let Some(session) = session.upgrade() {
                session.kill_group(pgid, signal.signal, None);
            }
        })
    };

    let last = stages.len() - 1;
    let mut handles = Vec::with_capacity(stages.len());
    for (i, (stage, child)) in stages.iter().zip(&children).enumerate() {
        let input = i.checked_sub(1).map(|j| fifos[j].clone());
        let output = (i < last).then(|| fifos[i].clone());

        let mut fds = (*frame.fds).clone();
        if let Some(input) = &input {
            fds.insert(0, input.key().to_string());
        }
        if let Some(output) = &output {
            fds.insert(1, output.key().to_string());
        }
        let tree = Rc::new(frame.tree.subtree(*stage, ExecCtx::default()));
        *tree.ctx_mut() = frame.child_ctx(child, fds);
        let stage_frame = Frame::new(session.clone(), child.clone(), tree);
        let child = child.clone();
        let is_last = i == last;

        handles.push(tokio::task::spawn_local(async move {
            let root = stage_frame.tree.root();
            let result = run_node(&stage_frame, root).await;
            let result = stage_frame.absorb(result).await;

            if let Some(input) = input {
                input.close_read();
            }
            if let Some(output) = output {
                output.close_write();
            }
            if let Err(ShellError::Kill(signal)) = &result {
                // a broken pipe only stops the writer
                if !is_last && signal.signal != Signal::Pipe {
                    tracing::debug!(pid = child.pid, pgid, "pipeline stage killed, stopping siblings");
                    stage_frame
                        .session
                        .kill_group(pgid, signal.signal, Some(child.pid));
                }
            }
            stage_frame.session.reap(child.pid);
            result
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = handle
            .await
            .map_err(|e| ShellError::Internal(format!("pipeline stage panicked: {}", e)))?;
        results.push(result);
    }

    parent.remove_cleanup(link);
    for fifo in &fifos {
        session.release_device(fifo.key());
    }

    let mut failed = None;
    for (i, (stage, result)) in stages.iter().zip(&results).enumerate() {
        let code = match result {
            Ok(code) => *code,
            Err(err) => err.code(),
        };
        frame.tree.node(*stage).set_exit_code(code);
        let aborted = matches!(result, Err(ShellError::Kill(s)) if s.signal != Signal::Pipe);
        if i < last && failed.is_none() && aborted {
            failed = Some(code);
        }
    }

    if let Some(signal) = parent.kill_signal() {
        return Err(ShellError::Kill(signal));
    }
    let final_code = match &results[last] {
        Ok(code) => *code,
        Err(err) => err.code(),
    };
    Ok(failed.unwrap_or(final_code))
}

/// Run `body` with fd 1 captured and return what it wrote.
///
/// Values are joined one per line and trailing newlines are removed. The
/// exit status becomes `$?`.
pub async fn run_substitution(frame: &Frame, body: NodeId) -> Result<String, ShellError> {
    let session = &frame.session;
    let child = session.spawn(SpawnOptions {
        ppid: frame.process.pid,
        pgid: Some(frame.process.pgid()),
        source: single_line(&frame.tree, body),
        ..SpawnOptions::default()
    });
    let fifo = session.new_fifo();

    let mut fds = (*frame.fds).clone();
    fds.insert(1, fifo.key().to_string());
    let tree = Rc::new(frame.tree.subtree(body, ExecCtx::default()));
    *tree.ctx_mut() = frame.child_ctx(&child, fds);
    let inner = Frame::new(session.clone(), child.clone(), tree);

    let link = {
        let child = child.clone();
        frame.process.add_cleanup(move |signal| {
            child.kill(signal.clone());
        })
    };

    let run = async {
        let root = inner.tree.root();
        let result = run_node(&inner, root).await;
        let result = inner.absorb(result).await;
        fifo.close_write();
        result
    };
    let drain = async {
        let mut values = Vec::new();
        while let ReadResult::Data(item) = fifo.read(ReadOpts::default()).await {
            values.extend(item.into_values());
        }
        values
    };
    let (result, values) = futures_lite::future::zip(run, drain).await;

    fifo.close_read();
    session.release_device(fifo.key());
    frame.process.remove_cleanup(link);
    session.reap(child.pid);

    let code = result?;
    session.set_last_exit(frame.process.background, code);

    let mut text = values.iter().map(value_to_text).collect::<Vec<_>>().join("\n");
    let trimmed = text.trim_end_matches('\n').len();
    text.truncate(trimmed);
    Ok(text)
}
