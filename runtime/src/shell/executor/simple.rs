//! Simple commands: assignments, redirections and command dispatch.

use super::{run_child_tree, Frame, Scope};
use crate::shell::ast::{ExecCtx, NodeId, NodeKind, RedirectOp};
use crate::shell::commands::{CommandContext, ShellCommands};
use crate::shell::devices::{Device, Item, VarMode, NULL_KEY, TTY_KEY, VOICE_KEY};
use crate::shell::error::ShellError;
use crate::shell::expand::{expand_single, expand_word, Mode};
use crate::shell::namespace;
use crate::shell::reconstruct::single_line;
use crate::shell::session::FunctionDef;
use crate::shell::word::is_name;
use serde_json::Value;
use std::rc::Rc;

pub(super) async fn run_simple(frame: &Frame, id: NodeId) -> Result<i32, ShellError> {
    let NodeKind::Simple {
        assigns,
        words,
        redirects,
    } = frame.tree.kind(id)
    else {
        return Err(ShellError::Internal("expected a simple command".into()));
    };

    let mut argv = Vec::new();
    for word in words {
        argv.extend(expand_word(frame, *word, Mode::Default).await?);
    }
    for assign in assigns {
        run_assign(frame, *assign).await?;
    }
    if argv.is_empty() {
        return Ok(0);
    }

    let (redirected, opened) = apply_redirects(frame, redirects).await?;
    if redirected.tree.ctx().verbose {
        tracing::debug!(pid = frame.process.pid, ?argv, "exec");
    }
    let result = dispatch(&redirected, argv).await;
    let result = redirected.absorb(result).await;
    release(&redirected, opened);
    result
}

async fn run_assign(frame: &Frame, id: NodeId) -> Result<(), ShellError> {
    let NodeKind::Assign { name, value } = frame.tree.kind(id) else {
        return Err(ShellError::Internal("expected an assignment".into()));
    };
    let text = match value {
        Some(word) => expand_single(frame, *word).await?,
        None => String::new(),
    };
    frame
        .session
        .assign_var(&frame.process, name, Value::String(text));
    Ok(())
}

async fn dispatch(frame: &Frame, argv: Vec<String>) -> Result<i32, ShellError> {
    let name = argv[0].clone();

    if let Some(builtin) = ShellCommands::get_command(&name) {
        if argv.get(1).map(String::as_str) == Some("--help") {
            if let Some(help) = ShellCommands::show_help(&name) {
                frame.write(1, Item::text(help)).await?;
                return Ok(0);
            }
        }
        return builtin(argv, CommandContext::new(frame.clone())).await;
    }

    if let Some(def) = frame.session.function(&name) {
        let args = argv[1..].to_vec();
        return call_function(frame, &name, &def, args).await;
    }

    if name.contains('.') || name.contains('/') {
        let segments = namespace::resolve(&frame.session.cwd(), &name);
        return match namespace::lookup(&frame.session, &segments) {
            Some(value) => {
                frame.write(1, Item::Value(value)).await?;
                Ok(0)
            }
            None => Err(ShellError::command(
                format!("{}: no such path", namespace::to_path(&segments)),
                1,
            )),
        };
    }

    Err(ShellError::command(format!("{}: command not found", name), 127))
}

/// Call a shell function with `args` as its positionals.
async fn call_function(
    frame: &Frame,
    name: &str,
    def: &FunctionDef,
    args: Vec<String>,
) -> Result<i32, ShellError> {
    let tree = Rc::new(def.body.subtree(def.body.root(), ExecCtx::default()));
    let source = std::iter::once(name.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    run_child_tree(frame, tree, source, Scope::Function, Some((name, args))).await
}

/// Apply `> target` / `>> target` redirections, returning the new frame and
/// the keys of the devices opened for it.
pub(super) async fn apply_redirects(
    frame: &Frame,
    redirects: &[NodeId],
) -> Result<(Frame, Vec<String>), ShellError> {
    if redirects.is_empty() {
        return Ok((frame.clone(), Vec::new()));
    }
    let mut fds = (*frame.fds).clone();
    let mut opened = Vec::new();
    for id in redirects {
        match open_redirect(frame, *id, &mut opened).await {
            Ok((fd, key)) => {
                fds.insert(fd, key);
            }
            Err(err) => {
                for key in opened {
                    frame.session.release_device(&key);
                }
                return Err(err);
            }
        }
    }
    Ok((frame.with_fds(fds), opened))
}

async fn open_redirect(
    frame: &Frame,
    id: NodeId,
    opened: &mut Vec<String>,
) -> Result<(u32, String), ShellError> {
    let NodeKind::Redirect { fd, op, target } = frame.tree.kind(id) else {
        return Err(ShellError::Internal("expected a redirection".into()));
    };
    let unsupported = || ShellError::unsupported(single_line(&frame.tree, id), 127);

    let mode = match op {
        RedirectOp::Write => VarMode::Last,
        RedirectOp::Append => VarMode::Array,
        _ => return Err(unsupported()),
    };
    let fd = fd.unwrap_or(1);
    if fd != 1 && fd != 2 {
        return Err(unsupported());
    }
    let Some(target) = target else {
        return Err(unsupported());
    };

    let name = expand_single(frame, *target).await?;
    let key = match name.as_str() {
        NULL_KEY | VOICE_KEY | TTY_KEY => name,
        var if is_name(var) => {
            let device = frame
                .session
                .new_var_device(frame.process.clone(), var, mode);
            let key = device.key().to_string();
            opened.push(key.clone());
            key
        }
        _ => return Err(unsupported()),
    };
    Ok((fd, key))
}

/// Close devices opened by [`apply_redirects`].
pub(super) fn release(frame: &Frame, opened: Vec<String>) {
    for key in opened {
        if let Some(device) = frame.session.device(&key) {
            device.close_write();
        }
        frame.session.release_device(&key);
    }
}
