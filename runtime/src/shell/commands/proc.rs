//! Job control builtins: kill, ps, return

use futures_lite::future::BoxedLocal;
use shell_macros::{shell_command, shell_commands};

use super::{make_parser, usage_error, CommandContext};
use crate::shell::error::ShellError;
use crate::shell::process::{KillSignal, Pid, ProcessStatus, Signal};

/// Source shown by `ps` without `-s`.
const PS_SOURCE_WIDTH: usize = 40;

/// Process commands - signals and the process table.
pub struct ProcCommands;

#[shell_commands]
impl ProcCommands {
    /// kill - send a signal to processes or groups
    #[shell_command(
        name = "kill",
        usage = "kill [-s SIGNAL | -SIGNAL | --SIGNAL] PID|%PGID...",
        description = "Signal processes (TERM by default); %N targets group N, STOP/CONT suspend and resume"
    )]
    fn cmd_kill(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let (signal, targets) = parse_kill_args(&args[1..])?;
            if targets.is_empty() {
                return Err(ShellError::command("kill: usage: kill [-s SIGNAL] PID...", 2));
            }
            let session = ctx.session();
            let mut code = 0;
            for target in targets {
                let (pid, whole_group) = parse_target(target)?;
                if let Err(msg) = session.signal(pid, signal, whole_group) {
                    ctx.warn(format!("kill: {}", msg)).await;
                    code = 1;
                }
            }
            Ok(code)
        })
    }

    /// ps - list processes
    #[shell_command(
        name = "ps",
        usage = "ps [-a] [-s]",
        description = "List process group leaders; -a lists every process, -s shows full source"
    )]
    fn cmd_ps(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let mut all = false;
            let mut full = false;
            let mut parser = make_parser(&args);
            while let Some(arg) = parser.next().map_err(|e| usage_error("ps", e))? {
                match arg {
                    lexopt::Arg::Short('a') => all = true,
                    lexopt::Arg::Short('s') => full = true,
                    other => return Err(usage_error("ps", other.unexpected())),
                }
            }

            let mut rows = vec![format!(
                "{:>5} {:>5} {:>5} {:<9} {}",
                "PID", "PPID", "PGID", "STAT", "COMMAND"
            )];
            for process in ctx.session().processes() {
                if !all && process.pid != process.pgid() {
                    continue;
                }
                let status = match process.status() {
                    ProcessStatus::Running => "running",
                    ProcessStatus::Suspended => "stopped",
                    ProcessStatus::Killed => "killed",
                };
                let source = if full {
                    process.source.clone()
                } else {
                    truncate(&process.source, PS_SOURCE_WIDTH)
                };
                rows.push(format!(
                    "{:>5} {:>5} {:>5} {:<9} {}",
                    process.pid,
                    process.ppid,
                    process.pgid(),
                    status,
                    source
                ));
            }
            for row in rows {
                ctx.write_text(row).await?;
            }
            Ok(0)
        })
    }

    /// return - leave the current function
    #[shell_command(
        name = "return",
        usage = "return [N]",
        description = "Leave the current function or sourced script with status N (default: last status)"
    )]
    fn cmd_return(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            if ctx.frame().tree.ctx().call_stack.is_empty() {
                return Err(ShellError::command(
                    "return: can only `return' from a function or sourced script",
                    1,
                ));
            }
            let process = ctx.process();
            let code = match args.get(1) {
                Some(n) => n.parse::<i32>().map_err(|_| {
                    ShellError::command(format!("return: {}: numeric argument required", n), 2)
                })?,
                None => ctx.session().last_exit(process.background),
            };
            Err(ShellError::Kill(KillSignal::function_return(
                process.pid,
                &process.session,
                code,
            )))
        })
    }
}

/// Split kill arguments into the signal and the remaining targets.
fn parse_kill_args(args: &[String]) -> Result<(Signal, Vec<&str>), ShellError> {
    let bad_signal = |name: &str| ShellError::command(format!("kill: {}: invalid signal specification", name), 1);
    let mut signal = Signal::Term;
    let mut targets = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-s" {
            let name = iter
                .next()
                .ok_or_else(|| ShellError::command("kill: -s: option requires an argument", 2))?;
            signal = Signal::parse(name).ok_or_else(|| bad_signal(name))?;
        } else if let Some(name) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) {
            if name.is_empty() {
                continue;
            }
            signal = Signal::parse(name).ok_or_else(|| bad_signal(name))?;
        } else {
            targets.push(arg.as_str());
        }
    }
    Ok((signal, targets))
}

/// `%N` is group N; a bare number is one pid.
fn parse_target(target: &str) -> Result<(Pid, bool), ShellError> {
    let (digits, whole_group) = match target.strip_prefix('%') {
        Some(rest) => (rest, true),
        None => (target, false),
    };
    let pid = digits.parse::<Pid>().map_err(|_| {
        ShellError::command(
            format!("kill: {}: arguments must be process or job IDs", target),
            1,
        )
    })?;
    Ok((pid, whole_group))
}

fn truncate(text: &str, width: usize) -> String {
    match text.char_indices().nth(width) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_kill_args() {
        let args = strings(&["3"]);
        assert_eq!(parse_kill_args(&args).unwrap(), (Signal::Term, vec!["3"]));

        let args = strings(&["--STOP", "%4"]);
        assert_eq!(parse_kill_args(&args).unwrap(), (Signal::Stop, vec!["%4"]));

        let args = strings(&["-s", "cont", "1", "2"]);
        assert_eq!(parse_kill_args(&args).unwrap(), (Signal::Cont, vec!["1", "2"]));

        let args = strings(&["-9", "5"]);
        assert_eq!(parse_kill_args(&args).unwrap(), (Signal::Kill, vec!["5"]));

        let args = strings(&["-PIPE", "5"]);
        assert_eq!(parse_kill_args(&args).unwrap(), (Signal::Pipe, vec!["5"]));

        assert!(parse_kill_args(&strings(&["-BOGUS", "1"])).is_err());
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("12").unwrap(), (12, false));
        assert_eq!(parse_target("%7").unwrap(), (7, true));
        assert!(parse_target("abc").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 40), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
