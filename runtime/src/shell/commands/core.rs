//! Core builtins: echo, true, false, pwd, cd, sleep, read, cat, test, clear, help

use futures_lite::future::BoxedLocal;
use serde_json::Value;
use shell_macros::{shell_command, shell_commands};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

use super::{CommandContext, ShellCommands};
use crate::shell::devices::{Item, ReadOpts, ReadResult};
use crate::shell::error::ShellError;
use crate::shell::executor::copy_input;
use crate::shell::namespace;
use crate::shell::process::HookOutcome;
use crate::shell::testexpr::{self, Dialect};
use crate::interactive::ShellToUi;

/// Core commands - basic shell utilities.
pub struct CoreCommands;

#[shell_commands]
impl CoreCommands {
    /// echo - output arguments as one line
    #[shell_command(
        name = "echo",
        usage = "echo [STRING]...",
        description = "Display a line of text"
    )]
    fn cmd_echo(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            ctx.write_text(args[1..].join(" ")).await?;
            Ok(0)
        })
    }

    #[shell_command(name = "true", usage = "true", description = "Do nothing, successfully")]
    fn cmd_true(_args: Vec<String>, _ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async { Ok(0) })
    }

    #[shell_command(name = ":", usage = ": [ARG]...", description = "Do nothing, successfully")]
    fn cmd_colon(_args: Vec<String>, _ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async { Ok(0) })
    }

    #[shell_command(name = "false", usage = "false", description = "Do nothing, unsuccessfully")]
    fn cmd_false(_args: Vec<String>, _ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async { Ok(1) })
    }

    /// pwd - print working directory
    #[shell_command(
        name = "pwd",
        usage = "pwd",
        description = "Print the current namespace directory"
    )]
    fn cmd_pwd(_args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            ctx.write_text(ctx.session().cwd()).await?;
            Ok(0)
        })
    }

    /// cd - change the namespace directory
    #[shell_command(
        name = "cd",
        usage = "cd [PATH]",
        description = "Change the current namespace directory (default /home)"
    )]
    fn cmd_cd(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let session = ctx.session();
            let target = args.get(1).map(String::as_str).unwrap_or("/home");
            let segments = namespace::resolve(&session.cwd(), target);
            if !namespace::is_container(session, &segments) {
                return Err(ShellError::command(
                    format!("cd: {}: not a directory", target),
                    1,
                ));
            }
            session.set_cwd(namespace::to_path(&segments));
            Ok(0)
        })
    }

    /// sleep - wait, honouring STOP/CONT
    #[shell_command(
        name = "sleep",
        usage = "sleep SECONDS",
        description = "Pause for SECONDS (fractions allowed); time spent stopped does not count"
    )]
    fn cmd_sleep(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let operand = args
                .get(1)
                .ok_or_else(|| ShellError::command("sleep: missing operand", 1))?;
            let secs: f64 = operand
                .parse()
                .ok()
                .filter(|s: &f64| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    ShellError::command(format!("sleep: invalid time interval '{}'", operand), 1)
                })?;

            let process = ctx.process();
            let deadline = Rc::new(Cell::new(Instant::now() + Duration::from_secs_f64(secs)));
            let stopped_at: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));
            let active = Rc::new(Cell::new(true));

            {
                let (active, stopped_at) = (active.clone(), stopped_at.clone());
                process.on_suspend(move || {
                    if !active.get() {
                        return HookOutcome::Done;
                    }
                    stopped_at.set(Some(Instant::now()));
                    HookOutcome::Keep
                });
            }
            {
                let (active, deadline) = (active.clone(), deadline.clone());
                process.on_resume(move || {
                    if !active.get() {
                        return HookOutcome::Done;
                    }
                    if let Some(at) = stopped_at.take() {
                        deadline.set(deadline.get() + at.elapsed());
                    }
                    HookOutcome::Keep
                });
            }

            let result = loop {
                let target = deadline.get();
                if let Err(err) = process.guard(tokio::time::sleep_until(target)).await {
                    break Err(err);
                }
                // a resume may have pushed the deadline out
                if deadline.get() == target {
                    break Ok(0);
                }
            };
            active.set(false);
            result
        })
    }

    /// read - take one item from stdin
    #[shell_command(
        name = "read",
        usage = "read [NAME]",
        description = "Read one item from stdin into NAME, or copy it to stdout"
    )]
    fn cmd_read(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let opts = ReadOpts {
                exactly_one: true,
                forward_chunks: false,
            };
            let value = match ctx.read(opts).await? {
                ReadResult::Data(item) => item.into_values().into_iter().next().unwrap_or(Value::Null),
                ReadResult::Eof => return Ok(1),
            };
            match args.get(1) {
                Some(name) => ctx.session().assign_var(ctx.process(), name, value),
                None => ctx.write(Item::Value(value)).await?,
            }
            Ok(0)
        })
    }

    /// cat - copy stdin to stdout
    #[shell_command(name = "cat", usage = "cat", description = "Copy stdin to stdout")]
    fn cmd_cat(_args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            copy_input(ctx.frame()).await?;
            Ok(0)
        })
    }

    #[shell_command(
        name = "history",
        usage = "history",
        description = "List previously entered lines, oldest first"
    )]
    fn cmd_history(_args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let lines: Vec<String> = ctx
                .session()
                .history()
                .lines()
                .enumerate()
                .map(|(i, line)| format!("{:>5}  {}", i + 1, line))
                .collect();
            for line in lines {
                ctx.write_text(line).await?;
            }
            Ok(0)
        })
    }

    /// test - evaluate a conditional expression
    #[shell_command(
        name = "test",
        usage = "test EXPRESSION",
        description = "Evaluate a conditional expression"
    )]
    fn cmd_test(args: Vec<String>, _ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move { conditional("test", &args[1..]) })
    }

    #[shell_command(
        name = "[",
        usage = "[ EXPRESSION ]",
        description = "Evaluate a conditional expression"
    )]
    fn cmd_bracket(args: Vec<String>, _ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            match args[1..].split_last() {
                Some((last, expr)) if last == "]" => conditional("[", expr),
                _ => Err(ShellError::command("[: missing `]'", 2)),
            }
        })
    }

    #[shell_command(name = "clear", usage = "clear", description = "Clear the terminal")]
    fn cmd_clear(_args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            ctx.session().terminal().send(ShellToUi::Clear);
            Ok(0)
        })
    }

    #[shell_command(name = "help", usage = "help", description = "List builtin commands")]
    fn cmd_help(_args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            for (name, description) in ShellCommands::describe() {
                ctx.write_text(format!("{:<10} {}", name, description)).await?;
            }
            Ok(0)
        })
    }
}

fn conditional(name: &str, expr: &[String]) -> Result<i32, ShellError> {
    match testexpr::evaluate(expr, Dialect::Posix) {
        Ok(true) => Ok(0),
        Ok(false) => Ok(1),
        Err(msg) => Err(ShellError::command(format!("{}: {}", name, msg), 2)),
    }
}
