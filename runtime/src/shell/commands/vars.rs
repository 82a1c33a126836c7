//! Variable and namespace builtins: get, set, ls, declare, local, unset,
//! source, persist

use futures_lite::future::BoxedLocal;
use serde_json::{Map, Value};
use shell_macros::{shell_command, shell_commands};
use std::rc::Rc;

use super::{make_parser, usage_error, CommandContext};
use crate::shell::devices::Item;
use crate::shell::error::{ParseError, ShellError};
use crate::shell::executor::{run_child_tree, Scope};
use crate::shell::namespace;
use crate::shell::parser;
use crate::shell::reconstruct::multi_line;
use crate::shell::word::is_name;

/// Variable commands - the namespace seen through builtins.
pub struct VarCommands;

#[shell_commands]
impl VarCommands {
    /// get - print values at paths
    #[shell_command(
        name = "get",
        usage = "get PATH...",
        description = "Write the value at each PATH (e.g. x, /home/a.b, /proc/0) to stdout"
    )]
    fn cmd_get(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let session = ctx.session();
            let mut code = 0;
            for path in &args[1..] {
                let segments = namespace::resolve(&session.cwd(), path);
                match lookup(&ctx, path, &segments) {
                    Some(value) => ctx.write(Item::Value(value)).await?,
                    None => {
                        ctx.warn(format!("get: {}: not found", path)).await;
                        code = 1;
                    }
                }
            }
            Ok(code)
        })
    }

    /// set - store a value at a path
    #[shell_command(
        name = "set",
        usage = "set PATH VALUE",
        description = "Store VALUE (parsed as JSON, else kept as a string) at PATH under /home"
    )]
    fn cmd_set(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let [_, path, raw] = args.as_slice() else {
                return Err(ShellError::command("set: usage: set PATH VALUE", 2));
            };
            let value = parse_value(raw);
            let session = ctx.session();
            let segments = namespace::resolve(&session.cwd(), path);
            namespace::assign(session, &segments, value)
                .map_err(|e| ShellError::command(format!("set: {}", e), 1))?;
            Ok(0)
        })
    }

    /// ls - list keys under a path
    #[shell_command(
        name = "ls",
        usage = "ls [PATH]",
        description = "List the keys under PATH (default: current directory)"
    )]
    fn cmd_ls(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let session = ctx.session();
            let path = args.get(1).map(String::as_str).unwrap_or(".");
            let segments = namespace::resolve(&session.cwd(), path);
            let keys = namespace::list(session, &segments).ok_or_else(|| {
                ShellError::command(format!("ls: {}: not a directory", path), 1)
            })?;
            for key in keys {
                ctx.write_text(key).await?;
            }
            Ok(0)
        })
    }

    /// declare - show variables and functions
    #[shell_command(
        name = "declare",
        usage = "declare [-f | -F | -x | -p] [NAME]...",
        description = "Show variables and functions: -f function bodies, -F function names, -x variables only, -p as re-usable declarations"
    )]
    fn cmd_declare(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let mut opts = DeclareOpts::default();
            let mut names = Vec::new();
            let mut parser = make_parser(&args);
            while let Some(arg) = parser.next().map_err(|e| usage_error("declare", e))? {
                match arg {
                    lexopt::Arg::Short('f') => opts.functions = true,
                    lexopt::Arg::Short('F') => opts.function_names = true,
                    lexopt::Arg::Short('x') => opts.variables = true,
                    lexopt::Arg::Short('p') => opts.print = true,
                    lexopt::Arg::Value(v) => names.push(v.to_string_lossy().into_owned()),
                    other => return Err(usage_error("declare", other.unexpected())),
                }
            }
            if !(opts.functions || opts.function_names || opts.variables) {
                opts.functions = true;
                opts.variables = true;
            }
            let wanted = |name: &str| names.is_empty() || names.iter().any(|n| n == name);

            let mut lines = Vec::new();
            if opts.variables {
                for (name, value) in visible_vars(&ctx) {
                    if wanted(&name) {
                        lines.push(declaration(&name, &value, opts.print)?);
                    }
                }
            }
            if opts.functions || opts.function_names {
                for (name, def) in ctx.session().functions() {
                    if !wanted(&name) {
                        continue;
                    }
                    if opts.function_names {
                        lines.push(format!("declare -f {}", name));
                    } else {
                        let body = multi_line(&def.body, def.body.root());
                        lines.push(format!("{}() {}", name, body));
                    }
                }
            }
            for line in lines {
                ctx.write_text(line).await?;
            }
            Ok(0)
        })
    }

    /// local - declare function-local variables
    #[shell_command(
        name = "local",
        usage = "local NAME[=VALUE]...",
        description = "Create variables visible only to the current function and its children"
    )]
    fn cmd_local(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            if ctx.frame().tree.ctx().call_stack.is_empty() {
                return Err(ShellError::command("local: can only be used in a function", 1));
            }
            for arg in &args[1..] {
                let (name, value) = match arg.split_once('=') {
                    Some((name, value)) => (name, value),
                    None => (arg.as_str(), ""),
                };
                if !is_name(name) {
                    return Err(ShellError::command(
                        format!("local: `{}': not a valid identifier", arg),
                        1,
                    ));
                }
                ctx.process().set_local(name, Value::String(value.to_string()));
            }
            Ok(0)
        })
    }

    /// unset - remove variables or functions
    #[shell_command(
        name = "unset",
        usage = "unset [-f] NAME...",
        description = "Remove variables, or functions with -f"
    )]
    fn cmd_unset(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let mut functions = false;
            let mut names = Vec::new();
            let mut parser = make_parser(&args);
            while let Some(arg) = parser.next().map_err(|e| usage_error("unset", e))? {
                match arg {
                    lexopt::Arg::Short('f') => functions = true,
                    lexopt::Arg::Short('v') => functions = false,
                    lexopt::Arg::Value(v) => names.push(v.to_string_lossy().into_owned()),
                    other => return Err(usage_error("unset", other.unexpected())),
                }
            }
            let session = ctx.session();
            for name in names {
                if functions {
                    session.remove_function(&name);
                } else {
                    session.unset_var(ctx.process(), &name);
                }
            }
            Ok(0)
        })
    }

    /// source - run the script held in a variable
    #[shell_command(
        name = "source",
        usage = "source NAME [ARG]...",
        description = "Run the shell source stored in variable NAME with ARGs as positionals"
    )]
    fn cmd_source(args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            let name = args
                .get(1)
                .ok_or_else(|| ShellError::command("source: filename argument required", 2))?;
            let frame = ctx.frame();
            let segments = namespace::resolve(&frame.session.cwd(), name);
            let script = match lookup(&ctx, name, &segments) {
                Some(Value::String(script)) => script,
                Some(_) => {
                    return Err(ShellError::command(format!("source: {}: not a script", name), 1))
                }
                None => return Err(ShellError::command(format!("source: {}: not found", name), 1)),
            };
            let tree = match parser::parse(&script) {
                Ok(tree) => tree,
                Err(ParseError::Incomplete) => {
                    return Err(ShellError::command(
                        format!("source: {}: unexpected end of input", name),
                        2,
                    ))
                }
                Err(err) => return Err(ShellError::command(format!("source: {}: {}", name, err), 2)),
            };
            let tree = Rc::new(tree);
            let line = args.join(" ");
            let positionals = args[2..].to_vec();
            run_child_tree(frame, tree, line, Scope::Function, Some(("source", positionals))).await
        })
    }

    #[shell_command(
        name = "persist",
        usage = "persist",
        description = "Save the /home variables to the session store"
    )]
    fn cmd_persist(_args: Vec<String>, ctx: CommandContext) -> BoxedLocal<Result<i32, ShellError>> {
        Box::pin(async move {
            ctx.session().persist();
            Ok(0)
        })
    }
}

#[derive(Default)]
struct DeclareOpts {
    functions: bool,
    function_names: bool,
    variables: bool,
    print: bool,
}

/// Plain names go through the variable tiers; anything path-like is
/// resolved in the namespace.
fn lookup(ctx: &CommandContext, raw: &str, segments: &[String]) -> Option<Value> {
    if is_name(raw) {
        if let Some(value) = ctx.session().lookup_var(ctx.process(), raw) {
            return Some(value);
        }
    }
    namespace::lookup(ctx.session(), segments)
}

/// Home scope overlaid by the process's own scope, sorted by name.
fn visible_vars(ctx: &CommandContext) -> Map<String, Value> {
    let mut vars = ctx.session().home().clone();
    for (name, value) in ctx.process().scope_snapshot() {
        vars.insert(name, value);
    }
    vars
}

/// JSON when it parses, the raw string otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// `name=value` with the value quoted so that expanding it gives it back.
fn declaration(name: &str, value: &Value, print: bool) -> Result<String, ShellError> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let quoted = shlex::try_quote(&text)
        .map_err(|e| ShellError::command(format!("declare: {}: {}", name, e), 1))?;
    Ok(if print {
        format!("declare {}={}", name, quoted)
    } else {
        format!("{}={}", name, quoted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":[1]}"), json!({"a": [1]}));
        assert_eq!(parse_value("hello world"), json!("hello world"));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
    }

    #[test]
    fn test_declaration_quotes_values() {
        assert_eq!(declaration("x", &json!("plain"), false).unwrap(), "x=plain");
        assert_eq!(
            declaration("x", &json!("two words"), true).unwrap(),
            "declare x='two words'"
        );
        assert_eq!(declaration("n", &json!([1, 2]), false).unwrap(), "n='[1,2]'");
    }
}
