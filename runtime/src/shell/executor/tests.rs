use super::*;
use crate::config::ShellConfig;
use crate::interactive::ShellToUi;
use crate::shell::commands::ShellCommands;
use crate::shell::process::{ProcessStatus, Signal};
use crate::store::MemoryStore;
use async_channel::Receiver;
use proptest::prelude::*;
use serde_json::json;
use tokio::task::LocalSet;

fn session() -> (Rc<Session>, Receiver<ShellToUi>) {
    let (tx, rx) = async_channel::unbounded();
    let session = Session::new("tty", ShellConfig::default(), Rc::new(MemoryStore::new()), tx);
    (session, rx)
}

async fn run(session: &Rc<Session>, source: &str) -> i32 {
    run_source(session, source).await.unwrap()
}

/// Output lines and error messages sent so far.
fn drain(rx: &Receiver<ShellToUi>) -> (Vec<String>, Vec<String>) {
    let mut lines = Vec::new();
    let mut errors = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            ShellToUi::Line { text } => lines.push(text),
            ShellToUi::Error { msg } => errors.push(msg),
            _ => {}
        }
    }
    (lines, errors)
}

fn output(rx: &Receiver<ShellToUi>) -> Vec<String> {
    drain(rx).0
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_exit_codes() {
    LocalSet::new()
        .run_until(async {
            let (s, _rx) = session();
            assert_eq!(run(&s, "true | false | true").await, 0);
            assert_eq!(run(&s, "false | true").await, 0);
            assert_eq!(run(&s, "true | false").await, 1);
            assert_eq!(run(&s, "! true | false").await, 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_attributed_to_its_stage() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            let tree = Rc::new(parser::parse("nonexistentcmd | true").unwrap());
            assert_eq!(run_foreground(&s, tree.clone()).await, 0);

            let stages = tree
                .ids()
                .find_map(|id| match tree.kind(id) {
                    NodeKind::Pipeline { stages, .. } => Some(stages.clone()),
                    _ => None,
                })
                .unwrap();
            assert_eq!(tree.node(stages[0]).exit_code(), Some(127));
            assert_eq!(tree.node(stages[1]).exit_code(), Some(0));

            let (_, errors) = drain(&rx);
            assert_eq!(errors, vec!["nonexistentcmd: command not found"]);
            // stage processes are reaped
            assert_eq!(s.processes().len(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_moves_items_between_stages() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            assert_eq!(run(&s, "echo one | cat | cat").await, 0);
            assert_eq!(output(&rx), vec!["one"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_killed_stage_stops_its_siblings() {
    LocalSet::new()
        .run_until(async {
            let (s, _rx) = session();
            let task = {
                let s = s.clone();
                tokio::task::spawn_local(async move { run(&s, "sleep 100 | cat").await })
            };
            tokio::time::sleep(Duration::from_secs(1)).await;
            // pid 1 is the first stage; the group is led by the last one
            let first = s.process(1).unwrap();
            assert_ne!(first.pid, first.pgid());
            s.signal(1, Signal::Term, false).unwrap();

            assert_eq!(task.await.unwrap(), 143);
            assert_eq!(s.processes().len(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_return_stops_only_its_function() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            let code = run(&s, "f() { echo a; return 3; echo b; }; f; echo after $?").await;
            assert_eq!(code, 0);
            assert_eq!(output(&rx), vec!["a", "after 3"]);

            run(&s, "g() { return 5; }; h() { g; echo in-h $?; }; h; echo $?").await;
            assert_eq!(output(&rx), vec!["in-h 5", "0"]);

            run(&s, "k() { while true; do return 4; done; }; k; echo $?").await;
            assert_eq!(output(&rx), vec!["4"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_return_outside_function() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            assert_eq!(run(&s, "return 3; echo still").await, 0);
            let (lines, errors) = drain(&rx);
            assert_eq!(lines, vec!["still"]);
            assert_eq!(errors.len(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_floor() {
    LocalSet::new()
        .run_until(async {
            let (s, _rx) = session();
            let start = Instant::now();
            let code = run(&s, "x=; while [[ $x != aaa ]]; do x=${x}a; done").await;
            assert_eq!(code, 0);
            assert!(start.elapsed() >= Duration::from_secs(3));
            assert!(start.elapsed() < Duration::from_secs(4));
            assert_eq!(s.lookup_var(&s.process(0).unwrap(), "x"), Some(json!("aaa")));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_is_interruptible_mid_sleep() {
    LocalSet::new()
        .run_until(async {
            let (s, _rx) = session();
            let start = Instant::now();
            let task = {
                let s = s.clone();
                tokio::task::spawn_local(async move { run(&s, "while true; do true; done").await })
            };
            tokio::time::sleep(Duration::from_millis(2500)).await;
            s.signal(0, Signal::Int, true).unwrap();

            assert_eq!(task.await.unwrap(), 130);
            assert!(start.elapsed() < Duration::from_secs(3));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_brace_and_substitution_fields() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "echo a{1,2}").await;
            assert_eq!(output(&rx), vec!["a1 a2"]);

            run(&s, "echo \"$(echo foo; echo bar)\"").await;
            assert_eq!(output(&rx), vec!["foo\nbar"]);

            run(&s, "echo $(echo foo; echo bar)").await;
            assert_eq!(output(&rx), vec!["foo bar"]);

            run(&s, "echo {1..3}x").await;
            assert_eq!(output(&rx), vec!["1x 2x 3x"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_killed_background_job_is_silent() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            assert_eq!(run(&s, "sleep 1 & kill $!").await, 0);
            tokio::time::sleep(Duration::from_secs(2)).await;

            let (lines, errors) = drain(&rx);
            assert!(lines.is_empty(), "{:?}", lines);
            assert!(errors.is_empty(), "{:?}", errors);
            assert_eq!(s.last_exit(true), 143);
            assert_eq!(s.processes().len(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_spares_background_jobs() {
    LocalSet::new()
        .run_until(async {
            let (s, _rx) = session();
            run(&s, "sleep 10 &").await;
            let job = s.last_bg_pid().unwrap();

            let task = {
                let s = s.clone();
                tokio::task::spawn_local(async move { run(&s, "sleep 5").await })
            };
            tokio::time::sleep(Duration::from_secs(1)).await;
            s.signal(0, Signal::Int, true).unwrap();
            assert_eq!(task.await.unwrap(), 130);
            assert_eq!(s.process(job).unwrap().status(), ProcessStatus::Running);

            run(&s, &format!("kill %{}", job)).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(s.process(job).is_none());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_stopped_sleep_extends_its_deadline() {
    LocalSet::new()
        .run_until(async {
            let (s, _rx) = session();
            run(&s, "sleep 2 &").await;
            let job = s.last_bg_pid().unwrap();

            tokio::time::sleep(Duration::from_secs(1)).await;
            run(&s, &format!("kill --STOP {}", job)).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            assert_eq!(s.process(job).unwrap().status(), ProcessStatus::Suspended);

            run(&s, &format!("kill -s CONT {}", job)).await;
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(s.process(job).is_some());

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(s.process(job).is_none());
            assert_eq!(s.last_exit(true), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_control_flow() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "for i in a b; do case $i in a) echo A;; *) echo other;; esac; done").await;
            assert_eq!(output(&rx), vec!["A", "other"]);

            run(&s, "if false; then echo no; elif true; then echo yes; else echo else; fi").await;
            assert_eq!(output(&rx), vec!["yes"]);

            run(&s, "(echo sub); { echo group; }; false || echo rescued && echo chained").await;
            assert_eq!(output(&rx), vec!["sub", "group", "rescued", "chained"]);

            assert_eq!(run(&s, "[[ abc == a* ]]").await, 0);
            assert_eq!(run(&s, "[ abc = a* ]").await, 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_variable_scopes() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "f() { local v=1; echo $v; w=2; }; f; echo \"[$v]\" $w").await;
            assert_eq!(output(&rx), vec!["1", "[] 2"]);

            run(&s, "p() { echo $# $1 $2; }; p x 'y z'").await;
            assert_eq!(output(&rx), vec!["2 x y z"]);

            run(&s, "s=abc; echo ${u:-def} ${#s} ${s:+set} ${n:=new} $n").await;
            assert_eq!(output(&rx), vec!["def 3 set new new"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_expansion_is_typed() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            assert_eq!(run(&s, "x=abc; echo ${x/a/b}").await, 2);
            let (lines, errors) = drain(&rx);
            assert!(lines.is_empty());
            assert!(errors[0].contains("not supported"), "{:?}", errors);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_redirections() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "echo hi > out; echo a >> arr; echo b >> arr").await;
            assert!(output(&rx).is_empty());
            let leader = s.process(0).unwrap();
            assert_eq!(s.lookup_var(&leader, "out"), Some(json!("hi")));
            assert_eq!(s.lookup_var(&leader, "arr"), Some(json!(["a", "b"])));

            run(&s, "echo gone > /dev/null").await;
            assert!(output(&rx).is_empty());

            assert_eq!(run(&s, "cat < somefile").await, 127);
            assert_eq!(run(&s, "nope 2> err").await, 127);
            // only the `<` rejection reached the terminal
            let (_, errors) = drain(&rx);
            assert_eq!(errors.len(), 1);
            let leader = s.process(0).unwrap();
            assert_eq!(s.lookup_var(&leader, "err"), Some(json!("nope: command not found")));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_namespace_paths() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "set cfg '{\"theme\": \"dark\"}'; cfg.theme; get cfg.theme; ls cfg").await;
            assert_eq!(output(&rx), vec!["dark", "dark", "theme"]);

            assert_eq!(run(&s, "cd cfg; pwd; cd /nope").await, 1);
            assert_eq!(output(&rx), vec!["/home/cfg"]);
            assert_eq!(run(&s, "no.such.path").await, 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_declare_and_source() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "x='a b'; declare -p x").await;
            assert_eq!(output(&rx), vec!["declare x='a b'"]);

            run(&s, "greet() { echo hi $1; }; declare -F; unset -f greet; declare -F").await;
            assert_eq!(output(&rx), vec!["declare -f greet"]);

            run(&s, "script='echo sourced $1; return 7; echo no'; source script arg; echo $?").await;
            assert_eq!(output(&rx), vec!["sourced arg", "7"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_ps_lists_leaders() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "sleep 10 | cat &").await;
            tokio::time::sleep(Duration::from_millis(10)).await;

            // header, the leader, the job and the pipeline's group leader
            run(&s, "ps").await;
            let lines = output(&rx);
            assert_eq!(lines.len(), 4, "{:?}", lines);
            assert!(lines[2].ends_with("sleep 10 | cat"), "{:?}", lines);

            run(&s, "ps -a").await;
            let lines = output(&rx);
            assert_eq!(lines.len(), 5, "{:?}", lines);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_speech_redirect_is_silent() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            assert_eq!(run(&s, "echo hello > /dev/voice").await, 0);
            assert!(output(&rx).is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_status_of_each_command() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "false; echo $?; true; echo $?").await;
            assert_eq!(output(&rx), vec!["1", "0"]);

            run(&s, "nonexistent; echo $?").await;
            assert_eq!(output(&rx), vec!["127"]);

            run(&s, "false || echo or $?; true && echo and $?").await;
            assert_eq!(output(&rx), vec!["or 1", "and 0"]);

            run(&s, "x=abc; echo ${x/a/b}; echo after $?").await;
            assert_eq!(output(&rx), vec!["after 2"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_writer_stops_when_reader_is_done() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            let start = Instant::now();
            let code = run(&s, "while true; do echo y; done | true").await;
            assert_eq!(code, 0);
            assert!(start.elapsed() < Duration::from_secs(2));
            assert_eq!(s.processes().len(), 1);

            // the late writer dies of SIGPIPE; that is not the pipeline's failure
            let tree = Rc::new(parser::parse("{ sleep 1; echo a; } | echo b").unwrap());
            assert_eq!(run_foreground(&s, tree.clone()).await, 0);
            let stages = tree
                .ids()
                .find_map(|id| match tree.kind(id) {
                    NodeKind::Pipeline { stages, .. } => Some(stages.clone()),
                    _ => None,
                })
                .unwrap();
            assert_eq!(tree.node(stages[0]).exit_code(), Some(141));
            let (lines, errors) = drain(&rx);
            assert_eq!(lines, vec!["b"]);
            assert!(errors.is_empty(), "{:?}", errors);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_huge_brace_range_stays_literal() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            assert_eq!(run(&s, "echo {1..99999999999}").await, 0);
            assert_eq!(output(&rx), vec!["{1..99999999999}"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_split_applies_to_each_brace_alternative() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "v='x y'; count() { echo $#; }; count a{1,2}$v").await;
            assert_eq!(output(&rx), vec!["4"]);
            run(&s, "echo a{1,2}$v").await;
            assert_eq!(output(&rx), vec!["a1x y a2x y"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_last_value_and_unset_defaults() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            run(&s, "set cfg '{\"n\": 1}'; cfg; echo got $_").await;
            assert_eq!(output(&rx), vec!["{\"n\":1}", "got {\"n\":1}"]);

            run(&s, "echo ${nope-def}; e=; echo \"[${e-def}]\" \"[${e:-def}]\"").await;
            assert_eq!(output(&rx), vec!["def", "[] [def]"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_history_and_help_builtins() {
    LocalSet::new()
        .run_until(async {
            let (s, rx) = session();
            s.push_history("echo one");
            s.push_history("echo two");
            assert_eq!(run(&s, "history").await, 0);
            assert_eq!(output(&rx), vec!["    1  echo one", "    2  echo two"]);

            assert_eq!(run(&s, "help").await, 0);
            let lines = output(&rx);
            assert_eq!(lines.len(), ShellCommands::describe().len());
            assert!(lines.iter().any(|l| l.starts_with("kill ")), "{:?}", lines);

            run(&s, "sleep --help").await;
            assert_eq!(output(&rx)[0], ShellCommands::show_help("sleep").unwrap());
        })
        .await;
}

fn run_blocking(source: &str) -> Vec<String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    LocalSet::new().block_on(&runtime, async {
        let (s, rx) = session();
        run(&s, source).await;
        output(&rx)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// A value printed in quoted form expands back to exactly itself.
    #[test]
    fn quoted_field_reexpands_to_itself(value in "[a-zA-Z0-9 _.,:*?{}-]{1,12}") {
        let quoted = shlex::try_quote(&value).unwrap();
        let lines = run_blocking(&format!("f() {{ echo $#; echo \"$1\"; }}; f {}", quoted));
        prop_assert_eq!(lines, vec!["1".to_string(), value]);
    }
}
