use std::time::Duration;

use serde_json::json;

use super::*;
use crate::action::ExecuteProcess;
use crate::condition::Condition;
use crate::context::WritePolicy;
use crate::description::FnSource;
use crate::handler::{Body, OnAllExited, OnEvent, OnProcessIo, OnShutdown, Target};
use crate::substitution::Substitution;
use launchpad_process::{ExitStatus, OutputMode};

fn config() -> LaunchConfig {
    LaunchConfig {
        handle_signals: false,
        grace_period_secs: 2.0,
        ..Default::default()
    }
}

async fn run(actions: Vec<Action>) -> LaunchReport {
    run_with(actions, config(), &[]).await
}

async fn run_with(actions: Vec<Action>, config: LaunchConfig, args: &[(&str, &str)]) -> LaunchReport {
    let executor = Executor::new(config).with_launch_arguments(args.iter().copied());
    drive(executor, actions).await
}

async fn drive(executor: Executor, actions: Vec<Action>) -> LaunchReport {
    tokio::time::timeout(Duration::from_secs(20), executor.run(Description::from(actions)))
        .await
        .expect("launch did not finish")
}

fn ping() -> Action {
    Action::emit(EventKind::Custom {
        kind: "ping".into(),
        payload: serde_json::Value::Null,
    })
}

fn failing_source() -> FnSource {
    FnSource::new("broken", |_| Err(LaunchError::Config("cannot parse".into())))
}

fn log_position(report: &LaunchReport, line: &str) -> Option<usize> {
    report.position(|e| matches!(e, TimelineEntry::Log { line: l } if l == line))
}

fn event_position(report: &LaunchReport, name: &str) -> Option<usize> {
    report.position(|e| matches!(e, TimelineEntry::Event { name: n, .. } if n == name))
}

// ---------------------------------------------------------------------------
// Arguments and substitution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn launch_argument_and_default_are_interpolated() {
    let report = run_with(
        vec![
            Action::declare("who"),
            Action::declare_with_default("where", "home"),
            Action::log("$who is at $where"),
        ],
        config(),
        &[("who", "ana")],
    )
    .await;
    assert_eq!(report.log_lines(), vec!["ana is at home"]);
    assert_eq!(report.exit_code(), 0);
    assert!(report.unused_arguments.is_empty());
}

#[tokio::test]
async fn reading_argument_without_default_or_override_fails_the_reader() {
    let report = run(vec![
        Action::declare("needed"),
        Action::log("value: $needed"),
        Action::log("sibling still runs"),
    ])
    .await;
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, "log");
    assert_eq!(report.errors[0].kind, "substitution_resolution");
    assert_eq!(report.log_lines(), vec!["sibling still runs"]);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn conflicting_redeclaration_fails_identical_is_idempotent() {
    let report = run(vec![
        Action::declare_with_default("rate", "10"),
        Action::declare_with_default("rate", "10"),
        Action::declare_with_default("rate", "20"),
        Action::log("rate=$rate"),
    ])
    .await;
    let declares = report.records_of("declare_argument");
    assert_eq!(declares[0].state, ActionState::Completed);
    assert_eq!(declares[1].state, ActionState::Completed);
    assert!(declares[2].failure().is_some());
    assert_eq!(report.errors[0].kind, "duplicate_argument");
    assert_eq!(report.log_lines(), vec!["rate=10"]);
}

#[tokio::test]
async fn redeclaring_after_group_exit_rebinds_the_default() {
    let report = run(vec![
        Action::group(vec![Action::declare_with_default("rate", "10")]),
        Action::declare_with_default("rate", "10"),
        Action::log("rate=$rate"),
    ])
    .await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.log_lines(), vec!["rate=10"]);
}

#[tokio::test]
async fn unused_launch_arguments_are_reported() {
    let report = run_with(
        vec![Action::declare("used")],
        config(),
        &[("used", "1"), ("stray", "2")],
    )
    .await;
    assert_eq!(report.unused_arguments, vec!["stray".to_string()]);
    assert_eq!(report.exit_code(), 0);
}
#[tokio::test]
async fn command_substitution_on_current_thread_runtime() {
    let report = run(vec![Action::log(Substitution::command("echo plain"))]).await;
    assert_eq!(report.log_lines(), vec!["plain"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_command_substitution_leaves_other_tasks_running() {
    let ticker = tokio::spawn(async {
        let mut ticks = 0;
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ticks += 1;
        }
        ticks
    });
    let report = run(vec![Action::log(Substitution::command("sleep 0.3; echo slow"))]).await;
    assert_eq!(report.log_lines(), vec!["slow"]);
    assert_eq!(ticker.await.unwrap(), 5);
}

// ---------------------------------------------------------------------------
// Conditions and scoping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn false_condition_group_has_no_side_effects() {
    let group = Action::group(vec![
        Action::declare_with_default("inner", "1"),
        Action::execute(ExecuteProcess::new(["sleep", "0"])),
        ping(),
        Action::log("inside"),
    ])
    .when(Condition::if_true("false"));

    let report = run(vec![
        group,
        Action::opaque(|ctx| {
            Ok(vec![Action::log(format!(
                "inner declared: {}",
                ctx.argument("inner").is_some()
            ))])
        }),
    ])
    .await;

    assert_eq!(report.log_lines(), vec!["inner declared: false"]);
    assert!(report.events().is_empty());
    assert!(report.records_of("execute_process").is_empty());
    let group = &report.records_of("group")[0];
    assert_eq!(
        group.history,
        vec![
            ActionState::Pending,
            ActionState::EvaluatingCondition,
            ActionState::Skipped
        ]
    );
}

#[tokio::test]
async fn condition_error_fails_the_action() {
    let report = run(vec![Action::log("x").when(Condition::if_true("maybe"))]).await;
    assert_eq!(report.errors[0].kind, "condition_evaluation");
    assert!(report.log_lines().is_empty());
}

#[tokio::test]
async fn scopes_are_balanced_after_a_failed_group() {
    let report = run(vec![
        Action::group(vec![
            Action::set("x", "inner"),
            Action::include(failing_source()),
            Action::log("never"),
        ]),
        Action::opaque(|ctx| {
            Ok(vec![Action::log(format!(
                "depth {} x bound: {}",
                ctx.depth(),
                ctx.lookup("x").is_some()
            ))])
        }),
    ])
    .await;

    assert_eq!(report.log_lines(), vec!["depth 1 x bound: false"]);
    let group = &report.records_of("group")[0];
    assert!(group.failure().is_some());
    let skipped = &report.records_of("log")[0];
    assert_eq!(skipped.state, ActionState::Skipped);
    assert_eq!(skipped.note.as_deref(), Some("enclosing group failed"));
}

#[tokio::test]
async fn optional_include_failure_stays_local() {
    let report = run(vec![Action::group(vec![
        Action::include(failing_source()).optional(),
        Action::log("still here"),
    ])])
    .await;
    assert_eq!(report.log_lines(), vec!["still here"]);
    assert_eq!(report.records_of("group")[0].state, ActionState::Completed);
    assert_eq!(report.errors[0].kind, "include_failed");
}

#[tokio::test]
async fn include_arguments_are_scoped_to_the_include() {
    let included = Description::new().with(Action::log("robot=$robot"));
    let report = run(vec![
        Action::set("name", "r2"),
        Action::include_with(included, [("robot", "$name")]),
        Action::log(Substitution::var_or("robot", "unbound")),
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["robot=r2", "unbound"]);
}

#[tokio::test]
async fn group_bindings_shadow_outer_and_set_global_escapes() {
    let report = run(vec![
        Action::set("mode", "outer"),
        Action::group_with(
            [("mode", "inner")],
            vec![
                Action::log("in group: $mode"),
                Action::set("local", "gone"),
                Action::set_global("kept", "yes"),
            ],
        ),
        Action::log("after: $mode"),
        Action::log(Substitution::var_or("local", "unbound")),
        Action::log("kept=$kept"),
    ])
    .await;
    assert_eq!(
        report.log_lines(),
        vec!["in group: inner", "after: outer", "unbound", "kept=yes"]
    );
}

#[tokio::test]
async fn opaque_function_sees_context_at_activation() {
    let report = run(vec![
        Action::set("count", "3"),
        Action::opaque(|ctx| {
            let n: usize = ctx.get_text("count")?.parse().unwrap_or(0);
            Ok((0..n).map(|i| Action::log(format!("item {i}"))).collect())
        }),
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["item 0", "item 1", "item 2"]);
}

#[tokio::test]
async fn structured_values_interpolate_as_json() {
    let report = run(vec![
        Action::set_structured("params", json!({"rate": 5})),
        Action::log("params=$params"),
        Action::unset("params"),
        Action::log(Substitution::var_or("params", "none")),
    ])
    .await;
    assert_eq!(report.log_lines(), vec![r#"params={"rate":5}"#, "none"]);
}

// ---------------------------------------------------------------------------
// Events and handlers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handlers_run_in_registration_order() {
    let report = run(vec![
        Action::register_handler(OnEvent::custom("ping", vec![Action::log("h1")])),
        Action::register_handler(OnEvent::custom("ping", vec![Action::log("h2")])),
        ping(),
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["h1", "h2"]);
    assert_eq!(report.events(), vec!["ping"]);
}

#[tokio::test]
async fn handler_registered_during_dispatch_does_not_see_that_event() {
    let inner = OnEvent::custom("ping", vec![Action::log("h2")]);
    let outer = OnEvent::custom(
        "ping",
        vec![Action::log("h1"), Action::register_handler(inner)],
    )
    .once();
    let report = run(vec![Action::register_handler(outer), ping(), ping()]).await;
    assert_eq!(report.log_lines(), vec!["h1", "h2"]);
}

#[tokio::test]
async fn conflicting_writes_in_one_turn_follow_write_policy() {
    let actions = || {
        vec![
            Action::register_handler(OnEvent::custom("ping", vec![Action::set("v", "h1")])),
            Action::register_handler(OnEvent::custom("ping", vec![Action::set("v", "h2")])),
            Action::register_handler(OnEvent::custom("check", vec![Action::log("v=$v")])),
            ping(),
            Action::emit(EventKind::Custom {
                kind: "check".into(),
                payload: serde_json::Value::Null,
            }),
        ]
    };

    let last = run(actions()).await;
    assert_eq!(last.log_lines(), vec!["v=h2"]);

    let first = run_with(
        actions(),
        LaunchConfig {
            write_policy: WritePolicy::FirstWins,
            ..config()
        },
        &[],
    )
    .await;
    assert_eq!(first.log_lines(), vec!["v=h1"]);
    let dropped = first
        .records_of("set_variable")
        .into_iter()
        .filter(|r| r.note.as_deref() == Some("dropped by write policy"))
        .count();
    assert_eq!(dropped, 1);
}

#[tokio::test]
async fn once_and_unregister() {
    let report = run(vec![
        Action::register_handler(OnEvent::custom("ping", vec![Action::log("once")]).once()),
        Action::register_handler(OnEvent::custom("ping", vec![Action::log("named")]).named("n")),
        ping(),
        Action::unregister_handler("n"),
        ping(),
    ])
    .await;
    // both pings are dispatched after the unregister action ran
    assert_eq!(report.log_lines(), vec!["once"]);
}

#[tokio::test]
async fn handler_function_body_reads_current_event() {
    let handler = OnEvent::custom(
        "greet",
        Body::function(|event, _ctx| {
            let who = match &event.kind {
                EventKind::Custom { payload, .. } => payload["who"].as_str().unwrap_or("?").to_string(),
                _ => "?".to_string(),
            };
            Ok(vec![Action::log(format!("hello {who}"))])
        }),
    );
    let report = run(vec![
        Action::register_handler(handler),
        Action::emit(EventKind::Custom {
            kind: "greet".into(),
            payload: json!({"who": "ana"}),
        }),
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["hello ana"]);
}

#[tokio::test]
async fn failing_handler_is_reported_and_others_still_run() {
    let report = run(vec![
        Action::register_handler(
            OnEvent::custom("ping", Body::function(|_, ctx| ctx.get_text("nope").map(|_| vec![])))
                .named("broken"),
        ),
        Action::register_handler(OnEvent::custom("ping", vec![Action::log("ok")])),
        ping(),
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["ok"]);
    assert_eq!(report.errors[0].kind, "handler");
    assert!(report.errors[0].message.contains("broken"));
    assert_eq!(report.exit_code(), 0);
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn process_exit_then_on_exit_exactly_once() {
    let report = run(vec![Action::execute(
        ExecuteProcess::new(["sleep", "0"]).on_exit(vec![Action::log("done")]),
    )])
    .await;

    assert_eq!(report.events(), vec!["process_started", "process_exited"]);
    assert_eq!(report.log_lines(), vec!["done"]);
    assert!(event_position(&report, "process_exited") < log_position(&report, "done"));

    let record = &report.records_of("execute_process")[0];
    assert_eq!(record.state, ActionState::Completed);
    assert_eq!(record.note.as_deref(), Some("exit code 0"));
}

#[tokio::test]
async fn sleep_then_shutdown_from_on_exit() {
    let report = run_with(
        vec![
            Action::declare_with_default("duration", "10"),
            Action::execute(
                ExecuteProcess::new(["sleep", "$duration"])
                    .on_exit(vec![Action::log("done"), Action::shutdown()]),
            ),
        ],
        config(),
        &[("duration", "0")],
    )
    .await;

    assert_eq!(report.log_lines(), vec!["done"]);
    assert_eq!(report.shutdown_reason.as_deref(), Some("shutdown action"));
    assert!(event_position(&report, "process_exited") < log_position(&report, "done"));
    assert!(log_position(&report, "done") < event_position(&report, "shutdown_requested"));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.signals_sent, 0);
}

#[tokio::test]
async fn on_exit_sees_bindings_from_spawn_time() {
    let report = run(vec![Action::group_with(
        [("tag", "worker")],
        vec![Action::execute(
            ExecuteProcess::new(["true"]).on_exit(vec![Action::log("$tag finished")]),
        )],
    )])
    .await;
    assert_eq!(report.log_lines(), vec!["worker finished"]);
}

#[tokio::test]
async fn nonzero_exit_is_not_an_engine_failure() {
    let report = run_with(
        vec![Action::execute(ExecuteProcess::new(["sh", "-c", "exit 3"]))],
        LaunchConfig {
            failure_policy: FailurePolicy::FailFast,
            ..config()
        },
        &[],
    )
    .await;
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.records_of("execute_process")[0].note.as_deref(),
        Some("exit code 3")
    );
}

#[tokio::test]
async fn missing_executable_is_a_spawn_failure() {
    let report = run(vec![
        Action::execute(ExecuteProcess::new(["launchpad-definitely-missing-binary"])),
        Action::log("continues"),
    ])
    .await;
    assert_eq!(report.errors[0].kind, "process_spawn");
    assert_eq!(report.log_lines(), vec!["continues"]);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn output_lines_become_events_and_captured_output() {
    let report = run(vec![
        Action::register_handler(
            OnProcessIo::new(Target::Name("greeter".into()), vec![Action::log("saw greeting")])
                .containing("hello"),
        ),
        Action::execute(
            ExecuteProcess::new(["echo", "hello"])
                .name("greeter")
                .output(OutputMode::Capture),
        ),
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["saw greeting"]);
    assert_eq!(report.captured_lines("greeter"), vec!["hello"]);
    assert!(event_position(&report, "process_output") < event_position(&report, "process_exited"));
}

#[tokio::test]
async fn environment_overrides_reach_the_process() {
    let report = run(vec![
        Action::set_env("LAUNCHPAD_TEST_GREETING", "bonjour"),
        Action::execute(
            ExecuteProcess::new(["sh", "-c", "echo $${LAUNCHPAD_TEST_GREETING}"])
                .name("env-reader")
                .output(OutputMode::Capture),
        ),
        Action::execute(
            ExecuteProcess::new(["sh", "-c", "echo $${ONLY}-$${LAUNCHPAD_TEST_GREETING:-unset}"])
                .name("replaced")
                .env("ONLY", "1")
                .output(OutputMode::Capture),
        ),
    ])
    .await;
    assert_eq!(report.captured_lines("env-reader"), vec!["bonjour"]);
    assert_eq!(report.captured_lines("replaced"), vec!["1-unset"]);
}

#[tokio::test]
async fn all_exited_handler_fires_once_both_exit() {
    let a = Action::execute(ExecuteProcess::new(["sleep", "0"]));
    let b = Action::execute(ExecuteProcess::new(["sleep", "0.1"]));
    let report = run(vec![
        Action::register_handler(OnAllExited::new([a.id, b.id], vec![Action::log("all exited")])),
        a,
        b,
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["all exited"]);
    let exits: Vec<usize> = report
        .timeline
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, TimelineEntry::Event { name, .. } if name == "process_exited"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(exits.len(), 2);
    assert!(log_position(&report, "all exited") > Some(exits[1]));
}

#[tokio::test]
async fn respawn_restarts_until_shutdown() {
    let worker = Action::execute(ExecuteProcess::new(["sleep", "0.05"]).respawn(0.0));
    let worker_id = worker.id;
    let report = run(vec![
        worker,
        Action::timer("0.4", vec![Action::shutdown_because("enough")]),
    ])
    .await;

    let starts = report.records_for(worker_id).len();
    assert!(starts >= 2, "expected respawns, got {starts} starts");
    assert_eq!(report.shutdown_reason.as_deref(), Some("enough"));
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn delayed_respawn_is_cancelled_by_shutdown() {
    let report = run(vec![
        Action::execute(ExecuteProcess::new(["true"]).respawn(5.0)),
        Action::timer("0.2", vec![Action::shutdown()]),
    ])
    .await;
    assert_eq!(report.records_of("execute_process").len(), 1);
    assert_eq!(report.exit_code(), 0);
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timer_fires_with_scheduling_bindings() {
    let report = run(vec![Action::group_with(
        [("who", "timer")],
        vec![Action::timer("0.05", vec![Action::log("hello from $who")])],
    )])
    .await;
    assert_eq!(report.log_lines(), vec!["hello from timer"]);
    assert_eq!(report.events(), vec!["timer_elapsed"]);
    assert_eq!(report.records_of("timer")[0].state, ActionState::Completed);
}

#[tokio::test]
async fn timers_cancelled_on_shutdown_never_fire() {
    let report = tokio::time::timeout(
        Duration::from_secs(3),
        Executor::new(config()).run(Description::from(vec![
            Action::timer("0.05", vec![Action::shutdown()]),
            Action::timer("30", vec![Action::log("late")]),
        ])),
    )
    .await
    .expect("cancelled timer kept the run alive");
    assert!(report.log_lines().is_empty());
    let timers = report.records_of("timer");
    assert_eq!(timers[1].note.as_deref(), Some("cancelled by shutdown"));
}

#[tokio::test]
async fn kept_timer_fires_during_shutdown() {
    let report = run(vec![
        Action::timer("0.3", vec![Action::log("cleanup tick")]).keep_on_shutdown(),
        Action::shutdown(),
    ])
    .await;
    assert_eq!(report.log_lines(), vec!["cleanup tick"]);
}

#[tokio::test]
async fn timer_in_failed_group_is_cancelled() {
    let report = run(vec![Action::group(vec![
        Action::timer("0.1", vec![Action::log("tick")]),
        Action::include(failing_source()),
    ])])
    .await;
    assert!(report.log_lines().is_empty());
    assert_eq!(
        report.records_of("timer")[0].note.as_deref(),
        Some("owning group failed")
    );
}

#[tokio::test]
async fn invalid_timer_period_fails_the_timer() {
    let report = run(vec![Action::timer("soon", vec![Action::log("never")])]).await;
    assert_eq!(report.errors[0].kind, "substitution_resolution");
    assert!(report.log_lines().is_empty());
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_shutdown_requests_do_not_restart_termination() {
    let report = run(vec![
        Action::register_handler(OnShutdown::new(vec![Action::log("shutting down")])),
        Action::execute(ExecuteProcess::new(["sleep", "30"])),
        Action::timer(
            "0.2",
            vec![
                Action::shutdown_because("first"),
                Action::emit(EventKind::ShutdownRequested {
                    reason: "second".into(),
                    due_to_signal: false,
                }),
                Action::shutdown_because("third"),
            ],
        ),
    ])
    .await;

    assert_eq!(report.signals_sent, 1);
    assert_eq!(report.shutdown_reason.as_deref(), Some("first"));
    assert_eq!(report.log_lines(), vec!["shutting down"]);
    let shutdowns = report
        .events()
        .into_iter()
        .filter(|e| *e == "shutdown_requested")
        .count();
    assert_eq!(shutdowns, 1);
    let shutdown_records = report.records_of("shutdown");
    assert_eq!(shutdown_records[1].note.as_deref(), Some("already shutting down"));
    assert!(!report.forced);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn processes_are_not_started_once_shutting_down() {
    let report = run(vec![
        Action::shutdown(),
        Action::execute(ExecuteProcess::new(["sleep", "0"])),
    ])
    .await;
    let record = &report.records_of("execute_process")[0];
    assert_eq!(record.state, ActionState::Skipped);
    assert!(!report.events().contains(&"process_started"));
}

#[tokio::test]
async fn grace_period_elapsing_kills_and_exits_nonzero() {
    let report = run_with(
        vec![
            Action::execute(
                ExecuteProcess::new(["sh", "-c", "trap '' TERM; exec sleep 30"])
                    .output(OutputMode::Discard),
            ),
            Action::timer("0.3", vec![Action::shutdown()]),
        ],
        LaunchConfig {
            grace_period_secs: 0.3,
            ..config()
        },
        &[],
    )
    .await;
    assert!(report.forced);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.signals_sent, 2);
}

#[tokio::test]
async fn fail_fast_turns_first_failure_into_shutdown() {
    let report = run_with(
        vec![
            Action::log("$undefined"),
            Action::execute(ExecuteProcess::new(["sleep", "30"])),
        ],
        LaunchConfig {
            failure_policy: FailurePolicy::FailFast,
            ..config()
        },
        &[],
    )
    .await;
    assert_eq!(report.exit_code(), 1);
    assert!(report.fatal.as_deref().unwrap_or("").contains("undefined"));
    assert!(report
        .shutdown_reason
        .as_deref()
        .unwrap_or("")
        .starts_with("fail-fast"));
    assert_eq!(
        report.records_of("execute_process")[0].state,
        ActionState::Skipped
    );
}

#[tokio::test]
async fn interrupt_requests_shutdown_due_to_signal() {
    let executor = Executor::new(config());
    let tx = executor.tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tx.send(LoopMessage::Interrupt);
    });
    let report = drive(
        executor,
        vec![
            Action::register_handler(OnEvent::matching(
                |e| matches!(e.kind, EventKind::ShutdownRequested { due_to_signal: true, .. }),
                vec![Action::log("signalled")],
            )),
            Action::execute(ExecuteProcess::new(["sleep", "30"])),
        ],
    )
    .await;
    assert_eq!(report.shutdown_reason.as_deref(), Some("interrupted"));
    assert_eq!(report.log_lines(), vec!["signalled"]);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn second_interrupt_kills_immediately() {
    let executor = Executor::new(LaunchConfig {
        grace_period_secs: 30.0,
        ..config()
    });
    let tx = executor.tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = tx.send(LoopMessage::Interrupt);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(LoopMessage::Interrupt);
    });
    let report = drive(
        executor,
        vec![Action::execute(
            ExecuteProcess::new(["sh", "-c", "trap '' TERM; exec sleep 30"])
                .output(OutputMode::Discard),
        )],
    )
    .await;
    assert!(report.forced);
    assert_eq!(report.exit_code(), 1);
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn journal_records_full_lifecycle() {
    let report = run(vec![
        Action::log("yes").when(Condition::equals("a", "a")),
        Action::log("plain"),
    ])
    .await;
    let logs = report.records_of("log");
    assert_eq!(
        logs[0].history,
        vec![
            ActionState::Pending,
            ActionState::EvaluatingCondition,
            ActionState::Activated,
            ActionState::Running,
            ActionState::Completed,
        ]
    );
    assert_eq!(logs[1].history.len(), 4);
    assert!(logs.iter().all(|r| r.finished_at.is_some()));
}

#[test]
fn parse_period_rejects_negative_and_text() {
    assert_eq!(parse_period(" 0.5 ").unwrap(), Duration::from_millis(500));
    assert!(parse_period("-1").is_err());
    assert!(parse_period("later").is_err());
}

#[test]
fn default_process_names_use_the_program_basename() {
    assert_eq!(default_process_name(Some("/usr/bin/sleep"), 3), "sleep-3");
    assert_eq!(default_process_name(None, 1), "process-1");
}

#[test]
fn exit_status_display_matches_journal_notes() {
    assert_eq!(ExitStatus::from_code(0).to_string(), "exit code 0");
}
