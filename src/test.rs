//! End-to-end behaviour: whole programs driven through the engine.

use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::orc::ast::{Argument as A, Definition, Expression as E};
use crate::orc::builtin::{prelude, Captured};
use crate::orc::program;
use crate::orc::value::Value;
use crate::runtime::clock::ClockId;
use crate::runtime::cohort::{Cohort, Versioned, Vote};
use crate::runtime::compiler::compile;
use crate::runtime::engine::{Engine, EngineConfig, Observer};
use crate::runtime::error::{Failure, TokenError};
use crate::runtime::site::{Site, SiteContext, SiteError, SiteRegistry, TransactionalSite};
use crate::runtime::stats::Stats;
use crate::runtime::transaction::TxnScope;

#[derive(Clone, Default)]
struct Recorder {
    published: Arc<Mutex<Vec<Value>>>,
    failures: Arc<Mutex<Vec<Failure>>>,
}

impl Observer for Recorder {
    fn publish(&mut self, value: Value) {
        self.published.lock().unwrap().push(value);
    }

    fn token_failed(&mut self, failure: &Failure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}

struct Ran {
    published: Vec<Value>,
    printed: Vec<String>,
    failures: Vec<Failure>,
    stats: Stats,
    live: usize,
}

async fn run_with(
    expression: E,
    config: EngineConfig,
    extra: impl FnOnce(&mut SiteRegistry),
) -> Ran {
    let console = Captured::new();
    let mut sites = prelude(Arc::new(console.clone()));
    extra(&mut sites);
    let compiled = Arc::new(compile(&expression, &sites).expect("program compiles"));
    let recorder = Recorder::default();
    let mut engine = Engine::new(compiled, config, recorder.clone());
    engine.run().await.expect("no core error");
    let published = recorder.published.lock().unwrap().clone();
    let failures = recorder.failures.lock().unwrap().clone();
    Ran {
        published,
        printed: console.lines(),
        failures,
        stats: engine.stats().clone(),
        live: engine.live_tokens(),
    }
}

async fn run(expression: E) -> Ran {
    run_with(expression, EngineConfig::default(), |_| {}).await
}

fn println(argument: A) -> E {
    E::site("Println", [argument])
}

fn sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

fn ints(values: &[Value]) -> Vec<i64> {
    let mut ints: Vec<i64> = values.iter().filter_map(Value::as_int).collect();
    ints.sort();
    ints
}

/// `def spin(n) = (Eq(n, 0) >b> Ift(b) >> Println("work")) | (Greater(n, 0) >b> Ift(b) >> Sub(n, 1) >m> spin(m))`
fn spin() -> Definition {
    let done = E::sequential(
        E::site("Eq", [A::var(0), A::int(0)]),
        E::sequential(E::site("Ift", [A::var(0)]), println(A::string("work"))),
    );
    let again = E::sequential(
        E::site("Greater", [A::var(0), A::int(0)]),
        E::sequential(
            E::site("Ift", [A::var(0)]),
            E::sequential(
                E::site("Sub", [A::var(2), A::int(1)]),
                E::call(A::var(4), [A::var(0)]),
            ),
        ),
    );
    Definition::new("spin", 1, E::parallel(done, again))
}

/// `TBuffer(10) >b> b.put >put> b.size >size> (body >> size())`. Inside `body`, `size` is
/// variable 0, `put` is 1 and the buffer record is 2.
fn with_buffer(body: E) -> E {
    E::sequential(
        E::site("TBuffer", [A::int(10)]),
        E::sequential(
            E::field(A::var(0), "put"),
            E::sequential(
                E::field(A::var(1), "size"),
                E::sequential(body, E::call(A::var(1), [])),
            ),
        ),
    )
}

fn put(n: i64) -> E {
    E::call(A::var(1), [A::int(n)])
}

/// `(atomic(body) ; signal)`
fn quietly(body: E) -> E {
    E::otherwise(E::atomic(body), E::value(A::signal()))
}

/// `TBuffer(10) >b> b.put >put> b.size >size> b.get >get> body`. Inside `body`, `get` is
/// variable 0, `size` is 1 and `put` is 2.
fn with_buffer_ops(body: E) -> E {
    E::sequential(
        E::site("TBuffer", [A::int(10)]),
        E::sequential(
            E::field(A::var(0), "put"),
            E::sequential(
                E::field(A::var(1), "size"),
                E::sequential(E::field(A::var(2), "get"), body),
            ),
        ),
    )
}

#[tokio::test]
async fn parallel_publications_flow_into_sequential() {
    // (1 | 2 | 3) >x> Println(x)
    let ran = run(E::sequential(
        E::any([E::int(1), E::int(2), E::int(3)]),
        println(A::var(0)),
    ))
    .await;
    assert_eq!(sorted(ran.printed), vec!["1", "2", "3"]);
    assert_eq!(ran.published, vec![Value::Signal; 3]);
    assert_eq!(ran.live, 0);
}

#[tokio::test]
async fn sequential_runs_once_per_publication() {
    // (1 | 2) >x> (x | Add(x, 10))
    let ran = run(E::sequential(
        E::parallel(E::int(1), E::int(2)),
        E::parallel(E::var(0), E::site("Add", [A::var(0), A::int(10)])),
    ))
    .await;
    assert_eq!(ints(&ran.published), vec![1, 2, 11, 12]);
}

#[tokio::test]
async fn real_timers_order_by_delay() {
    // def wait(n) = Rtimer(n) >> Println(n); wait(60) | wait(10)
    let wait = Definition::new(
        "wait",
        1,
        E::sequential(E::site("Rtimer", [A::var(0)]), println(A::var(1))),
    );
    let ran = run(E::declare(
        vec![wait],
        E::parallel(
            E::call(A::var(0), [A::int(60)]),
            E::call(A::var(0), [A::int(10)]),
        ),
    ))
    .await;
    assert_eq!(ran.printed, vec!["10", "60"]);
}

#[tokio::test]
async fn virtual_timers_order_by_delay() {
    let wait = Definition::new(
        "wait",
        1,
        E::sequential(E::site("Vtimer", [A::var(0)]), println(A::var(1))),
    );
    let ran = run(E::declare(
        vec![wait],
        E::any([
            E::call(A::var(0), [A::int(20)]),
            E::call(A::var(0), [A::int(10)]),
            E::call(A::var(0), [A::int(15)]),
        ]),
    ))
    .await;
    assert_eq!(ran.printed, vec!["10", "15", "20"]);
    assert_eq!(ran.stats.ticks, 20);
}

#[tokio::test]
async fn virtual_time_waits_for_ready_work() {
    // spin(50) | Vtimer(1) >> Println("timer")
    let ran = run(E::declare(
        vec![spin()],
        E::parallel(
            E::call(A::var(0), [A::int(50)]),
            E::sequential(E::site("Vtimer", [A::int(1)]), println(A::string("timer"))),
        ),
    ))
    .await;
    assert_eq!(ran.printed, vec!["work", "timer"]);
}

#[tokio::test]
async fn killed_timers_do_not_hold_up_virtual_time() {
    // x <x< (Vtimer(1) >> 1 | Vtimer(1000000) >> 2)
    let ran = run(E::pruning(
        E::var(0),
        E::parallel(
            E::sequential(E::site("Vtimer", [A::int(1)]), E::int(1)),
            E::sequential(E::site("Vtimer", [A::int(1_000_000)]), E::int(2)),
        ),
    ))
    .await;
    assert_eq!(ran.published, vec![Value::Int(1)]);
    assert_eq!(ran.stats.ticks, 1);
}

#[tokio::test]
async fn a_lost_timeout_does_not_delay_real_time_calls() {
    // Rtimer(30) | (x <x< (1 | Vtimer(1000000000)))
    let started = Instant::now();
    let ran = run(E::parallel(
        E::site("Rtimer", [A::int(30)]),
        E::pruning(
            E::var(0),
            E::parallel(E::int(1), E::site("Vtimer", [A::int(1_000_000_000)])),
        ),
    ))
    .await;
    assert_eq!(ran.published.len(), 2);
    assert!(ran.published.contains(&Value::Int(1)));
    assert!(ran.published.contains(&Value::Signal));
    assert_eq!(ran.stats.ticks, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn extra_clocks_start_at_the_current_tick() {
    let slow = ClockId::new(1);
    let console = Captured::new();
    let mut sites = prelude(Arc::new(console.clone()));
    sites.register(Site::timer("Slow", slow));
    // Vtimer(3) >> Slow(2) >> Println("slow")
    let program = E::then_all([
        E::site("Vtimer", [A::int(3)]),
        E::site("Slow", [A::int(2)]),
        println(A::string("slow")),
    ]);
    let compiled = Arc::new(compile(&program, &sites).unwrap());
    let mut engine = Engine::new(compiled, EngineConfig::default(), Recorder::default());
    assert_eq!(engine.clock_now(slow), None);
    engine.run().await.unwrap();
    assert_eq!(console.lines(), vec!["slow"]);
    assert_eq!(engine.clock_now(ClockId::DEFAULT), Some(5));
    assert_eq!(engine.clock_now(slow), Some(5));
    assert_eq!(engine.clock_now(ClockId::new(2)), None);
    assert_eq!(engine.stats().ticks, 5);
}

#[tokio::test]
async fn deep_recursion_in_tail_position_needs_no_frames() {
    let ran = run(E::declare(vec![spin()], E::call(A::var(0), [A::int(20_000)]))).await;
    assert_eq!(ran.printed, vec!["work"]);
    assert!(ran.stats.tail_calls >= 20_000);
    assert!(ran.failures.is_empty());
}

#[tokio::test]
async fn otherwise_runs_only_after_silence() {
    let ran = run(E::otherwise(E::Stop, println(A::string("fallback")))).await;
    assert_eq!(ran.printed, vec!["fallback"]);

    let ran = run(E::otherwise(
        E::value(A::signal()),
        println(A::string("fallback")),
    ))
    .await;
    assert!(ran.printed.is_empty());
    assert_eq!(ran.published, vec![Value::Signal]);

    // the left side publishes before going quiet, slowly
    let ran = run(E::otherwise(
        E::parallel(
            E::int(1),
            E::sequential(E::site("Vtimer", [A::int(3)]), E::Stop),
        ),
        println(A::string("fallback")),
    ))
    .await;
    assert!(ran.printed.is_empty());
    assert_eq!(ran.published, vec![Value::Int(1)]);
}

#[tokio::test]
async fn pruning_binds_the_first_publication_and_kills_the_rest() {
    // x <x< (Vtimer(1) >> 1 | Vtimer(3) >> Println("late") >> 2)
    let ran = run(E::pruning(
        E::var(0),
        E::parallel(
            E::sequential(E::site("Vtimer", [A::int(1)]), E::int(1)),
            E::sequential(
                E::site("Vtimer", [A::int(3)]),
                E::sequential(println(A::string("late")), E::int(2)),
            ),
        ),
    ))
    .await;
    assert_eq!(ran.published, vec![Value::Int(1)]);
    assert!(ran.printed.is_empty());
    assert_eq!(ran.stats.bindings, 1);
    assert_eq!(ran.live, 0);
}

#[tokio::test]
async fn only_readers_of_the_cell_wait_for_it() {
    // (Println("left") | Println(x)) <x< (Vtimer(2) >> 7)
    let ran = run(E::pruning(
        E::parallel(println(A::string("left")), println(A::var(0))),
        E::sequential(E::site("Vtimer", [A::int(2)]), E::int(7)),
    ))
    .await;
    assert_eq!(ran.printed, vec!["left", "7"]);
}

#[tokio::test]
async fn a_cell_that_never_binds_silences_its_readers() {
    // Println(x) <x< stop
    let ran = run(E::pruning(println(A::var(0)), E::Stop)).await;
    assert!(ran.printed.is_empty());
    assert!(ran.published.is_empty());
    assert_eq!(ran.live, 0);
}

#[tokio::test]
async fn closures_receive_futures_unforced() {
    // (def f(x) = 1; f(y)) <y< stop
    let f = Definition::new("f", 1, E::int(1));
    let ran = run(E::pruning(
        E::declare(vec![f], E::call(A::var(0), [A::var(1)])),
        E::Stop,
    ))
    .await;
    assert_eq!(ran.published, vec![Value::Int(1)]);
}

#[tokio::test]
async fn failures_are_reported_once_with_their_location() {
    let span = crate::location::Point::default().point_span("calc.orc".into());
    let ran = run(E::parallel(
        E::site("Div", [A::int(1), A::int(0)]).with_span(span.clone()),
        E::int(5),
    ))
    .await;
    assert_eq!(ran.published, vec![Value::Int(5)]);
    assert_eq!(ran.failures.len(), 1);
    assert_eq!(ran.failures[0].span, span);
    assert!(matches!(
        &ran.failures[0].error,
        TokenError::Site { site, .. } if site == "Div"
    ));
}

#[tokio::test]
async fn arity_mismatch_fails_only_the_caller() {
    let f = Definition::new("f", 2, E::int(1));
    let ran = run(E::declare(
        vec![f],
        E::parallel(E::call(A::var(0), [A::int(1)]), E::int(2)),
    ))
    .await;
    assert_eq!(ran.published, vec![Value::Int(2)]);
    assert!(matches!(
        &ran.failures[..],
        [Failure {
            error: TokenError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            },
            ..
        }]
    ));
}

#[tokio::test]
async fn the_token_ceiling_fails_only_the_forking_token() {
    let config = EngineConfig {
        max_tokens: Some(2),
    };
    let slowly = |n| E::sequential(E::site("Vtimer", [A::int(1)]), E::int(n));
    let ran = run_with(E::any([slowly(1), slowly(2), slowly(3)]), config, |_| {}).await;
    assert_eq!(ran.published, vec![Value::Int(1)]);
    assert_eq!(
        ran.failures
            .iter()
            .map(|failure| failure.error.clone())
            .collect::<Vec<_>>(),
        vec![TokenError::ResourceExhausted { limit: 2 }]
    );
}

#[tokio::test]
async fn the_engine_stops_when_told_to() {
    let console = Captured::new();
    let sites = prelude(Arc::new(console));
    let compiled = Arc::new(compile(&E::site("Rtimer", [A::int(60_000)]), &sites).unwrap());
    let mut engine = Engine::new(compiled, EngineConfig::default(), Recorder::default());
    let terminator = engine.terminator();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        terminator.terminate();
    });
    engine.run().await.unwrap();
    assert_eq!(engine.live_tokens(), 1);
}

#[tokio::test]
async fn committed_transactions_publish_after_confirming() {
    let ran = run(with_buffer(quietly(E::then_all([put(1), put(2)])))).await;
    assert_eq!(ran.published, vec![Value::Int(2)]);
    assert_eq!(ran.stats.commits, 1);
}

#[tokio::test]
async fn aborted_transactions_leave_no_trace() {
    let ran = run(with_buffer(quietly(E::then_all([
        put(1),
        put(2),
        E::site("Abort", []),
    ]))))
    .await;
    assert_eq!(ran.published, vec![Value::Int(0)]);
    assert_eq!(ran.stats.aborts, 1);
    assert_eq!(ran.stats.commits, 0);
}

#[tokio::test]
async fn nested_commits_land_in_the_parent() {
    let ran = run(with_buffer(quietly(E::then_all([
        E::atomic(put(1)),
        put(2),
    ]))))
    .await;
    assert_eq!(ran.published, vec![Value::Int(2)]);
    assert_eq!(ran.stats.commits, 2);
}

#[tokio::test]
async fn a_nested_abort_only_undoes_the_child() {
    let ran = run(with_buffer(quietly(E::then_all([
        quietly(E::then_all([put(1), E::site("Abort", [])])),
        put(2),
    ]))))
    .await;
    assert_eq!(ran.published, vec![Value::Int(1)]);
    assert_eq!(ran.stats.commits, 1);
    assert_eq!(ran.stats.aborts, 1);
}

#[tokio::test]
async fn concurrent_commits_on_one_buffer_let_the_first_win() {
    // atomic(put(1) >> 1) | atomic(put(2) >> 2)
    let ran = run(with_buffer(E::parallel(
        E::atomic(E::sequential(put(1), E::int(1))),
        E::atomic(E::sequential(put(2), E::int(2))),
    )))
    .await;
    assert_eq!(ran.published, vec![Value::Int(1)]);
    assert_eq!(ran.stats.commits, 1);
    assert_eq!(ran.stats.aborts, 1);
}

#[tokio::test]
async fn transactional_writes_are_private_until_commit() {
    // TRef(0) >r> r.write >write> r.read >read>
    //   (atomic(write(5) >> Vtimer(2)) | Vtimer(1) >> read())
    //   >_> read()
    let body = E::parallel(
        E::atomic(E::then_all([
            E::call(A::var(1), [A::int(5)]),
            E::site("Vtimer", [A::int(2)]),
        ])),
        E::then_all([E::site("Vtimer", [A::int(1)]), E::call(A::var(0), [])]),
    );
    let ran = run(E::sequential(
        E::site("TRef", [A::int(0)]),
        E::sequential(
            E::field(A::var(0), "write"),
            E::sequential(
                E::field(A::var(1), "read"),
                E::sequential(body, E::call(A::var(1), [])),
            ),
        ),
    ))
    .await;
    // one read lands before the commit, the other after it
    assert_eq!(ints(&ran.published), vec![0, 5]);
}

#[derive(Clone, Copy, PartialEq)]
enum Policy {
    Ready,
    Reject,
    Forget,
    FromAnotherThread,
}

#[derive(Default)]
struct Counts {
    confirmed: AtomicUsize,
    rolled_back: AtomicUsize,
    lineages: Mutex<Vec<usize>>,
}

struct Participant {
    policy: Policy,
    counts: Arc<Counts>,
}

impl Cohort for Participant {
    fn ready(&self, _txn: &TxnScope, vote: Vote) {
        match self.policy {
            Policy::Ready => vote.ready(),
            Policy::Reject => vote.abort(),
            Policy::Forget => drop(vote),
            Policy::FromAnotherThread => {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    vote.ready();
                });
            }
        }
    }

    fn confirm(&self, txn: &TxnScope) {
        self.counts.confirmed.fetch_add(1, Ordering::SeqCst);
        self.counts.lineages.lock().unwrap().push(txn.lineage().len());
    }

    fn rollback(&self, _txn: &TxnScope) {
        self.counts.rolled_back.fetch_add(1, Ordering::SeqCst);
    }
}

struct Join(Arc<Participant>);

impl TransactionalSite for Join {
    fn call(&self, cx: &mut SiteContext<'_>, _args: &[Value]) -> Result<Option<Value>, SiteError> {
        cx.enlist(self.0.clone());
        Ok(Some(Value::Signal))
    }
}

/// Registers a `Join<n>` site per policy; each enlists its own participant.
fn participants(policies: &[Policy]) -> (Vec<Arc<Counts>>, impl FnOnce(&mut SiteRegistry)) {
    let participants: Vec<Arc<Participant>> = policies
        .iter()
        .map(|&policy| {
            Arc::new(Participant {
                policy,
                counts: Arc::default(),
            })
        })
        .collect();
    let counts = participants.iter().map(|participant| participant.counts.clone()).collect();
    (counts, move |sites: &mut SiteRegistry| {
        for (i, participant) in participants.into_iter().enumerate() {
            sites.register(Site::transactional(&format!("Join{}", i + 1), Join(participant)));
        }
    })
}

fn aborted_or_done(body: E) -> E {
    E::otherwise(E::atomic(body), println(A::string("aborted")))
}

#[tokio::test]
async fn repeated_abort_votes_abort_once() {
    let (counts, sites) = participants(&[Policy::Reject, Policy::Reject]);
    let ran = run_with(
        aborted_or_done(E::then_all([E::site("Join1", []), E::site("Join2", [])])),
        EngineConfig::default(),
        sites,
    )
    .await;
    assert_eq!(ran.printed, vec!["aborted"]);
    assert_eq!(ran.stats.aborts, 1);
    for counts in counts {
        assert_eq!(counts.rolled_back.load(Ordering::SeqCst), 1);
        assert_eq!(counts.confirmed.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn an_unanswered_vote_aborts() {
    let (counts, sites) = participants(&[Policy::Forget]);
    let ran = run_with(
        aborted_or_done(E::site("Join1", [])),
        EngineConfig::default(),
        sites,
    )
    .await;
    assert_eq!(ran.printed, vec!["aborted"]);
    assert_eq!(counts[0].rolled_back.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn votes_may_come_from_other_threads() {
    let (counts, sites) = participants(&[Policy::FromAnotherThread, Policy::Ready]);
    let ran = run_with(
        aborted_or_done(E::then_all([E::site("Join1", []), E::site("Join2", [])])),
        EngineConfig::default(),
        sites,
    )
    .await;
    assert!(ran.printed.is_empty());
    assert_eq!(ran.published, vec![Value::Signal]);
    assert_eq!(counts[0].confirmed.load(Ordering::SeqCst), 1);
    assert_eq!(counts[1].confirmed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn committed_children_hand_their_cohorts_to_the_parent() {
    let (counts, sites) = participants(&[Policy::Ready]);
    let ran = run_with(
        E::atomic(E::atomic(E::site("Join1", []))),
        EngineConfig::default(),
        sites,
    )
    .await;
    assert_eq!(ran.published, vec![Value::Signal]);
    assert_eq!(*counts[0].lineages.lock().unwrap(), vec![2, 1]);
}

#[tokio::test]
async fn returned_votes_are_handled_before_virtual_time_moves() {
    // atomic(atomic(atomic(Join1()))) >> Println("committed") | Vtimer(1) >> Println("timer")
    let (_, sites) = participants(&[Policy::Ready]);
    let ran = run_with(
        E::parallel(
            E::then_all([
                E::atomic(E::atomic(E::atomic(E::site("Join1", [])))),
                println(A::string("committed")),
            ]),
            E::then_all([E::site("Vtimer", [A::int(1)]), println(A::string("timer"))]),
        ),
        EngineConfig::default(),
        sites,
    )
    .await;
    assert_eq!(ran.printed, vec!["committed", "timer"]);
    assert_eq!(ran.stats.commits, 3);
    assert_eq!(ran.stats.ticks, 1);
}

#[tokio::test]
async fn demos_run_to_completion() {
    let mut dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    dir.push("demos");
    // (file, expected lines, whether their order is fixed)
    let expectations: &[(&str, &[&str], bool)] = &[
        ("parallel_print.json", &["1", "2", "3"], false),
        ("timers.json", &["10", "20"], true),
        ("transfer.json", &["3"], true),
    ];
    for (name, expected, ordered) in expectations {
        let (expression, _) = program::load(&dir.join(name)).expect("demo loads");
        let ran = run(expression).await;
        let printed = if *ordered {
            ran.printed
        } else {
            sorted(ran.printed)
        };
        assert_eq!(printed, *expected, "{name}");
        assert!(ran.failures.is_empty(), "{name}");
    }
}

fn run_blocking(expression: E) -> Ran {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(run(expression))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A pruning binds once, to a publication of the earliest branch.
    #[test]
    fn pruning_binds_exactly_once(branches in prop::collection::vec((1i64..6, -100i64..100), 1..6)) {
        let right = E::any(branches.iter().map(|&(delay, value)| {
            E::sequential(E::site("Vtimer", [A::int(delay)]), E::int(value))
        }));
        let ran = run_blocking(E::pruning(E::var(0), right));
        prop_assert_eq!(ran.published.len(), 1);
        prop_assert_eq!(ran.stats.bindings, 1);
        let earliest = branches.iter().map(|&(delay, _)| delay).min().unwrap();
        let winner = ran.published[0].as_int().unwrap();
        prop_assert!(branches.contains(&(earliest, winner)));
        prop_assert_eq!(ran.live, 0);
    }

    /// Rolling back any number of puts leaves the buffer exactly as it was.
    #[test]
    fn rolled_back_puts_leave_no_trace(n in 0i64..=9) {
        let mut steps: Vec<E> = (1..=n).map(|i| E::call(A::var(2), [A::int(i)])).collect();
        steps.push(E::site("Abort", []));
        // put(100) >> (atomic(put(1) >> ... >> put(n) >> Abort()) ; signal)
        //   >> size() >s> (s | get())
        let ran = run_blocking(with_buffer_ops(E::then_all([
            E::call(A::var(2), [A::int(100)]),
            quietly(E::then_all(steps)),
            E::sequential(
                E::call(A::var(1), []),
                E::parallel(E::var(0), E::call(A::var(1), [])),
            ),
        ])));
        prop_assert_eq!(ints(&ran.published), vec![1, 100]);
        prop_assert_eq!(ran.stats.aborts, 1);
        prop_assert_eq!(ran.stats.commits, 0);
    }

    /// Whatever the order transactions ask in, the first to ask commits and the rest abort.
    #[test]
    fn first_readier_wins(
        order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle(),
        values in prop::collection::vec(any::<i64>(), 4),
    ) {
        let scopes: Vec<TxnScope> = (0..4)
            .map(|i| TxnScope::root(crate::runtime::arena::Id::from_raw(i, 0)))
            .collect();
        let mut cell = Versioned::new(0i64);
        for (scope, value) in scopes.iter().zip(&values) {
            *cell.write(Some(scope)).unwrap() = *value;
        }
        let answers: Vec<bool> = order.iter().map(|&i| cell.ready(&scopes[i])).collect();
        prop_assert_eq!(answers, vec![true, false, false, false]);
        let winner = order[0];
        cell.confirm(&scopes[winner]);
        for &loser in &order[1..] {
            cell.rollback(&scopes[loser]);
        }
        prop_assert_eq!(*cell.committed(), values[winner]);
    }
}
