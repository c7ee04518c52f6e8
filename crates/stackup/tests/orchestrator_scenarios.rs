//! End-to-end orchestrator runs against scripted launchers and probes, on a paused clock

mod common;

use common::{LaunchStep, ScriptedLauncher, ScriptedProbe};
use stackup::runtime::{
    CancelSignal, DependencyError, DependencyGraph, LaunchError, Orchestrator, OrchestratorConfig,
    PollPolicy, RetryPolicy, RunOutcome, ServiceSpec, ServiceStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(launcher: &Arc<ScriptedLauncher>) -> Orchestrator {
    Orchestrator::new(launcher.clone(), OrchestratorConfig::default())
}

fn healthy(name: &str) -> ServiceSpec {
    ServiceSpec::new(name).with_probe(Arc::new(ScriptedProbe::healthy()))
}

fn secs(times: Vec<Duration>) -> Vec<u64> {
    times.iter().map(Duration::as_secs).collect()
}

#[tokio::test(start_paused = true)]
async fn test_independent_services_then_dependent_all_healthy() {
    let graph = DependencyGraph::from_services([
        healthy("db"),
        healthy("cache"),
        healthy("api").depends_on(["db", "cache"]),
    ])
    .unwrap();
    assert_eq!(
        graph.batches(),
        &[
            vec!["db".to_string(), "cache".to_string()],
            vec!["api".to_string()]
        ]
    );

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::AllHealthy);
    assert_eq!(report.count(ServiceStatus::Healthy), 3);
    assert!(report.services.iter().all(|s| s.attempts == 1));
    assert_eq!(report.abort_reason, None);

    let calls = launcher.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2], "api");
    assert_eq!(report.service("api").map(|s| s.batch), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_critical_health_timeout_aborts_and_skips_dependents() {
    let graph = DependencyGraph::from_services([
        ServiceSpec::new("db")
            .critical(true)
            .start_timeout(Duration::from_secs(30))
            .retry(RetryPolicy::none())
            .with_probe(Arc::new(ScriptedProbe::never())),
        healthy("cache"),
        healthy("api").depends_on(["db", "cache"]),
    ])
    .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.status("db"), Some(ServiceStatus::Failed));
    assert_eq!(report.status("cache"), Some(ServiceStatus::Healthy));
    assert_eq!(report.status("api"), Some(ServiceStatus::Skipped));
    assert_eq!(launcher.launch_count("api"), 0);

    let db = report.service("db").unwrap();
    assert_eq!(db.last_signal.as_deref(), Some("HTTP 503"));
    assert!(db.last_error.as_deref().unwrap().contains("not healthy within 30s"));
    // Bounded by the timeout plus at most one polling interval
    assert!((30_000..=32_000).contains(&db.elapsed_ms), "{}", db.elapsed_ms);
    assert!(report
        .abort_reason
        .as_deref()
        .unwrap()
        .contains("critical service 'db' failed"));
}

#[tokio::test(start_paused = true)]
async fn test_health_timeouts_are_retried_with_backoff() {
    let graph = DependencyGraph::from_services([ServiceSpec::new("db")
        .critical(true)
        .start_timeout(Duration::from_secs(30))
        .with_probe(Arc::new(ScriptedProbe::never()))])
    .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.service("db").unwrap().attempts, 3);
    // 30s wait, 1s backoff, 30s wait, 2s backoff
    assert_eq!(secs(launcher.call_times("db")), vec![0, 31, 63]);
}

#[tokio::test(start_paused = true)]
async fn test_noncritical_launch_failure_skips_chain() {
    let graph = DependencyGraph::from_services([
        healthy("a"),
        healthy("b").depends_on(["a"]),
        healthy("c").depends_on(["b"]),
    ])
    .unwrap();

    let launcher = Arc::new(
        ScriptedLauncher::new().script("b", [LaunchStep::Reject, LaunchStep::Reject, LaunchStep::Reject]),
    );
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert_eq!(report.status("a"), Some(ServiceStatus::Healthy));
    assert_eq!(report.status("b"), Some(ServiceStatus::Failed));
    assert_eq!(report.status("c"), Some(ServiceStatus::Skipped));

    let b = report.service("b").unwrap();
    assert_eq!(b.attempts, 3);
    assert!(b.last_error.as_deref().unwrap().contains("runtime rejected launch"));
    assert_eq!(secs(launcher.call_times("b")), vec![0, 1, 3]);

    let c = report.service("c").unwrap();
    assert_eq!(c.attempts, 0);
    assert_eq!(c.last_error.as_deref(), Some("dependency 'b' is failed"));
    assert_eq!(launcher.launch_count("c"), 0);
}

#[test]
fn test_cycle_is_rejected_before_any_run() {
    let result = DependencyGraph::from_services([
        ServiceSpec::new("x").depends_on(["y"]),
        ServiceSpec::new("y").depends_on(["x"]),
    ]);
    assert_eq!(
        result.unwrap_err(),
        DependencyError::CyclicDependency(vec!["x".to_string(), "y".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_noncritical_failure_leaves_independent_services_healthy() {
    let graph = DependencyGraph::from_services([
        ServiceSpec::new("flowise")
            .start_timeout(Duration::from_secs(10))
            .retry(RetryPolicy::none())
            .with_probe(Arc::new(ScriptedProbe::never())),
        healthy("web"),
        healthy("dashboard").depends_on(["web"]),
    ])
    .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert_eq!(report.status("flowise"), Some(ServiceStatus::Failed));
    assert_eq!(report.status("web"), Some(ServiceStatus::Healthy));
    assert_eq!(report.status("dashboard"), Some(ServiceStatus::Healthy));
    assert_eq!(report.outcome.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_critical_failure_cancels_in_flight_siblings() {
    let graph = DependencyGraph::from_services([
        healthy("db").critical(true).retry(RetryPolicy::none()),
        ServiceSpec::new("search")
            .start_timeout(Duration::from_secs(120))
            .with_probe(Arc::new(ScriptedProbe::from_time(Duration::from_secs(60)))),
        healthy("api").depends_on(["db"]),
    ])
    .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new().script("db", [LaunchStep::Reject]));
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.status("db"), Some(ServiceStatus::Failed));
    assert_eq!(report.status("search"), Some(ServiceStatus::Failed));
    assert_eq!(report.status("api"), Some(ServiceStatus::Skipped));
    assert_eq!(
        report.service("search").unwrap().last_error.as_deref(),
        Some("cancelled: run aborted")
    );
    assert!(report.elapsed_ms < 1_000, "{}", report.elapsed_ms);
}

/// Critical service that times out its health wait at 5s
fn failing_critical(name: &str) -> ServiceSpec {
    ServiceSpec::new(name)
        .critical(true)
        .start_timeout(Duration::from_secs(5))
        .retry(RetryPolicy::none())
        .with_probe(Arc::new(ScriptedProbe::never()))
}

#[tokio::test(start_paused = true)]
async fn test_critical_failure_interrupts_retry_backoff() {
    let graph = DependencyGraph::from_services([
        failing_critical("db"),
        healthy("worker").retry(RetryPolicy::new(
            3,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )),
    ])
    .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new().script("worker", [LaunchStep::Reject]));
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    let worker = report.service("worker").unwrap();
    assert_eq!(worker.status, ServiceStatus::Failed);
    assert_eq!(worker.last_error.as_deref(), Some("cancelled: run aborted"));
    assert_eq!(worker.attempts, 1);
    assert_eq!(launcher.launch_count("worker"), 1);
    // db gives up at 5s; the 60s backoff must not be waited out
    assert!((5_000..6_000).contains(&worker.elapsed_ms), "{}", worker.elapsed_ms);
    assert!(report.elapsed_ms < 6_000, "{}", report.elapsed_ms);
}

#[tokio::test(start_paused = true)]
async fn test_critical_failure_interrupts_pending_launch() {
    let graph = DependencyGraph::from_services([
        failing_critical("db"),
        healthy("ollama").start_timeout(Duration::from_secs(600)),
    ])
    .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new().script("ollama", [LaunchStep::Hang]));
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    let ollama = report.service("ollama").unwrap();
    assert_eq!(ollama.status, ServiceStatus::Failed);
    assert_eq!(ollama.last_error.as_deref(), Some("cancelled: run aborted"));
    assert_eq!(launcher.launch_count("ollama"), 1);
    assert!((5_000..6_000).contains(&ollama.elapsed_ms), "{}", ollama.elapsed_ms);
}

#[tokio::test(start_paused = true)]
async fn test_huge_start_timeout_still_becomes_healthy() {
    let graph = DependencyGraph::from_services([
        healthy("db").start_timeout(Duration::from_secs(u64::MAX)),
    ])
    .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::AllHealthy);
    let db = report.service("db").unwrap();
    assert_eq!(db.status, ServiceStatus::Healthy);
    assert_eq!(db.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_preflight_aborts_before_any_launch() {
    let graph = DependencyGraph::from_services([healthy("db"), healthy("api").depends_on(["db"])])
        .unwrap();
    let launcher = Arc::new(
        ScriptedLauncher::new()
            .failing_preflight(LaunchError::Unexpected("docker: not found".into())),
    );
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.count(ServiceStatus::Skipped), 2);
    assert!(launcher.calls().is_empty());
    assert_eq!(
        report.abort_reason.as_deref(),
        Some("runtime pre-flight failed: unexpected launcher failure: docker: not found")
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_third_attempt() {
    let graph = DependencyGraph::from_services([healthy("n8n")]).unwrap();
    let launcher = Arc::new(
        ScriptedLauncher::new().script("n8n", [LaunchStep::Reject, LaunchStep::Reject]),
    );
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::AllHealthy);
    let n8n = report.service("n8n").unwrap();
    assert_eq!(n8n.attempts, 3);
    assert_eq!(secs(launcher.call_times("n8n")), vec![0, 1, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_launch_error_is_not_retried() {
    let graph = DependencyGraph::from_services([healthy("caddy")]).unwrap();
    let launcher = Arc::new(ScriptedLauncher::new().script("caddy", [LaunchStep::Unexpected]));
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.status("caddy"), Some(ServiceStatus::Failed));
    assert_eq!(launcher.launch_count("caddy"), 1);
    assert!(report
        .service("caddy")
        .unwrap()
        .last_error
        .as_deref()
        .unwrap()
        .contains("unexpected launcher failure"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_launcher_is_recorded_as_failed() {
    let graph = DependencyGraph::from_services([healthy("boom"), healthy("web")]).unwrap();
    let launcher = Arc::new(ScriptedLauncher::new().script("boom", [LaunchStep::Panic]));
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert_eq!(report.status("web"), Some(ServiceStatus::Healthy));

    let boom = report.service("boom").unwrap();
    assert_eq!(boom.status, ServiceStatus::Failed);
    assert_eq!(boom.attempts, 1);
    assert!(boom.last_error.as_deref().unwrap().contains("panicked"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_start_skips_everything() {
    let graph = DependencyGraph::from_services([healthy("db"), healthy("api").depends_on(["db"])])
        .unwrap();
    let (trigger, shutdown) = CancelSignal::pair();
    trigger.cancel();

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, shutdown).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.count(ServiceStatus::Skipped), 2);
    assert!(launcher.calls().is_empty());
    assert_eq!(report.abort_reason.as_deref(), Some("shutdown requested"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_run_cancels_and_skips() {
    let graph = DependencyGraph::from_services([
        ServiceSpec::new("db")
            .start_timeout(Duration::from_secs(120))
            .with_probe(Arc::new(ScriptedProbe::from_time(Duration::from_secs(60)))),
        healthy("api").depends_on(["db"]),
    ])
    .unwrap();
    let (trigger, shutdown) = CancelSignal::pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, shutdown).await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.status("db"), Some(ServiceStatus::Failed));
    assert_eq!(report.status("api"), Some(ServiceStatus::Skipped));
    assert_eq!(report.abort_reason.as_deref(), Some("shutdown requested"));
    assert!((5_000..6_000).contains(&report.elapsed_ms), "{}", report.elapsed_ms);
}

#[tokio::test(start_paused = true)]
async fn test_next_batch_waits_for_slowest_member() {
    let graph = DependencyGraph::from_services([
        healthy("fast"),
        healthy("slow"),
        healthy("after").depends_on(["fast"]),
    ])
    .unwrap();
    let launcher = Arc::new(
        ScriptedLauncher::new().script("slow", [LaunchStep::Slow(Duration::from_secs(20))]),
    );
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::AllHealthy);
    assert_eq!(secs(launcher.call_times("after")), vec![20]);
}

#[tokio::test(start_paused = true)]
async fn test_probe_polled_until_healthy() {
    let probe = Arc::new(ScriptedProbe::from_poll(3));
    let graph =
        DependencyGraph::from_services([ServiceSpec::new("grafana").with_probe(probe.clone())])
            .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    assert_eq!(report.outcome, RunOutcome::AllHealthy);
    assert_eq!(probe.polls(), 3);
    // Polls at 0s, 2s and 6s
    let elapsed = report.service("grafana").unwrap().elapsed_ms;
    assert!((6_000..7_000).contains(&elapsed), "{}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_skip_health_checks_never_polls() {
    let probe = Arc::new(ScriptedProbe::never());
    let graph = DependencyGraph::from_services([ServiceSpec::new("langfuse").with_probe(probe.clone())])
        .unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let config = OrchestratorConfig {
        skip_health_checks: true,
        poll: PollPolicy::fixed(Duration::from_secs(1)),
        ..Default::default()
    };
    let report = Orchestrator::new(launcher.clone(), config)
        .run(&graph, CancelSignal::never())
        .await;

    assert_eq!(report.outcome, RunOutcome::AllHealthy);
    assert_eq!(probe.polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_launch_is_bounded_by_start_timeout() {
    let graph = DependencyGraph::from_services([healthy("ollama")
        .start_timeout(Duration::from_secs(10))
        .retry(RetryPolicy::none())])
    .unwrap();
    let launcher = Arc::new(ScriptedLauncher::new().script("ollama", [LaunchStep::Hang]));
    let report = orchestrator(&launcher).run(&graph, CancelSignal::never()).await;

    let ollama = report.service("ollama").unwrap();
    assert_eq!(ollama.status, ServiceStatus::Failed);
    assert!(ollama.last_error.as_deref().unwrap().contains("launch timed out"));
    assert!((10_000..11_000).contains(&ollama.elapsed_ms), "{}", ollama.elapsed_ms);
}

#[tokio::test]
async fn test_teardown_runs_in_reverse_launch_order() {
    let graph = DependencyGraph::from_services([
        ServiceSpec::new("a"),
        ServiceSpec::new("b").depends_on(["a"]),
        ServiceSpec::new("c").depends_on(["b"]),
    ])
    .unwrap();
    let launcher = Arc::new(ScriptedLauncher::new());
    let results = orchestrator(&launcher).teardown(&graph).await;

    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(launcher.stopped(), vec!["c", "b", "a"]);
}
