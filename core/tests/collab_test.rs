use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use concord_core::{
    Agent, AgentNetwork, BroadcastHook, CapabilityErrorKind, CapabilityHandler, CapabilityRequest,
    ConcordError, ContextFilter, ContextPriority, ContextStore, ContextType, DiscoveryPolicy,
    EntrySpec, FnHandler, Message, MessagingConfig, Result,
};
use serde_json::{json, Value};

/// Sleeps before answering and tracks how many calls overlap
struct SlowHandler {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowHandler {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CapabilityHandler for SlowHandler {
    async fn handle(&self, req: CapabilityRequest<'_>) -> Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "done": req.payload.clone() }))
    }
}

struct RejectingHook;

#[async_trait]
impl BroadcastHook for RejectingHook {
    async fn on_broadcast(&self, message: &Message, _store: &ContextStore) -> Result<()> {
        Err(ConcordError::InvalidContext(format!(
            "refusing topic {}",
            message.task
        )))
    }
}

fn plain(id: &str) -> Agent {
    Agent::builder(id, "worker").build().unwrap()
}

fn tagged(store: &ContextStore, tag: &str) -> usize {
    store
        .query(ContextFilter::new().of_type(ContextType::Task).with_tag(tag))
        .count()
}

#[tokio::test]
async fn request_response_is_recorded_on_both_sides() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.writer"));
    network.register(
        Agent::builder("agent.upper", "formatter")
            .specialty("formatting")
            .capability(
                "upper",
                FnHandler::new(|req| {
                    let text = req.payload["text"].as_str().unwrap_or_default();
                    Ok(json!(text.to_uppercase()))
                }),
            )
            .build()
            .unwrap(),
    );

    let writer = network.collaborator("agent.writer").unwrap();
    let out = writer
        .send_request("agent.upper", "upper", json!({"text": "hello"}))
        .await
        .unwrap();
    assert_eq!(out, json!("HELLO"));

    let writer_store = writer.agent().store();
    assert_eq!(tagged(writer_store, "request"), 1);
    assert_eq!(tagged(writer_store, "response"), 1);
    assert_eq!(tagged(writer_store, "to:agent.upper"), 1);
    assert_eq!(tagged(writer_store, "from:agent.upper"), 1);

    let upper = network.agent("agent.upper").unwrap();
    assert_eq!(tagged(upper.store(), "from:agent.writer"), 1);
    assert_eq!(tagged(upper.store(), "to:agent.writer"), 1);

    let stats = network.stats();
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.requests_resolved, 1);
}

#[tokio::test]
async fn unknown_task_and_unknown_agent() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(plain("agent.b"));
    let a = network.collaborator("agent.a").unwrap();

    match a.send_request("agent.b", "fly", json!({})).await {
        Err(ConcordError::Capability(e)) => {
            assert_eq!(e.kind, CapabilityErrorKind::UnknownTask);
            assert_eq!(e.agent_id, "agent.b");
            assert_eq!(e.task, "fly");
        }
        other => panic!("expected capability error, got {other:?}"),
    }
    // the target still saw the request, but produced no response entry
    let b = network.agent("agent.b").unwrap();
    assert_eq!(tagged(b.store(), "request"), 1);
    assert_eq!(tagged(b.store(), "response"), 0);
    assert_eq!(network.stats().requests_failed, 1);

    assert!(matches!(
        a.send_request("agent.ghost", "fly", json!({})).await,
        Err(ConcordError::AgentNotFound(id)) if id == "agent.ghost"
    ));
    assert!(matches!(
        network.collaborator("agent.ghost"),
        Err(ConcordError::AgentNotFound(_))
    ));
}

#[tokio::test]
async fn handler_failure_reaches_caller() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(
        Agent::builder("agent.b", "worker")
            .capability(
                "parse",
                FnHandler::new(|_| Err(ConcordError::InvalidContext("bad input".into()))),
            )
            .build()
            .unwrap(),
    );

    let a = network.collaborator("agent.a").unwrap();
    match a.send_request("agent.b", "parse", json!("???")).await {
        Err(ConcordError::Capability(e)) => {
            assert_eq!(e.kind, CapabilityErrorKind::HandlerFailure);
            assert!(e.detail.contains("bad input"));
        }
        other => panic!("expected handler failure, got {other:?}"),
    }
    assert_eq!(tagged(a.agent().store(), "response"), 0);
}

#[tokio::test]
async fn sequential_requests_are_served_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(
        Agent::builder("agent.b", "worker")
            .capability(
                "log",
                FnHandler::new(move |req| {
                    let n = req.payload["n"].as_u64().unwrap_or_default();
                    log.lock().unwrap().push(n);
                    Ok(json!(n))
                }),
            )
            .build()
            .unwrap(),
    );

    let a = network.collaborator("agent.a").unwrap();
    for n in 0..5u64 {
        a.send_request("agent.b", "log", json!({ "n": n })).await.unwrap();
    }
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn an_agent_never_handles_two_requests_at_once() {
    let slow = SlowHandler::new(Duration::from_millis(20));
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(plain("agent.c"));
    network.register(
        Agent::builder("agent.b", "worker")
            .capability("work", slow.clone())
            .build()
            .unwrap(),
    );

    let a = network.collaborator("agent.a").unwrap();
    let c = network.collaborator("agent.c").unwrap();
    let (ra, rc) = tokio::join!(
        a.send_request("agent.b", "work", json!(1)),
        c.send_request("agent.b", "work", json!(2)),
    );
    assert!(ra.is_ok() && rc.is_ok());
    assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeout_discards_late_response() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(
        Agent::builder("agent.slow", "worker")
            .capability("work", SlowHandler::new(Duration::from_millis(200)))
            .build()
            .unwrap(),
    );

    let a = network.collaborator("agent.a").unwrap();
    let res = a
        .send_request_with_timeout(
            "agent.slow",
            "work",
            json!({"job": 1}),
            Some(Duration::from_millis(30)),
        )
        .await;
    assert!(matches!(
        res,
        Err(ConcordError::Timeout { ref target, timeout_ms: 30, .. }) if target == "agent.slow"
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;

    // the target finished its work, but the response never arrived anywhere
    let slow = network.agent("agent.slow").unwrap();
    assert_eq!(tagged(slow.store(), "request"), 1);
    assert_eq!(tagged(slow.store(), "response"), 0);
    assert_eq!(tagged(a.agent().store(), "request"), 1);
    assert_eq!(tagged(a.agent().store(), "response"), 0);

    let stats = network.stats();
    assert_eq!(stats.requests_timed_out, 1);
    assert_eq!(stats.requests_cancelled, 0);
}

#[tokio::test]
async fn dropping_the_call_cancels_it() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(
        Agent::builder("agent.slow", "worker")
            .capability("work", SlowHandler::new(Duration::from_millis(200)))
            .build()
            .unwrap(),
    );

    let a = network.collaborator("agent.a").unwrap();
    let call = a.send_request_with_timeout("agent.slow", "work", json!({"job": 2}), None);
    assert!(tokio::time::timeout(Duration::from_millis(30), call)
        .await
        .is_err());
    assert_eq!(network.stats().requests_cancelled, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tagged(a.agent().store(), "request"), 1);
    assert_eq!(tagged(a.agent().store(), "response"), 0);
    let slow = network.agent("agent.slow").unwrap();
    assert_eq!(tagged(slow.store(), "request"), 1);
    assert_eq!(tagged(slow.store(), "response"), 0);
}

#[tokio::test]
async fn target_keeps_serving_after_a_cancelled_call() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(
        Agent::builder("agent.slow", "worker")
            .capability("work", SlowHandler::new(Duration::from_millis(100)))
            .build()
            .unwrap(),
    );

    let a = network.collaborator("agent.a").unwrap();
    let call = a.send_request_with_timeout("agent.slow", "work", json!({"job": 1}), None);
    assert!(tokio::time::timeout(Duration::from_millis(10), call)
        .await
        .is_err());

    // queued behind the abandoned call on the target's gate, then answered normally
    let out = a
        .send_request_with_timeout("agent.slow", "work", json!({"job": 2}), None)
        .await
        .unwrap();
    assert_eq!(out, json!({"done": {"job": 2}}));

    let slow = network.agent("agent.slow").unwrap();
    assert_eq!(tagged(slow.store(), "request"), 2);
    assert_eq!(tagged(slow.store(), "response"), 1);
    assert_eq!(tagged(a.agent().store(), "response"), 1);
}

#[tokio::test]
async fn analysis_result_feeds_each_translation() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.coordinator"));
    network.register(
        Agent::builder("agent.analyst", "analyst")
            .specialty("analysis")
            .capability(
                "analyze",
                FnHandler::new(|req| {
                    let text = req.payload["text"].as_str().unwrap_or_default();
                    Ok(json!(format!("findings: {text}")))
                }),
            )
            .build()
            .unwrap(),
    );
    network.register(
        Agent::builder("agent.translator", "translator")
            .specialty("translation")
            .capability(
                "translate",
                FnHandler::new(|req| {
                    let text = req.payload["text"].as_str().unwrap_or_default();
                    let lang = req.payload["target_language"].as_str().unwrap_or_default();
                    Ok(json!(format!("[{lang}] {text}")))
                }),
            )
            .build()
            .unwrap(),
    );

    let coordinator = network.collaborator("agent.coordinator").unwrap();
    let findings = coordinator
        .send_request("agent.analyst", "analyze", json!({"text": "onboarding is slow"}))
        .await
        .unwrap();
    let findings = findings.as_str().unwrap().to_string();
    assert_eq!(findings, "findings: onboarding is slow");

    let mut translations = Vec::new();
    for language in ["es", "fr"] {
        let answer = coordinator
            .send_request(
                "agent.translator",
                "translate",
                json!({"text": findings, "target_language": language}),
            )
            .await
            .unwrap();
        translations.push(answer);
    }
    assert_eq!(
        translations,
        vec![
            json!("[es] findings: onboarding is slow"),
            json!("[fr] findings: onboarding is slow"),
        ]
    );

    let translator = network.agent("agent.translator").unwrap();
    assert_eq!(tagged(translator.store(), "from:agent.coordinator"), 2);
    let caller = coordinator.agent();
    assert_eq!(tagged(caller.store(), "to:agent.analyst"), 1);
    assert_eq!(tagged(caller.store(), "to:agent.translator"), 2);
}

#[tokio::test]
async fn broadcast_skips_sender_and_isolates_failures() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.ops"));
    network.register(plain("agent.b"));
    network.register(
        Agent::builder("agent.c", "picky")
            .broadcast_hook(Arc::new(RejectingHook))
            .build()
            .unwrap(),
    );
    network.register(plain("agent.d"));

    let ops = network.collaborator("agent.ops").unwrap();
    let receipt = ops.broadcast(
        "maintenance",
        json!({"notice": "db restart at 02:00", "priority": "urgent"}),
    );
    assert_eq!(receipt.topic(), "maintenance");
    assert_eq!(receipt.recipients(), ["agent.b", "agent.c", "agent.d"]);

    let outcomes = receipt.settled().await;
    let delivered: Vec<(&str, bool)> = outcomes
        .iter()
        .map(|o| (o.agent_id.as_str(), o.delivered))
        .collect();
    assert_eq!(
        delivered,
        vec![("agent.b", true), ("agent.c", false), ("agent.d", true)]
    );
    assert!(outcomes[1]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("refusing topic maintenance"));

    for id in ["agent.b", "agent.d"] {
        let agent = network.agent(id).unwrap();
        let entries = agent
            .store()
            .query(ContextFilter::new().of_type(ContextType::System))
            .to_vec();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].priority, ContextPriority::Critical);
        assert!(entries[0].has_tag("from:agent.ops"));
        assert!(entries[0].has_tag("maintenance"));
    }
    assert!(network.agent("agent.c").unwrap().store().is_empty());
    assert!(ops.agent().store().is_empty());

    let stats = network.stats();
    assert_eq!(stats.broadcasts_sent, 1);
    assert_eq!(stats.broadcast_deliveries, 2);
    assert_eq!(stats.broadcast_failures, 1);
}

#[tokio::test]
async fn broadcast_without_priority_is_medium() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(plain("agent.b"));

    let a = network.collaborator("agent.a").unwrap();
    a.broadcast("status", json!({"notice": "all good"})).settled().await;

    let entries = network.agent("agent.b").unwrap().store().export_contexts();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].priority, ContextPriority::Medium);
}

#[tokio::test]
async fn discovery_policies() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.caller"));
    network.register(
        Agent::builder("agent.broken", "translator")
            .specialty("translation")
            .capability(
                "translate",
                FnHandler::new(|_| Err(ConcordError::BackendUnavailable("offline".into()))),
            )
            .build()
            .unwrap(),
    );
    network.register(
        Agent::builder("agent.good", "translator")
            .specialty("translation")
            .capability("translate", FnHandler::new(|_| Ok(json!("hola"))))
            .build()
            .unwrap(),
    );

    let caller = network.collaborator("agent.caller").unwrap();

    // First asks the earliest registration only, and it fails
    assert!(caller
        .discover_and_request("translation", "translate", json!({"text": "hi"}))
        .await
        .is_err());

    let replies = caller
        .discover_and_request_with(
            "translation",
            "translate",
            json!({"text": "hi"}),
            DiscoveryPolicy::FirstSuccessful,
        )
        .await
        .unwrap();
    let ids: Vec<&str> = replies.iter().map(|r| r.agent_id.as_str()).collect();
    assert_eq!(ids, vec!["agent.broken", "agent.good"]);
    assert_eq!(replies[1].value(), Some(&json!("hola")));

    let replies = caller
        .discover_and_request_with(
            "translation",
            "translate",
            json!({"text": "hi"}),
            DiscoveryPolicy::All,
        )
        .await
        .unwrap();
    assert_eq!(replies.len(), 2);
    assert!(!replies[0].is_ok());
    assert!(replies[1].is_ok());

    assert!(matches!(
        caller
            .discover_and_request("astronomy", "observe", json!({}))
            .await,
        Err(ConcordError::NoCapableAgent(tag)) if tag == "astronomy"
    ));
}

#[tokio::test]
async fn discovery_excludes_the_caller() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(
        Agent::builder("agent.solo", "analyst")
            .specialty("analysis")
            .capability("analyze", FnHandler::new(|_| Ok(json!("done"))))
            .build()
            .unwrap(),
    );
    let solo = network.collaborator("agent.solo").unwrap();
    assert!(matches!(
        solo.discover_and_request("analysis", "analyze", json!({})).await,
        Err(ConcordError::NoCapableAgent(_))
    ));
}

#[tokio::test]
async fn deregistered_agent_is_unreachable() {
    let network = AgentNetwork::new(MessagingConfig::default());
    network.register(plain("agent.a"));
    network.register(
        Agent::builder("agent.b", "worker")
            .specialty("echo")
            .capability("echo", FnHandler::new(|req| Ok(req.payload.clone())))
            .build()
            .unwrap(),
    );
    let a = network.collaborator("agent.a").unwrap();
    assert!(network.deregister("agent.b").is_some());
    assert!(network.deregister("agent.b").is_none());

    assert!(matches!(
        a.send_request("agent.b", "echo", json!(1)).await,
        Err(ConcordError::AgentNotFound(_))
    ));
    assert!(network.directory().find_agent_by_capability("echo").is_empty());
    assert!(a.broadcast("x", json!({})).recipients().is_empty());
}

#[tokio::test]
async fn expiry_sweep_purges_every_store() {
    let network = AgentNetwork::new(MessagingConfig::default());
    let a = network.register(plain("agent.a"));
    let b = network.register(plain("agent.b"));
    let t0 = 1_700_000_000_000;
    a.store()
        .add_at(EntrySpec::system("short").expires_at(t0 + 10), t0)
        .unwrap();
    b.store()
        .add_at(EntrySpec::system("short").expires_at(t0 + 10), t0)
        .unwrap();
    b.store().add_at(EntrySpec::knowledge("keeps"), t0).unwrap();

    assert_eq!(network.sweep_expired(t0 + 5), 0);
    assert_eq!(network.sweep_expired(t0 + 10), 2);
    assert!(a.store().is_empty());
    assert_eq!(b.store().len(), 1);
    assert_eq!(network.stats().entries_purged, 2);
}

#[tokio::test]
async fn background_sweeper_runs_until_aborted() {
    let network = AgentNetwork::new(MessagingConfig::default());
    let a = network.register(plain("agent.a"));
    a.store()
        .add(EntrySpec::system("blink").expires_in(Duration::from_millis(5)))
        .unwrap();

    let sweeper = network.spawn_expiry_sweeper(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(a.store().is_empty());
    sweeper.abort();
}
