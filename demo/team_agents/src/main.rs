mod config;
use concord_core::{
    analyze_conversation, init_tracing, Agent, AgentNetwork, ContextPriority, DegradePolicy,
    EchoCompletion, EntrySpec, HttpCompletion, Message, RankRequest, TextCompletion,
};
use config::{BackendKind, TeamAgentsConfig};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info,concord_core=info,team_agents=info");

    info!(
        target = "team_agents",
        "Starting team demo: request/response → broadcast → discovery → collaboration → priority"
    );

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = TeamAgentsConfig::load();

    let backend: Arc<dyn TextCompletion> = match cfg.backend {
        BackendKind::Echo => Arc::new(EchoCompletion::with_prefix("[echo]")),
        BackendKind::Http => match HttpCompletion::new(cfg.concord.llm.clone()) {
            Ok(http) => Arc::new(http),
            Err(e) => {
                warn!(target = "team_agents", error = %e, "HTTP backend unavailable; using echo");
                Arc::new(EchoCompletion::with_prefix("[echo]"))
            }
        },
    };
    info!(target = "team_agents", backend = backend.name(), "Completion backend ready");

    // 1) Network + team members
    let network = AgentNetwork::from_config(&cfg.concord);
    for member in &cfg.members {
        let agent = Agent::builder(member.id.as_str(), member.role.as_str())
            .specialties(member.specialties.iter().cloned())
            .completion_backend(Arc::clone(&backend))
            .degrade(DegradePolicy::Fallback(
                "Sorry, I can't answer that right now.".into(),
            ))
            .config(&cfg.concord)
            .build()?;
        network.register(agent);
    }
    let sweeper = cfg
        .concord
        .context
        .sweep_interval()
        .map(|interval| network.spawn_expiry_sweeper(interval));

    let (Some(writer), Some(translator), Some(analyst)) = (
        cfg.member_with("writing"),
        cfg.member_with("translation"),
        cfg.member_with("analysis"),
    ) else {
        error!(target = "team_agents", "Team needs writing, translation and analysis specialties");
        return Ok(());
    };
    let writer = network.collaborator(&writer.id)?;
    // Reconstructed record of each exchange for conversation analysis. Its
    // messages carry their own correlation ids, not those of the wire traffic.
    let mut transcript: Vec<Message> = Vec::new();

    // 2) Request/response: writer asks the translator directly
    let payload = json!({"text": "The release ships on Friday.", "target_language": "Spanish"});
    let request = Message::request(writer.agent().id(), translator.id.as_str(), "translate", payload.clone());
    match writer.send_request(&translator.id, "translate", payload).await {
        Ok(answer) => {
            info!(target = "team_agents", %answer, "Translation received");
            let reply = request.reply(answer);
            transcript.push(request);
            transcript.push(reply);
        }
        Err(e) => {
            warn!(target = "team_agents", error = %e, "Translation failed");
            transcript.push(request);
        }
    }

    // 3) Broadcast: maintenance notice to everyone else
    let notice = json!({"notice": "Database maintenance tonight at 02:00", "priority": "urgent"});
    transcript.push(Message::broadcast(writer.agent().id(), "maintenance", notice.clone()));
    let receipt = writer.broadcast("maintenance", notice);
    for outcome in receipt.settled().await {
        info!(
            target = "team_agents",
            agent = %outcome.agent_id,
            delivered = outcome.delivered,
            error = outcome.error.as_deref().unwrap_or(""),
            "Broadcast delivery"
        );
    }

    // 4) Discovery: find whoever does analysis
    let payload = json!({"text": "Sales rose 12% while costs stayed flat.", "instruction": "Summarize the trend"});
    match writer.discover_and_request("analysis", "analyze", payload.clone()).await {
        Ok(answer) => {
            info!(target = "team_agents", analyst = %analyst.id, %answer, "Analysis received");
            let request = Message::request(writer.agent().id(), analyst.id.as_str(), "analyze", payload);
            let reply = request.reply(answer);
            transcript.push(request);
            transcript.push(reply);
        }
        Err(e) => warn!(target = "team_agents", error = %e, "Discovery failed"),
    }

    // 5) Collaboration: analyst findings are translated once per language
    let payload = json!({
        "text": "Customer feedback: onboarding is slow, support is excellent.",
        "instruction": "List the key findings"
    });
    let request = Message::request(writer.agent().id(), analyst.id.as_str(), "analyze", payload.clone());
    match writer.send_request(&analyst.id, "analyze", payload).await {
        Ok(findings) => {
            info!(target = "team_agents", %findings, "Findings received");
            let findings_text = findings
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| findings.to_string());
            let reply = request.reply(findings);
            transcript.push(request);
            transcript.push(reply);

            for language in ["Spanish", "French"] {
                let payload = json!({"text": findings_text, "target_language": language});
                let request = Message::request(writer.agent().id(), translator.id.as_str(), "translate", payload.clone());
                match writer.send_request(&translator.id, "translate", payload).await {
                    Ok(translation) => {
                        info!(target = "team_agents", language, %translation, "Findings translated");
                        let reply = request.reply(translation);
                        transcript.push(request);
                        transcript.push(reply);
                    }
                    Err(e) => {
                        warn!(target = "team_agents", language, error = %e, "Translation of findings failed");
                        transcript.push(request);
                    }
                }
            }
        }
        Err(e) => {
            warn!(target = "team_agents", error = %e, "Analysis failed; skipping translations");
            transcript.push(request);
        }
    }

    // 6) Priority: critical context outranks routine notes
    let me = writer.agent();
    me.remember(EntrySpec::task("Tidy up the style guide").with_priority(ContextPriority::Low))?;
    me.remember(
        EntrySpec::task("Security patch must ship before the release")
            .with_priority(ContextPriority::Critical)
            .with_tag("release"),
    )?;
    let top = me
        .ranker()
        .rank(me.store(), &RankRequest::for_query("what blocks the release?"));
    for (i, entry) in top.iter().take(3).enumerate() {
        info!(
            target = "team_agents",
            rank = i + 1,
            priority = %entry.priority,
            context_type = %entry.context_type,
            text = %entry.text(),
            "Ranked context"
        );
    }

    // 7) Wrap-up
    let analysis = analyze_conversation(&transcript);
    info!(target = "team_agents", summary = %analysis.summary, "Conversation analysis");
    for id in network.agent_ids() {
        if let Some(agent) = network.agent(&id) {
            let summary = agent.context_summary();
            info!(target = "team_agents", agent = %id, contexts = summary.total_contexts, "Context summary");
        }
    }
    info!(
        target = "team_agents",
        stats = %serde_json::to_string(&network.stats())?,
        "Messaging stats"
    );

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!(target = "team_agents", "Team demo finished");
    Ok(())
}
