use concord_core::{AgentDirectory, AgentIdentity};

#[tokio::test]
async fn agent_directory_indexing() {
    let dir = AgentDirectory::new();
    dir.register(
        AgentIdentity::new("agent.b", "translator").with_specialties(["translation", "writing"]),
    );
    dir.register(AgentIdentity::new("agent.a", "writer").with_specialty("writing"));
    dir.register(AgentIdentity::new("agent.c", "analyst").with_specialty("analysis"));

    // registration order, not alphabetical
    assert_eq!(
        dir.find_agent_by_capability("writing"),
        vec!["agent.b".to_string(), "agent.a".to_string()]
    );
    assert_eq!(dir.find_agent_by_capability("translation"), vec!["agent.b"]);
    assert!(dir.find_agent_by_capability("cooking").is_empty());

    let all: Vec<String> = dir.all().into_iter().map(|i| i.agent_id).collect();
    assert_eq!(all, vec!["agent.b", "agent.a", "agent.c"]);
    assert_eq!(dir.get("agent.c").unwrap().role, "analyst");
}

#[tokio::test]
async fn deregister_is_idempotent() {
    let dir = AgentDirectory::new();
    dir.register(AgentIdentity::new("agent.a", "writer").with_specialty("writing"));

    assert!(dir.deregister("agent.a").is_some());
    assert!(dir.deregister("agent.a").is_none());
    assert!(dir.deregister("agent.never").is_none());
    assert!(dir.find_agent_by_capability("writing").is_empty());
    assert!(dir.is_empty());
}
