use crate::context::ContextEntry;
use serde_json::{json, Value};

/// Render ranked context as a bullet block, one line per entry, tagged with type
/// and priority. Empty when there is no context.
pub fn render_context_block(context: &[ContextEntry]) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut block = String::from("Context:\n");
    for entry in context {
        block.push_str(&format!(
            "- [{}/{}] {}\n",
            entry.context_type, entry.priority, entry.content.text
        ));
    }
    block
}

/// Convert a prompt plus ranked context into chat-completion messages.
///
/// Context is dropped from the lowest-ranked end until the whole request fits
/// `max_input_tokens` (about 4 chars per token, counted in chars, not bytes); the prompt
/// is truncated last.
pub fn context_to_messages(
    system: &str,
    context: &[ContextEntry],
    prompt: &str,
    max_input_tokens: usize,
) -> Vec<Value> {
    let char_budget = max_input_tokens.saturating_mul(4);
    let system_chars = char_len(system);
    let prompt_chars = char_len(prompt);

    let mut kept = context.len();
    let mut block = render_context_block(&context[..kept]);
    while kept > 0 && system_chars + char_len(&block) + prompt_chars > char_budget {
        kept -= 1;
        block = render_context_block(&context[..kept]);
    }

    let mut prompt = prompt.to_string();
    if system_chars + char_len(&block) + prompt_chars > char_budget {
        let allowed = char_budget.saturating_sub(system_chars + char_len(&block));
        prompt = prompt.chars().take(allowed).collect();
    }

    let mut messages = Vec::new();
    if !system.is_empty() {
        messages.push(json!({"role": "system", "content": system}));
    }
    if !block.is_empty() {
        messages.push(json!({"role": "system", "content": block}));
    }
    messages.push(json!({"role": "user", "content": prompt}));
    messages
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextStore, EntrySpec};

    #[test]
    fn test_messages_include_context() {
        let store = ContextStore::new("a");
        let e = store.add_at(EntrySpec::knowledge("Sky is blue"), 1).unwrap();
        let msgs = context_to_messages("You help.", &[e], "What color?", 1000);
        assert_eq!(msgs.len(), 3);
        assert!(msgs[1]["content"]
            .as_str()
            .unwrap()
            .contains("[knowledge/high] Sky is blue"));
        assert_eq!(msgs[2]["content"], "What color?");
    }

    #[test]
    fn test_context_trimmed_to_budget() {
        let store = ContextStore::new("a");
        let big = store.add_at(EntrySpec::task("y".repeat(500)), 1).unwrap();
        let msgs = context_to_messages("", &[big], "hi", 10);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn test_budget_counts_chars_not_bytes() {
        let store = ContextStore::new("a");
        // 10 chars, 30 bytes
        let e = store.add_at(EntrySpec::task("日本語のテキストです"), 1).unwrap();
        let block = render_context_block(std::slice::from_ref(&e));
        let prompt = "ü".repeat(20);
        let budget_chars = char_len(&block) + 20;
        let msgs = context_to_messages("", &[e], &prompt, budget_chars.div_ceil(4));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["content"].as_str().unwrap().chars().count(), 20);

        let msgs = context_to_messages("", &[], &prompt, 2);
        assert_eq!(msgs[0]["content"].as_str().unwrap().chars().count(), 8);
    }
}
