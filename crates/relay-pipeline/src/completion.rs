//! Completion hook — post-turn housekeeping that runs after the assistant
//! content is final, on both the immediate and the streaming path: chat
//! title generation and tag generation, driven by the turn's requested-task
//! flags.
//!
//! Everything here is best-effort. A failed generation leaves the prior
//! state untouched and never surfaces to the caller.

use serde_json::{json, Value};
use tracing::{debug, warn};

use relay_core::config::DEFAULT_CHAT_TITLE;
use relay_core::types::{RequestedTasks, TaskKind, TurnMetadata, UserSummary};

use crate::events::Event;
use crate::messages::{content_text, message_chain};
use crate::pipeline::ChatPipeline;
use crate::transport::Emitter;

/// Default title prompt. `{{MESSAGES:END:2}}` renders the trailing two
/// messages of the conversation branch.
pub const DEFAULT_TITLE_TEMPLATE: &str = r#"### Task:
Generate a concise, 3-5 word title with an emoji summarizing the chat history.
### Guidelines:
- The title should clearly represent the main theme or subject of the conversation.
- Use emojis that enhance understanding of the topic, but avoid quotation marks or special formatting.
- Write the title in the chat's primary language; default to English if the language is unclear.
- Prioritize accuracy over excessive creativity; keep it clear and simple.
### Output:
Your response should ONLY contain the title, with no additional text.
### Chat History:
<chat_history>
{{MESSAGES:END:2}}
</chat_history>"#;

/// Default tags prompt. Renders the trailing six messages and asks for a
/// JSON object with a `tags` array.
pub const DEFAULT_TAGS_TEMPLATE: &str = r#"### Task:
Generate 1-3 broad tags categorizing the main themes of the chat history, along with 1-3 more specific subtopic tags.
### Guidelines:
- Start with high-level domains (e.g. Science, Technology, Philosophy, Arts, Politics, Business, Health, Sports, Entertainment, Education)
- Consider including relevant subfields/subdomains if they are strongly represented throughout the conversation
- If content is too short (less than 3 messages) or too diverse, use only ["General"]
- Use the chat's primary language; default to English if multilingual
- Prioritize accuracy over specificity
### Output:
JSON format: { "tags": ["tag1", "tag2", "tag3"] }
Your response should ONLY contain the JSON object, with no additional text.
### Chat History:
<chat_history>
{{MESSAGES:END:6}}
</chat_history>"#;

/// Render a task prompt template: expands each `{{MESSAGES:END:n}}` marker
/// into the last `n` messages formatted as `ROLE: content` lines, and
/// `{{USER_NAME}}` into the requesting user's name.
///
/// Markers are expanded in one left-to-right pass over the template only —
/// marker-shaped text inside message content is inert.
pub(crate) fn render_template(template: &str, messages: &[Value], user_name: &str) -> String {
    const MARKER: &str = "{{MESSAGES:END:";

    let template = template.replace("{{USER_NAME}}", user_name);
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template.as_str();

    while let Some(start) = rest.find(MARKER) {
        let Some(rel_end) = rest[start..].find("}}") else {
            break;
        };
        let end = start + rel_end + 2;
        let count: usize = rest[start + MARKER.len()..end - 2].parse().unwrap_or(0);

        rendered.push_str(&rest[..start]);
        let tail = &messages[messages.len().saturating_sub(count)..];
        let block = tail
            .iter()
            .filter_map(|message| {
                let role = message.get("role").and_then(Value::as_str)?;
                let content = content_text(message)?;
                Some(format!("{}: {}", role.to_uppercase(), content))
            })
            .collect::<Vec<_>>()
            .join("\n");
        rendered.push_str(&block);

        rest = &rest[end..];
    }
    rendered.push_str(rest);

    rendered
}

impl ChatPipeline {
    /// Run the requested post-turn tasks for one finished turn. No-op when
    /// nothing was requested or the turn has no chat/message identity.
    pub(crate) async fn background_completion(
        &self,
        metadata: &TurnMetadata,
        user: &UserSummary,
        tasks: &RequestedTasks,
        emitter: Option<&Emitter>,
    ) {
        if tasks.is_empty() {
            return;
        }
        let (Some(chat_id), Some(message_id)) = (&metadata.chat_id, &metadata.message_id) else {
            return;
        };

        let all_messages = match self.store.get_messages(chat_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(chat_id = %chat_id, err = %e, "could not load messages for completion tasks");
                return;
            }
        };
        let messages = message_chain(&all_messages, message_id);
        if messages.is_empty() {
            return;
        }

        match tasks.title_generation {
            Some(true) => {
                let title = self
                    .generate_title(&messages, user, chat_id)
                    .await
                    .filter(|t| !t.is_empty())
                    .or_else(|| first_message_title(&messages))
                    .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());
                self.apply_title(chat_id, title, emitter).await;
            }
            // An explicit opt-out still gets the cheap fallback on the very
            // first exchange, so new chats are not left untitled.
            Some(false) if messages.len() == 2 => {
                if let Some(title) = first_message_title(&messages) {
                    self.apply_title(chat_id, title, emitter).await;
                }
            }
            _ => {}
        }

        if tasks.tags_generation == Some(true) {
            if let Some(tags) = self.generate_tags(&messages, user, chat_id).await {
                if let Err(e) = self.store.set_tags(chat_id, &tags, &user.id).await {
                    warn!(chat_id = %chat_id, err = %e, "failed to store tags");
                } else if let Some(emitter) = emitter {
                    emitter.send(Event::Tags(json!(tags))).await;
                }
            }
        }
    }

    async fn apply_title(&self, chat_id: &str, title: String, emitter: Option<&Emitter>) {
        if let Err(e) = self.store.set_title(chat_id, &title).await {
            warn!(chat_id = %chat_id, err = %e, "failed to store title");
            return;
        }
        if let Some(emitter) = emitter {
            emitter.send(Event::Title(title)).await;
        }
    }

    /// Ask the task model for a chat title. `None` on any failure.
    async fn generate_title(
        &self,
        messages: &[Value],
        user: &UserSummary,
        chat_id: &str,
    ) -> Option<String> {
        let template = self
            .config
            .tasks
            .title_prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_TITLE_TEMPLATE);

        let content = self
            .run_completion_task(
                TaskKind::TitleGeneration,
                template,
                messages,
                user,
                chat_id,
                json!({"max_completion_tokens": 50}),
            )
            .await?;
        Some(content.trim().trim_matches('"').to_string())
    }

    /// Ask the task model for chat tags, parsed out of the first JSON
    /// object in its reply. `None` on any failure.
    async fn generate_tags(
        &self,
        messages: &[Value],
        user: &UserSummary,
        chat_id: &str,
    ) -> Option<Vec<String>> {
        let template = self
            .config
            .tasks
            .tags_prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_TAGS_TEMPLATE);

        let content = self
            .run_completion_task(
                TaskKind::TagsGeneration,
                template,
                messages,
                user,
                chat_id,
                json!({}),
            )
            .await?;

        let raw = crate::tools::first_json_object(&content)?;
        let parsed: Value = serde_json::from_str(raw).ok()?;
        let tags = parsed
            .get("tags")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect::<Vec<_>>();
        (!tags.is_empty()).then_some(tags)
    }

    /// Shared sub-call plumbing for the completion tasks: resolve the task
    /// model from the turn's own model, render the prompt, call, extract
    /// assistant content. Failures are logged and become `None`.
    async fn run_completion_task(
        &self,
        kind: TaskKind,
        template: &str,
        messages: &[Value],
        user: &UserSummary,
        chat_id: &str,
        extra: Value,
    ) -> Option<String> {
        let model_id = messages
            .iter()
            .rev()
            .find_map(|m| m.get("model").and_then(Value::as_str))?;
        let task_model = match self.models.get(model_id).await {
            Some(model) => self.resolve_task_model(&model).await,
            None => model_id.to_string(),
        };

        let prompt = render_template(template, messages, &user.name);
        let mut envelope = json!({
            "model": task_model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
            "metadata": {
                "task": kind.to_string(),
                "chat_id": chat_id,
            },
        });
        if let (Some(envelope), Some(extra)) = (envelope.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                envelope.insert(key.clone(), value.clone());
            }
        }

        debug!(task = %kind, task_model = %task_model, "running completion task");
        match self.client.complete(&envelope).await {
            Ok(response) => response.into_assistant_content().await,
            Err(e) => {
                warn!(task = %kind, err = %e, "completion task call failed");
                None
            }
        }
    }
}

/// First-message fallback title: the opening message's literal text.
fn first_message_title(messages: &[Value]) -> Option<String> {
    let text = content_text(messages.first()?)?;
    let title = text.trim().to_string();
    (!title.is_empty()).then_some(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages() -> Vec<Value> {
        vec![
            json!({"role": "user", "content": "what is rust", "model": "m1"}),
            json!({"role": "assistant", "content": "a systems language", "model": "m1"}),
        ]
    }

    #[test]
    fn template_expands_trailing_messages() {
        let rendered = render_template("History:\n{{MESSAGES:END:2}}", &messages(), "ada");
        assert_eq!(
            rendered,
            "History:\nUSER: what is rust\nASSISTANT: a systems language"
        );
    }

    #[test]
    fn template_end_count_limits_window() {
        let rendered = render_template("{{MESSAGES:END:1}}", &messages(), "ada");
        assert_eq!(rendered, "ASSISTANT: a systems language");
    }

    #[test]
    fn template_substitutes_user_name() {
        let rendered = render_template("Hello {{USER_NAME}}", &[], "ada");
        assert_eq!(rendered, "Hello ada");
    }

    #[test]
    fn marker_inside_message_content_stays_inert() {
        let msgs = vec![json!({"role": "user", "content": "{{MESSAGES:END:1}}"})];
        let rendered = render_template("{{MESSAGES:END:1}}", &msgs, "ada");
        assert_eq!(rendered, "USER: {{MESSAGES:END:1}}");
    }

    #[test]
    fn unclosed_marker_is_left_verbatim() {
        let rendered = render_template("head {{MESSAGES:END:2", &messages(), "ada");
        assert_eq!(rendered, "head {{MESSAGES:END:2");
    }

    #[test]
    fn fallback_title_is_first_message_text() {
        assert_eq!(
            first_message_title(&messages()).as_deref(),
            Some("what is rust")
        );
        assert_eq!(first_message_title(&[]), None);
    }

    #[test]
    fn fallback_title_keeps_long_content_intact() {
        let long = "x".repeat(150);
        let msgs = vec![json!({"role": "user", "content": long.clone()})];
        assert_eq!(first_message_title(&msgs).as_deref(), Some(long.as_str()));
    }
}
