use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::flows;
use crate::gemini::TextModel;
use crate::logging;
use crate::store::{new_message, Message, Sender, Store};

/// Reply persisted in place of a model response when generation fails.
pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered an error and couldn't respond.";

/// Only the most recent messages are fed to the model as history.
const HISTORY_WINDOW: usize = 200;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SendOutcome {
    pub conversation_id: String,
    pub reply: Message,
}

/// Drives one chat turn: persist the user's message, assemble history,
/// generate the mirrored reply, persist it.
pub struct Orchestrator {
    store: Arc<Store>,
    model: Arc<dyn TextModel>,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, model: Arc<dyn TextModel>) -> Self {
        Self { store, model }
    }

    pub async fn send_message(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        text: &str,
    ) -> Result<SendOutcome> {
        if user_id.trim().is_empty() {
            return Err(ChatError::validation("user_id must not be empty"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::validation("message text must not be empty"));
        }

        // Persist the user's turn first so it survives a generation failure.
        let conversation_id = match conversation_id {
            Some(id) => {
                if self.store.get_conversation(id)?.is_none() {
                    return Err(ChatError::NotFound(format!("conversation {}", id)));
                }
                let user_msg = new_message(id, Sender::User, text);
                self.store.append_message(id, &user_msg)?;
                id.to_string()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let user_msg = new_message(&id, Sender::User, text);
                self.store.create_conversation(user_id, &user_msg)?
            }
        };

        logging::log_chat(Some(&conversation_id), &format!("User message ({} chars)", text.len()));

        // History spans every conversation the user has, not just this one.
        let history = self.render_history(user_id)?;

        let reply_text = match self.generate_reply(user_id, &history, text).await {
            Ok(reply) => reply,
            Err(e) => {
                logging::log_error(
                    Some(&conversation_id),
                    &format!("Generation failed, substituting apology: {}", e),
                );
                APOLOGY_MESSAGE.to_string()
            }
        };

        let ai_msg = new_message(&conversation_id, Sender::Ai, &reply_text);
        if let Err(e) = self.store.append_message(&conversation_id, &ai_msg) {
            // The user already sees the reply; losing the write is logged, not fatal.
            logging::log_error(
                Some(&conversation_id),
                &format!("Failed to persist AI reply: {}", e),
            );
        }

        logging::log_chat(Some(&conversation_id), "AI reply persisted");

        Ok(SendOutcome {
            conversation_id,
            reply: ai_msg,
        })
    }

    async fn generate_reply(&self, user_id: &str, history: &str, latest: &str) -> Result<String> {
        let personality = self.store.get_user_personality(user_id)?;

        // Persona hint is fixed for now; the UI has no profile field for it.
        flows::generate_chat_response(
            self.model.as_ref(),
            history,
            latest,
            Some("female"),
            personality.as_ref().map(|p| p.profile.as_str()),
        )
        .await
    }

    /// Render the user's recent messages as "sender: text" lines, oldest
    /// first, windowed to the last 200.
    fn render_history(&self, user_id: &str) -> Result<String> {
        let messages = self.store.messages_for_user(user_id)?;
        let start = messages.len().saturating_sub(HISTORY_WINDOW);
        let lines: Vec<String> = messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.sender.as_str(), m.text))
            .collect();
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::GenerateRequest;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubModel {
        reply: Option<String>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl StubModel {
        fn replying(reply: &str) -> Self {
            StubModel {
                reply: Some(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            StubModel {
                reply: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextModel for StubModel {
        async fn generate(&self, request: GenerateRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request);
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(ChatError::Generation("stub failure".to_string())),
            }
        }
    }

    fn orchestrator(model: StubModel) -> (Arc<Store>, Orchestrator, Arc<StubModel>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let model = Arc::new(model);
        let orch = Orchestrator::new(Arc::clone(&store), model.clone() as Arc<dyn TextModel>);
        (store, orch, model)
    }

    #[tokio::test]
    async fn test_empty_text_rejected_without_writes() {
        let (store, orch, _) = orchestrator(StubModel::replying("hi"));

        let result = orch.send_message("u1", None, "   ").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
        assert_eq!(store.count_conversations("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_user_rejected() {
        let (_, orch, _) = orchestrator(StubModel::replying("hi"));
        let result = orch.send_message("", None, "hello").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_new_conversation_created_and_grows_by_two() {
        let (store, orch, _) = orchestrator(StubModel::replying("mirrored reply"));

        let outcome = orch.send_message("u1", None, "hello shadow").await.unwrap();
        let conv = store
            .get_conversation(&outcome.conversation_id)
            .unwrap()
            .unwrap();

        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].sender, Sender::User);
        assert_eq!(conv.messages[0].text, "hello shadow");
        assert_eq!(conv.messages[1].sender, Sender::Ai);
        assert_eq!(conv.messages[1].text, "mirrored reply");
        assert_eq!(outcome.reply.text, "mirrored reply");
    }

    #[tokio::test]
    async fn test_existing_conversation_grows_by_two() {
        let (store, orch, _) = orchestrator(StubModel::replying("again"));

        let first = orch.send_message("u1", None, "one").await.unwrap();
        let before = store.count_messages(&first.conversation_id).unwrap();

        orch.send_message("u1", Some(&first.conversation_id), "two")
            .await
            .unwrap();
        let after = store.count_messages(&first.conversation_id).unwrap();

        assert_eq!(after, before + 2);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let (store, orch, _) = orchestrator(StubModel::replying("hi"));

        let result = orch.send_message("u1", Some("no-such-id"), "hello").await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
        assert_eq!(store.count_conversations("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_yields_apology_turn() {
        let (store, orch, _) = orchestrator(StubModel::failing());

        let outcome = orch.send_message("u1", None, "hello?").await.unwrap();
        assert_eq!(outcome.reply.text, APOLOGY_MESSAGE);

        let conv = store
            .get_conversation(&outcome.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].text, APOLOGY_MESSAGE);
        assert_eq!(conv.messages[1].sender, Sender::Ai);
    }

    #[tokio::test]
    async fn test_history_spans_all_conversations() {
        let (_, orch, model) = orchestrator(StubModel::replying("ok"));

        orch.send_message("u1", None, "first topic").await.unwrap();
        orch.send_message("u1", None, "second topic").await.unwrap();

        let requests = model.requests.lock().unwrap();
        let last_prompt = &requests.last().unwrap().prompt;
        assert!(last_prompt.contains("user: first topic"));
        assert!(last_prompt.contains("user: second topic"));
    }

    #[tokio::test]
    async fn test_personality_profile_injected_into_system() {
        let (store, orch, model) = orchestrator(StubModel::replying("ok"));
        store
            .save_user_personality(&crate::store::UserPersonality {
                user_id: "u1".to_string(),
                profile: "loves semicolons".to_string(),
                writing_style: None,
                tone: None,
                response_patterns: None,
            })
            .unwrap();

        orch.send_message("u1", None, "hi").await.unwrap();

        let requests = model.requests.lock().unwrap();
        let system = requests[0].system.as_deref().unwrap();
        assert!(system.contains("loves semicolons"));
    }
}
