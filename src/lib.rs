pub mod dashboard;
pub mod error;
pub mod flows;
pub mod gemini;
pub mod logging;
pub mod orchestrator;
pub mod store;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

pub use crate::dashboard::{Dashboard, DashboardData};
pub use crate::error::{ChatError, Result};
pub use crate::gemini::{GeminiClient, TextModel, GEMINI_FLASH};
pub use crate::orchestrator::{Orchestrator, SendOutcome};
pub use crate::store::{Conversation, ConversationListing, Message, Sender, Store, User};

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub gemini_api_key: String,
    pub gemini_model: String,
}

impl Config {
    /// SHADOWLINK_DB and GEMINI_MODEL have defaults; GEMINI_API_KEY is required.
    pub fn from_env() -> Result<Config> {
        let db_path = match std::env::var("SHADOWLINK_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_db_path(),
        };
        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ChatError::validation("GEMINI_API_KEY is not set"))?;
        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| GEMINI_FLASH.to_string());

        Ok(Config {
            db_path,
            gemini_api_key,
            gemini_model,
        })
    }
}

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".shadowlink").join("shadowlink.db")
}

/// Envelope every action returns, so callers never have to match on error types.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(e: ChatError) -> Self {
        logging::log_error(None, &e.to_string());
        ApiResponse {
            success: false,
            data: None,
            error: Some(e.to_string()),
        }
    }

    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::err(e),
        }
    }
}

/// Application root: owns the store and model, exposes the action surface.
pub struct ShadowLink {
    store: Arc<Store>,
    model: Arc<dyn TextModel>,
    orchestrator: Orchestrator,
    dashboard: Dashboard,
}

impl ShadowLink {
    pub fn new(config: &Config) -> Result<ShadowLink> {
        if let Err(e) = logging::init_logging() {
            eprintln!("Failed to initialize logging: {}", e);
        }
        let _ = logging::cleanup_old_logs();

        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ChatError::Generation(format!("Failed to create data dir: {}", e)))?;
        }

        let store = Arc::new(Store::open(&config.db_path)?);
        let model: Arc<dyn TextModel> = Arc::new(GeminiClient::new(
            &config.gemini_api_key,
            &config.gemini_model,
        ));

        Ok(ShadowLink::with_parts(store, model))
    }

    /// Assemble from pre-built parts; tests use this with a stub model.
    pub fn with_parts(store: Arc<Store>, model: Arc<dyn TextModel>) -> ShadowLink {
        let orchestrator = Orchestrator::new(Arc::clone(&store), Arc::clone(&model));
        let dashboard = Dashboard::new(Arc::clone(&store), Arc::clone(&model));
        ShadowLink {
            store,
            model,
            orchestrator,
            dashboard,
        }
    }

    pub async fn send_message(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        text: &str,
    ) -> ApiResponse<SendOutcome> {
        ApiResponse::from_result(self.orchestrator.send_message(user_id, conversation_id, text).await)
    }

    pub fn get_conversations(&self, user_id: &str) -> ApiResponse<Vec<ConversationListing>> {
        ApiResponse::from_result(self.store.list_conversations(user_id))
    }

    pub fn get_conversation(&self, conversation_id: &str) -> ApiResponse<Conversation> {
        let result = self.store.get_conversation(conversation_id).and_then(|c| {
            c.ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))
        });
        ApiResponse::from_result(result)
    }

    pub async fn get_dashboard_data(&self, user_id: &str) -> ApiResponse<DashboardData> {
        ApiResponse::from_result(self.dashboard.get_dashboard_data(user_id).await)
    }

    pub fn create_user(
        &self,
        uid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> ApiResponse<User> {
        if uid.trim().is_empty() {
            return ApiResponse::err(ChatError::validation("uid must not be empty"));
        }
        ApiResponse::from_result(self.store.create_user(uid, email, display_name, photo_url))
    }

    /// Build and persist the user's style profile. Uses the supplied
    /// self-description when given, otherwise the user's full history.
    pub async fn generate_personality(
        &self,
        user_id: &str,
        description: Option<&str>,
    ) -> ApiResponse<store::UserPersonality> {
        ApiResponse::from_result(self.generate_personality_inner(user_id, description).await)
    }

    async fn generate_personality_inner(
        &self,
        user_id: &str,
        description: Option<&str>,
    ) -> Result<store::UserPersonality> {
        if user_id.trim().is_empty() {
            return Err(ChatError::validation("user_id must not be empty"));
        }

        let history = match description {
            Some(d) if !d.trim().is_empty() => d.to_string(),
            _ => {
                let messages = self.store.messages_for_user(user_id)?;
                if messages.is_empty() {
                    return Err(ChatError::NotFound(format!(
                        "no messages for user {}",
                        user_id
                    )));
                }
                messages
                    .iter()
                    .map(|m| format!("{}: {}", m.sender.as_str(), m.text))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        let (profile, analysis) = tokio::join!(
            flows::generate_initial_personality(self.model.as_ref(), &history),
            flows::analyze_conversation_patterns(self.model.as_ref(), &history),
        );
        let profile = profile?;

        // The analysis fields are best-effort enrichment.
        let analysis = analysis.ok();
        let personality = store::UserPersonality {
            user_id: user_id.to_string(),
            profile,
            writing_style: analysis.as_ref().and_then(|a| a.writing_style.clone()),
            tone: analysis.as_ref().and_then(|a| a.tone.clone()),
            response_patterns: analysis.as_ref().and_then(|a| a.response_patterns.clone()),
        };
        self.store.save_user_personality(&personality)?;

        logging::log_flow(None, &format!("Saved personality profile for {}", user_id));

        Ok(personality)
    }
}
