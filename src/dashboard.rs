use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ChatError, Result};
use crate::flows::{self, ANALYSIS_PLACEHOLDER, FALLBACK_PROJECTION};
use crate::gemini::TextModel;
use crate::logging;
use crate::store::{Message, Sender, Store};

/// Analysis only runs once the user has more than this many messages.
const ANALYSIS_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayActivity {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SenderSlice {
    pub name: String,
    pub value: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardAnalysis {
    pub writing_style: String,
    pub tone: String,
    pub response_patterns: String,
    pub future_projection: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub user_messages: usize,
    pub ai_messages: usize,
    pub weekly_activity: Vec<DayActivity>,
    pub sender_distribution: Vec<SenderSlice>,
    pub key_topic: String,
    pub analysis: Option<DashboardAnalysis>,
}

pub struct Dashboard {
    store: Arc<Store>,
    model: Arc<dyn TextModel>,
}

impl Dashboard {
    pub fn new(store: Arc<Store>, model: Arc<dyn TextModel>) -> Self {
        Self { store, model }
    }

    pub async fn get_dashboard_data(&self, user_id: &str) -> Result<DashboardData> {
        if user_id.trim().is_empty() {
            return Err(ChatError::validation("user_id must not be empty"));
        }

        let messages = self.store.messages_for_user(user_id)?;
        let mut data = aggregate_messages(&messages, Utc::now());
        data.total_conversations = self.store.count_conversations(user_id)?;

        logging::log_dashboard(&format!(
            "Aggregated {} messages across {} conversations",
            data.total_messages, data.total_conversations
        ));

        if data.total_messages > ANALYSIS_THRESHOLD {
            let history = render_history(&messages);

            // Both analyses are independent; run them concurrently and let
            // each branch degrade to its placeholder on its own.
            let (analysis, projection) = tokio::join!(
                flows::analyze_conversation_patterns(self.model.as_ref(), &history),
                flows::project_future_self(self.model.as_ref(), &history),
            );

            let (writing_style, tone, response_patterns) = match analysis {
                Ok(a) => (
                    a.writing_style
                        .unwrap_or_else(|| ANALYSIS_PLACEHOLDER.to_string()),
                    a.tone.unwrap_or_else(|| ANALYSIS_PLACEHOLDER.to_string()),
                    a.response_patterns
                        .unwrap_or_else(|| ANALYSIS_PLACEHOLDER.to_string()),
                ),
                Err(e) => {
                    logging::log_error(None, &format!("Pattern analysis failed: {}", e));
                    (
                        ANALYSIS_PLACEHOLDER.to_string(),
                        ANALYSIS_PLACEHOLDER.to_string(),
                        ANALYSIS_PLACEHOLDER.to_string(),
                    )
                }
            };

            let future_projection = match projection {
                Ok(p) => p.projection,
                Err(e) => {
                    logging::log_error(None, &format!("Future projection failed: {}", e));
                    FALLBACK_PROJECTION.to_string()
                }
            };

            data.analysis = Some(DashboardAnalysis {
                writing_style,
                tone,
                response_patterns,
                future_projection,
            });
        }

        Ok(data)
    }
}

/// Pure aggregation over a user's messages, relative to `now`.
pub fn aggregate_messages(messages: &[Message], now: DateTime<Utc>) -> DashboardData {
    let user_messages = messages.iter().filter(|m| m.sender == Sender::User).count();
    let ai_messages = messages.len() - user_messages;

    let user_texts: Vec<&str> = messages
        .iter()
        .filter(|m| m.sender == Sender::User)
        .map(|m| m.text.as_str())
        .collect();

    DashboardData {
        // Filled in by the caller, which owns the store handle.
        total_conversations: 0,
        total_messages: messages.len(),
        user_messages,
        ai_messages,
        weekly_activity: weekly_buckets(messages, now),
        sender_distribution: vec![
            SenderSlice {
                name: "User".to_string(),
                value: user_messages,
            },
            SenderSlice {
                name: "AI".to_string(),
                value: ai_messages,
            },
        ],
        key_topic: flows::extract_key_topic(&user_texts),
        analysis: None,
    }
}

/// Seven buckets ending today; index 6 is today, index 0 six days ago.
fn weekly_buckets(messages: &[Message], now: DateTime<Utc>) -> Vec<DayActivity> {
    let today = now.date_naive();
    let mut buckets: Vec<DayActivity> = (0..7)
        .map(|i| {
            let day = today - chrono::Duration::days(6 - i);
            DayActivity {
                label: format!("{} {}", month_abbrev(day.month()), day.day()),
                count: 0,
            }
        })
        .collect();

    for message in messages {
        let Ok(created) = DateTime::parse_from_rfc3339(&message.created_at) else {
            continue;
        };
        let diff = (today - created.with_timezone(&Utc).date_naive()).num_days();
        if (0..7).contains(&diff) {
            buckets[(6 - diff) as usize].count += 1;
        }
    }

    buckets
}

fn month_abbrev(month: u32) -> &'static str {
    match month {
        1 => "Jan",
        2 => "Feb",
        3 => "Mar",
        4 => "Apr",
        5 => "May",
        6 => "Jun",
        7 => "Jul",
        8 => "Aug",
        9 => "Sep",
        10 => "Oct",
        11 => "Nov",
        12 => "Dec",
        _ => "?",
    }
}

fn render_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.sender.as_str(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::GenerateRequest;
    use crate::store::new_message;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubModel {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn replying(reply: &str) -> Self {
            StubModel {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            StubModel {
                reply: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextModel for StubModel {
        async fn generate(&self, _request: GenerateRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(ChatError::Generation("stub failure".to_string())),
            }
        }
    }

    fn message_at(sender: Sender, text: &str, created_at: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: "c1".to_string(),
            text: text.to_string(),
            sender,
            created_at: created_at.to_string(),
        }
    }

    fn seeded_store(user_count: usize, ai_count: usize) -> Arc<Store> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let first = new_message("c1", Sender::User, "seed message");
        store.create_conversation("u1", &first).unwrap();
        for i in 1..user_count {
            store
                .append_message("c1", &new_message("c1", Sender::User, &format!("u{}", i)))
                .unwrap();
        }
        for i in 0..ai_count {
            store
                .append_message("c1", &new_message("c1", Sender::Ai, &format!("a{}", i)))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_counts_and_distribution() {
        let messages = vec![
            message_at(Sender::User, "a", "2024-05-01T00:00:00+00:00"),
            message_at(Sender::User, "b", "2024-05-01T01:00:00+00:00"),
            message_at(Sender::User, "c", "2024-05-01T02:00:00+00:00"),
            message_at(Sender::User, "d", "2024-05-01T03:00:00+00:00"),
            message_at(Sender::Ai, "e", "2024-05-01T04:00:00+00:00"),
            message_at(Sender::Ai, "f", "2024-05-01T05:00:00+00:00"),
        ];
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let data = aggregate_messages(&messages, now);
        assert_eq!(data.total_messages, 6);
        assert_eq!(data.user_messages, 4);
        assert_eq!(data.ai_messages, 2);
        assert_eq!(data.sender_distribution[0].name, "User");
        assert_eq!(data.sender_distribution[0].value, 4);
        assert_eq!(data.sender_distribution[1].name, "AI");
        assert_eq!(data.sender_distribution[1].value, 2);
    }

    #[test]
    fn test_weekly_buckets_placement() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let messages = vec![
            // Today -> bucket 6
            message_at(Sender::User, "today", "2024-05-10T08:00:00+00:00"),
            // Six days ago -> bucket 0
            message_at(Sender::User, "old", "2024-05-04T08:00:00+00:00"),
            // Eight days ago -> outside the window
            message_at(Sender::User, "ancient", "2024-05-02T08:00:00+00:00"),
        ];

        let data = aggregate_messages(&messages, now);
        assert_eq!(data.weekly_activity.len(), 7);
        assert_eq!(data.weekly_activity[6].count, 1);
        assert_eq!(data.weekly_activity[6].label, "May 10");
        assert_eq!(data.weekly_activity[0].count, 1);
        assert_eq!(data.weekly_activity[0].label, "May 4");
        let total_bucketed: usize = data.weekly_activity.iter().map(|d| d.count).sum();
        assert_eq!(total_bucketed, 2);
    }

    #[test]
    fn test_empty_history_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let data = aggregate_messages(&[], now);
        assert_eq!(data.total_messages, 0);
        assert_eq!(data.key_topic, "General Well-being");
        assert!(data.analysis.is_none());
    }

    #[tokio::test]
    async fn test_analysis_skipped_at_threshold() {
        // Exactly five messages must NOT trigger the model.
        let store = seeded_store(3, 2);
        let model = Arc::new(StubModel::replying("{}"));
        let dashboard = Dashboard::new(store, model.clone() as Arc<dyn TextModel>);

        let data = dashboard.get_dashboard_data("u1").await.unwrap();
        assert_eq!(data.total_messages, 5);
        assert!(data.analysis.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analysis_runs_above_threshold() {
        let store = seeded_store(4, 2);
        let reply = r#"{"writingStyle": "terse", "tone": "dry", "responsePatterns": "short"}"#;
        let model = Arc::new(StubModel::replying(reply));
        let dashboard = Dashboard::new(store, model.clone() as Arc<dyn TextModel>);

        let data = dashboard.get_dashboard_data("u1").await.unwrap();
        assert_eq!(data.total_messages, 6);
        assert_eq!(data.total_conversations, 1);
        // One call per branch of the join.
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        let analysis = data.analysis.unwrap();
        assert_eq!(analysis.writing_style, "terse");
        assert_eq!(analysis.tone, "dry");
    }

    #[tokio::test]
    async fn test_analysis_failure_degrades_to_placeholders() {
        let store = seeded_store(4, 2);
        let model = Arc::new(StubModel::failing());
        let dashboard = Dashboard::new(store, model as Arc<dyn TextModel>);

        let data = dashboard.get_dashboard_data("u1").await.unwrap();
        let analysis = data.analysis.unwrap();
        assert_eq!(analysis.writing_style, ANALYSIS_PLACEHOLDER);
        assert_eq!(analysis.tone, ANALYSIS_PLACEHOLDER);
        assert_eq!(analysis.response_patterns, ANALYSIS_PLACEHOLDER);
        assert_eq!(analysis.future_projection, FALLBACK_PROJECTION);
    }

    #[tokio::test]
    async fn test_empty_user_rejected() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let model = Arc::new(StubModel::replying("{}"));
        let dashboard = Dashboard::new(store, model as Arc<dyn TextModel>);

        let result = dashboard.get_dashboard_data(" ").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[test]
    fn test_serialized_field_names() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let data = aggregate_messages(&[], now);
        let json = serde_json::to_value(&data).unwrap();
        assert!(json.get("totalMessages").is_some());
        assert!(json.get("weeklyActivity").is_some());
        assert!(json.get("keyTopic").is_some());
    }
}
