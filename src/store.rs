use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{ChatError, Result};
use crate::logging;

/// Maximum number of entries `list_conversations` will return.
pub const CONVERSATION_LIST_CAP: usize = 20;

/// Title length for the sidebar listing, derived from the last message.
const TITLE_MAX_CHARS: usize = 30;

/// Placeholder title for a conversation with no messages yet.
pub const EMPTY_CONVERSATION_TITLE: &str = "New Conversation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }

    pub fn from_str(s: &str) -> Option<Sender> {
        match s {
            "user" => Some(Sender::User),
            "ai" => Some(Sender::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub text: String,
    pub sender: Sender,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub created_at: String,
    pub last_message_at: String,
    pub messages: Vec<Message>,
}

/// Sidebar entry: id plus a short human-readable title.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationListing {
    pub id: String,
    pub title: String,
    pub last_message_at: String,
}

/// Persisted style profile produced by the personality template.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserPersonality {
    pub user_id: String,
    pub profile: String,
    pub writing_style: Option<String>,
    pub tone: Option<String>,
    pub response_patterns: Option<String>,
}

/// Persistence gateway over SQLite.
///
/// Constructed once at process start and injected into every component that
/// needs it. The mutex serializes access; there are no transactions beyond
/// single statements, so a concurrent duplicate create for the same logical
/// "new chat" click can still produce two conversations (known race, accepted).
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Store> {
        let conn = Connection::open(path)?;
        let store = Store {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                -- User identities mirrored from the auth provider
                CREATE TABLE IF NOT EXISTS users (
                    uid TEXT PRIMARY KEY,
                    email TEXT,
                    display_name TEXT,
                    photo_url TEXT,
                    created_at TEXT NOT NULL
                );

                -- Conversation sessions, one owner each
                CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    last_message_at TEXT NOT NULL
                );

                -- Messages; ordering is reconstructed by sorting on created_at
                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    text TEXT NOT NULL,
                    sender TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
                );

                -- Style profile from the personality template
                CREATE TABLE IF NOT EXISTS user_personalities (
                    user_id TEXT PRIMARY KEY,
                    profile TEXT NOT NULL,
                    writing_style TEXT,
                    tone TEXT,
                    response_patterns TEXT
                );
                ",
            )?;
            Ok(())
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ChatError::Generation("store mutex poisoned".to_string()))?;
        f(&conn)
    }

    // ============ Users ============

    pub fn create_user(
        &self,
        uid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<User> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO users (uid, email, display_name, photo_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![uid, email, display_name, photo_url, now],
            )?;
            Ok(User {
                uid: uid.to_string(),
                email: email.map(String::from),
                display_name: display_name.map(String::from),
                photo_url: photo_url.map(String::from),
                created_at: now.clone(),
            })
        })
    }

    pub fn get_user(&self, uid: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    "SELECT uid, email, display_name, photo_url, created_at
                     FROM users WHERE uid = ?1",
                    params![uid],
                    |row| {
                        Ok(User {
                            uid: row.get(0)?,
                            email: row.get(1)?,
                            display_name: row.get(2)?,
                            photo_url: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
    }

    // ============ Conversations ============

    /// Create a conversation seeded with its first message.
    pub fn create_conversation(&self, user_id: &str, first_message: &Message) -> Result<String> {
        let id = first_message.conversation_id.clone();
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, created_at, last_message_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, user_id, now, now],
            )?;
            insert_message(conn, first_message)?;
            Ok(())
        })?;
        logging::log_store(Some(&id), "Created conversation");
        Ok(id)
    }

    /// Append a message and bump the conversation's last-activity time.
    pub fn append_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            insert_message(conn, message)?;
            conn.execute(
                "UPDATE conversations SET last_message_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let header = conn
                .query_row(
                    "SELECT id, user_id, created_at, last_message_at
                     FROM conversations WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, user_id, created_at, last_message_at)) = header else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, text, sender, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let messages = stmt
                .query_map(params![id], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Some(Conversation {
                id,
                user_id,
                created_at,
                last_message_at,
                messages,
            }))
        })
    }

    /// List the user's conversations, newest activity first, capped at 20.
    ///
    /// The title is the last message's text truncated to 30 characters, or a
    /// fixed placeholder when the conversation has no messages.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationListing>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.last_message_at,
                        (SELECT m.text FROM messages m
                         WHERE m.conversation_id = c.id
                         ORDER BY m.created_at DESC LIMIT 1) AS last_text
                 FROM conversations c
                 WHERE c.user_id = ?1
                 ORDER BY c.last_message_at DESC
                 LIMIT ?2",
            )?;

            let listings = stmt
                .query_map(params![user_id, CONVERSATION_LIST_CAP as i64], |row| {
                    let id: String = row.get(0)?;
                    let last_message_at: String = row.get(1)?;
                    let last_text: Option<String> = row.get(2)?;
                    Ok(ConversationListing {
                        id,
                        title: derive_title(last_text.as_deref()),
                        last_message_at,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(listings)
        })
    }

    pub fn count_conversations(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversations WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // ============ Messages ============

    /// All of a user's messages across every conversation, oldest first.
    /// This is the orchestrator's entire "memory" input.
    pub fn messages_for_user(&self, user_id: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.text, m.sender, m.created_at
                 FROM messages m
                 JOIN conversations c ON c.id = m.conversation_id
                 WHERE c.user_id = ?1
                 ORDER BY m.created_at ASC",
            )?;
            let messages = stmt
                .query_map(params![user_id], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // ============ Personality ============

    pub fn save_user_personality(&self, personality: &UserPersonality) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO user_personalities
                 (user_id, profile, writing_style, tone, response_patterns)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    personality.user_id,
                    personality.profile,
                    personality.writing_style,
                    personality.tone,
                    personality.response_patterns
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_personality(&self, user_id: &str) -> Result<Option<UserPersonality>> {
        self.with_conn(|conn| {
            let personality = conn
                .query_row(
                    "SELECT user_id, profile, writing_style, tone, response_patterns
                     FROM user_personalities WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(UserPersonality {
                            user_id: row.get(0)?,
                            profile: row.get(1)?,
                            writing_style: row.get(2)?,
                            tone: row.get(3)?,
                            response_patterns: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(personality)
        })
    }
}

fn insert_message(conn: &Connection, message: &Message) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, text, sender, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.id,
            message.conversation_id,
            message.text,
            message.sender.as_str(),
            message.created_at
        ],
    )?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sender_str: String = row.get(3)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        text: row.get(2)?,
        sender: Sender::from_str(&sender_str).unwrap_or(Sender::Ai),
        created_at: row.get(4)?,
    })
}

fn derive_title(last_text: Option<&str>) -> String {
    match last_text {
        Some(text) => truncate_chars(text, TITLE_MAX_CHARS),
        None => EMPTY_CONVERSATION_TITLE.to_string(),
    }
}

/// Character-safe truncation with a "..." suffix when shortened.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => format!("{}...", &text[..byte_offset]),
        None => text.to_string(),
    }
}

/// Build a new message record stamped with the current time.
pub fn new_message(conversation_id: &str, sender: Sender, text: &str) -> Message {
    Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        text: text.to_string(),
        sender,
        created_at: Utc::now().to_rfc3339(),
    }
}
