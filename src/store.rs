//! SQLite-backed conversation and bot store.
//!
//! A conversation is one row per (channel, version). The live one for a
//! channel is `version = latest, status = active`; resetting it stamps the
//! version with the reset time and marks it completed, so older segments stay
//! queryable. Messages hang off their conversation row in insertion order.
//!
//! Bots are keyed by a fixed string id and carry the channels they listen on.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{Local, NaiveDateTime, Utc};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{format_wire_time, parse_wire_time, preview, Breadcrumb, DocumentId, LlmMessage, Token};

pub(crate) const LATEST_VERSION: &str = "latest";
pub(crate) const ACTIVE_STATUS: &str = "active";
pub(crate) const COMPLETED_STATUS: &str = "complete";
pub(crate) const DEFAULT_MAX_MESSAGES: usize = 1000;
pub(crate) const DEFAULT_BOT_ID: &str = "bbb000000000000000000001";

const RESET_VERSION_FORMAT: &str = "%Y-%m-%d%H:%M:%S";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id TEXT NOT NULL,
    version TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_saved TEXT
);
CREATE INDEX IF NOT EXISTS idx_conversations_live
    ON conversations(channel_id, version, status);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    role TEXT NOT NULL,
    content TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, id);
CREATE TABLE IF NOT EXISTS bots (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    channels TEXT NOT NULL,
    last_saved TEXT
);
";

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("store path error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid channel pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Named Conversation {0} was not found")]
    NamedNotFound(String),
    #[error("Bot {0} was not found")]
    BotNotFound(String),
    #[error("stored timestamp is invalid: {0}")]
    Timestamp(String),
    #[error("conversation store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ConversationSummary {
    #[serde(rename = "_id")]
    pub(crate) id: DocumentId,
    pub(crate) channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Conversation {
    #[serde(rename = "_id")]
    pub(crate) id: DocumentId,
    pub(crate) channel_id: String,
    pub(crate) status: String,
    pub(crate) version: String,
    #[serde(with = "crate::types::wire_time")]
    pub(crate) created_at: NaiveDateTime,
    pub(crate) last_saved: Option<Breadcrumb>,
    pub(crate) messages: Vec<LlmMessage>,
}

/// Fields `update_conversation` may set. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ConversationPatch {
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) version: Option<String>,
    #[serde(default)]
    pub(crate) messages: Option<Vec<LlmMessage>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BotSummary {
    #[serde(rename = "_id")]
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Bot {
    #[serde(rename = "_id")]
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) status: String,
    pub(crate) channels: Vec<String>,
    pub(crate) last_saved: Option<Breadcrumb>,
}

/// Fields `update_bot` may set. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BotPatch {
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) channels: Option<Vec<String>>,
}

pub(crate) struct ConversationStore {
    conn: Mutex<Connection>,
    max_messages: usize,
}

impl ConversationStore {
    pub(crate) fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    pub(crate) fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_messages: DEFAULT_MAX_MESSAGES,
        })
    }

    pub(crate) fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Live conversations, one per channel.
    pub(crate) fn get_conversations(&self, _token: &Token) -> Result<Vec<ConversationSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, channel_id FROM conversations
             WHERE version = ?1 AND status = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![LATEST_VERSION, ACTIVE_STATUS], |row| {
            Ok(ConversationSummary {
                id: DocumentId(row.get(0)?),
                channel_id: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every conversation segment, live or not, whose channel matches `query`.
    /// A missing or blank query matches everything.
    pub(crate) fn find_conversations(
        &self,
        query: Option<&str>,
        _token: &Token,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let pattern = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => Some(Regex::new(q)?),
            None => None,
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, channel_id FROM conversations ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ConversationSummary {
                id: DocumentId(row.get(0)?),
                channel_id: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for summary in rows {
            let summary = summary?;
            if pattern.as_ref().is_none_or(|p| p.is_match(&summary.channel_id)) {
                out.push(summary);
            }
        }
        Ok(out)
    }

    /// The channel's live conversation, created empty when there is none.
    pub(crate) fn get_conversation(
        &self,
        channel_id: &str,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Conversation, StoreError> {
        let conn = self.lock()?;
        let id = ensure_live(&conn, channel_id, breadcrumb)?;
        load_conversation(&conn, id)
    }

    /// Applies `patch` to the live conversation. `None` when the channel has
    /// no live conversation.
    pub(crate) fn update_conversation(
        &self,
        channel_id: &str,
        patch: &ConversationPatch,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Option<Conversation>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(id) = live_id(&tx, channel_id)? else {
            return Ok(None);
        };
        if let Some(status) = &patch.status {
            tx.execute("UPDATE conversations SET status = ?1 WHERE id = ?2", params![status, id])?;
        }
        if let Some(version) = &patch.version {
            tx.execute("UPDATE conversations SET version = ?1 WHERE id = ?2", params![version, id])?;
        }
        if let Some(messages) = &patch.messages {
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
            insert_messages(&tx, id, messages)?;
        }
        stamp(&tx, id, breadcrumb)?;
        let conversation = load_conversation(&tx, id)?;
        tx.commit()?;
        Ok(Some(conversation))
    }

    /// Appends one message and returns the whole history including it. A
    /// conversation already past `max_messages` is reset first, so the
    /// message starts a fresh one.
    pub(crate) fn add_message(
        &self,
        channel_id: &str,
        message: &LlmMessage,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Vec<LlmMessage>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut id = ensure_live(&tx, channel_id, breadcrumb)?;
        if message_count(&tx, id)? > self.max_messages {
            tracing::info!(%channel_id, max_messages = self.max_messages, "conversation full, rolling over");
            reset_live(&tx, channel_id, breadcrumb)?;
            id = ensure_live(&tx, channel_id, breadcrumb)?;
        }
        insert_messages(&tx, id, std::slice::from_ref(message))?;
        stamp(&tx, id, breadcrumb)?;
        let messages = load_messages(&tx, id)?;
        tx.commit()?;
        tracing::info!(
            %channel_id,
            role = %message.role,
            content = %preview(&message.content, 60),
            "message added"
        );
        Ok(messages)
    }

    /// Retires the live conversation. `None` when there was nothing to reset.
    pub(crate) fn reset_conversation(
        &self,
        channel_id: &str,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Option<Conversation>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let reset = match reset_live(&tx, channel_id, breadcrumb)? {
            Some(id) => Some(load_conversation(&tx, id)?),
            None => None,
        };
        tx.commit()?;
        tracing::info!(%channel_id, reset = reset.is_some(), "conversation reset");
        Ok(reset)
    }

    /// Appends the messages of `named`'s live conversation to this channel's.
    pub(crate) fn load_named_conversation(
        &self,
        channel_id: &str,
        named: &str,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Conversation, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let sources = live_ids(&tx, named)?;
        let Some(&source) = sources.first() else {
            return Err(StoreError::NamedNotFound(named.to_string()));
        };
        if sources.len() > 1 {
            tracing::warn!(named, count = sources.len(), "non-unique named conversation");
        }
        let messages = load_messages(&tx, source)?;
        let target = ensure_live(&tx, channel_id, breadcrumb)?;
        insert_messages(&tx, target, &messages)?;
        stamp(&tx, target, breadcrumb)?;
        let conversation = load_conversation(&tx, target)?;
        tx.commit()?;
        tracing::info!(named, %channel_id, loaded = messages.len(), "named conversation loaded");
        Ok(conversation)
    }

    /// Inserts the bot when its id is not known yet and returns the stored row.
    pub(crate) fn ensure_bot(
        &self,
        bot_id: &str,
        name: &str,
        description: &str,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Bot, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO bots (id, name, description, status, channels, last_saved)
             VALUES (?1, ?2, ?3, ?4, '[]', ?5)",
            params![bot_id, name, description, ACTIVE_STATUS, serde_json::to_string(breadcrumb)?],
        )?;
        if inserted > 0 {
            tracing::info!(%bot_id, name, "bot created");
        }
        load_bot(&conn, bot_id)
    }

    /// Active bots whose name matches `query`. A blank query matches all.
    pub(crate) fn get_bots(&self, query: Option<&str>, _token: &Token) -> Result<Vec<BotSummary>, StoreError> {
        let pattern = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => Some(Regex::new(q)?),
            None => None,
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, description FROM bots WHERE status = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![ACTIVE_STATUS], |row| {
            Ok(BotSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for summary in rows {
            let summary = summary?;
            if pattern.as_ref().is_none_or(|p| p.is_match(&summary.name)) {
                out.push(summary);
            }
        }
        Ok(out)
    }

    pub(crate) fn get_bot(&self, bot_id: &str, _token: &Token) -> Result<Bot, StoreError> {
        let conn = self.lock()?;
        load_bot(&conn, bot_id)
    }

    pub(crate) fn update_bot(
        &self,
        bot_id: &str,
        patch: &BotPatch,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Bot, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut bot = load_bot(&tx, bot_id)?;
        if let Some(name) = &patch.name {
            bot.name = name.clone();
        }
        if let Some(description) = &patch.description {
            bot.description = description.clone();
        }
        if let Some(status) = &patch.status {
            bot.status = status.clone();
        }
        if let Some(channels) = &patch.channels {
            bot.channels = channels.clone();
        }
        save_bot(&tx, &bot, breadcrumb)?;
        let bot = load_bot(&tx, bot_id)?;
        tx.commit()?;
        Ok(bot)
    }

    pub(crate) fn get_channels(&self, bot_id: &str, token: &Token) -> Result<Vec<String>, StoreError> {
        Ok(self.get_bot(bot_id, token)?.channels)
    }

    /// Adds a channel once; adding a known channel is a no-op.
    pub(crate) fn add_channel(
        &self,
        bot_id: &str,
        channel_id: &str,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Vec<String>, StoreError> {
        self.edit_channels(bot_id, breadcrumb, |channels| {
            if !channels.iter().any(|c| c == channel_id) {
                channels.push(channel_id.to_string());
            }
        })
    }

    pub(crate) fn remove_channel(
        &self,
        bot_id: &str,
        channel_id: &str,
        _token: &Token,
        breadcrumb: &Breadcrumb,
    ) -> Result<Vec<String>, StoreError> {
        self.edit_channels(bot_id, breadcrumb, |channels| channels.retain(|c| c != channel_id))
    }

    fn edit_channels<F>(&self, bot_id: &str, breadcrumb: &Breadcrumb, edit: F) -> Result<Vec<String>, StoreError>
    where
        F: FnOnce(&mut Vec<String>),
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut bot = load_bot(&tx, bot_id)?;
        edit(&mut bot.channels);
        save_bot(&tx, &bot, breadcrumb)?;
        tx.commit()?;
        tracing::info!(%bot_id, channels = ?bot.channels, "bot channels updated");
        Ok(bot.channels)
    }
}

fn load_bot(conn: &Connection, bot_id: &str) -> Result<Bot, StoreError> {
    let row: Option<(String, String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT name, description, status, channels, last_saved FROM bots WHERE id = ?1",
            params![bot_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    let Some((name, description, status, channels, last_saved)) = row else {
        return Err(StoreError::BotNotFound(bot_id.to_string()));
    };
    let last_saved = match last_saved {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(Bot {
        id: bot_id.to_string(),
        name,
        description,
        status,
        channels: serde_json::from_str(&channels)?,
        last_saved,
    })
}

fn save_bot(conn: &Connection, bot: &Bot, breadcrumb: &Breadcrumb) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE bots SET name = ?1, description = ?2, status = ?3, channels = ?4, last_saved = ?5 WHERE id = ?6",
        params![
            bot.name,
            bot.description,
            bot.status,
            serde_json::to_string(&bot.channels)?,
            serde_json::to_string(breadcrumb)?,
            bot.id,
        ],
    )?;
    Ok(())
}

fn live_ids(conn: &Connection, channel_id: &str) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM conversations
         WHERE channel_id = ?1 AND version = ?2 AND status = ?3 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![channel_id, LATEST_VERSION, ACTIVE_STATUS], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

fn live_id(conn: &Connection, channel_id: &str) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM conversations
             WHERE channel_id = ?1 AND version = ?2 AND status = ?3 ORDER BY id LIMIT 1",
            params![channel_id, LATEST_VERSION, ACTIVE_STATUS],
            |row| row.get(0),
        )
        .optional()?)
}

fn ensure_live(conn: &Connection, channel_id: &str, breadcrumb: &Breadcrumb) -> Result<i64, StoreError> {
    if let Some(id) = live_id(conn, channel_id)? {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO conversations (channel_id, version, status, created_at, last_saved)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            channel_id,
            LATEST_VERSION,
            ACTIVE_STATUS,
            format_wire_time(&Utc::now().naive_utc()),
            serde_json::to_string(breadcrumb)?,
        ],
    )?;
    tracing::debug!(%channel_id, "conversation created");
    Ok(conn.last_insert_rowid())
}

fn reset_live(conn: &Connection, channel_id: &str, breadcrumb: &Breadcrumb) -> Result<Option<i64>, StoreError> {
    let Some(id) = live_id(conn, channel_id)? else {
        return Ok(None);
    };
    conn.execute(
        "UPDATE conversations SET version = ?1, status = ?2, last_saved = ?3 WHERE id = ?4",
        params![
            Local::now().format(RESET_VERSION_FORMAT).to_string(),
            COMPLETED_STATUS,
            serde_json::to_string(breadcrumb)?,
            id,
        ],
    )?;
    Ok(Some(id))
}

fn stamp(conn: &Connection, id: i64, breadcrumb: &Breadcrumb) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE conversations SET last_saved = ?1 WHERE id = ?2",
        params![serde_json::to_string(breadcrumb)?, id],
    )?;
    Ok(())
}

fn message_count(conn: &Connection, id: i64) -> Result<usize, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn insert_messages(conn: &Connection, id: i64, messages: &[LlmMessage]) -> Result<(), StoreError> {
    let mut stmt = conn.prepare("INSERT INTO messages (conversation_id, role, content) VALUES (?1, ?2, ?3)")?;
    for message in messages {
        stmt.execute(params![id, message.role, message.content])?;
    }
    Ok(())
}

fn load_messages(conn: &Connection, id: i64) -> Result<Vec<LlmMessage>, StoreError> {
    let mut stmt = conn.prepare("SELECT role, content FROM messages WHERE conversation_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(LlmMessage {
            role: row.get(0)?,
            content: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_conversation(conn: &Connection, id: i64) -> Result<Conversation, StoreError> {
    let (channel_id, version, status, created_at, last_saved): (String, String, String, String, Option<String>) =
        conn.query_row(
            "SELECT channel_id, version, status, created_at, last_saved FROM conversations WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;
    let created_at = parse_wire_time(&created_at).ok_or(StoreError::Timestamp(created_at))?;
    let last_saved = match last_saved {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(Conversation {
        id: DocumentId(id),
        channel_id,
        status,
        version,
        created_at,
        last_saved,
        messages: load_messages(conn, id)?,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{create_breadcrumb, create_echo_token};

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("echobot_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("test_{}_{name}.sqlite", std::process::id()))
    }

    fn fixture() -> (ConversationStore, Token, Breadcrumb) {
        let token = create_echo_token();
        let crumb = create_breadcrumb(&token, "127.0.0.1");
        (ConversationStore::open_in_memory().unwrap(), token, crumb)
    }

    #[test]
    fn get_conversation_creates_when_missing() {
        let (store, token, crumb) = fixture();
        let conversation = store.get_conversation("chan", &token, &crumb).unwrap();
        assert_eq!(conversation.channel_id, "chan");
        assert_eq!(conversation.version, LATEST_VERSION);
        assert_eq!(conversation.status, ACTIVE_STATUS);
        assert!(conversation.messages.is_empty());
        let saved = conversation.last_saved.as_ref().unwrap();
        assert_eq!(saved.correlation_id, crumb.correlation_id);
        let again = store.get_conversation("chan", &token, &crumb).unwrap();
        assert_eq!(again.id, conversation.id);
    }

    #[test]
    fn add_message_returns_full_history() {
        let (store, token, crumb) = fixture();
        let first = store.add_message("chan", &LlmMessage::new("user", "one"), &token, &crumb).unwrap();
        assert_eq!(first.len(), 1);
        let second = store.add_message("chan", &LlmMessage::new("assistant", "two"), &token, &crumb).unwrap();
        assert_eq!(second, vec![LlmMessage::new("user", "one"), LlmMessage::new("assistant", "two")]);
        let other = store.add_message("other", &LlmMessage::new("user", "x"), &token, &crumb).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn full_conversation_rolls_over() {
        let (store, token, crumb) = fixture();
        let store = store.with_max_messages(2);
        for text in ["a", "b", "c"] {
            store.add_message("chan", &LlmMessage::new("user", text), &token, &crumb).unwrap();
        }
        let history = store.add_message("chan", &LlmMessage::new("user", "d"), &token, &crumb).unwrap();
        assert_eq!(history, vec![LlmMessage::new("user", "d")]);
        let all = store.find_conversations(Some("^chan$"), &token).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.get_conversations(&token).unwrap().len(), 1);
    }

    #[test]
    fn reset_retires_the_live_conversation() {
        let (store, token, crumb) = fixture();
        assert!(store.reset_conversation("chan", &token, &crumb).unwrap().is_none());
        store.add_message("chan", &LlmMessage::new("user", "hello"), &token, &crumb).unwrap();
        let reset = store.reset_conversation("chan", &token, &crumb).unwrap().unwrap();
        assert_eq!(reset.status, COMPLETED_STATUS);
        assert_ne!(reset.version, LATEST_VERSION);
        assert_eq!(reset.version.len(), "2025-03-0512:34:56".len());
        assert_eq!(reset.messages.len(), 1);
        let fresh = store.get_conversation("chan", &token, &crumb).unwrap();
        assert_ne!(fresh.id, reset.id);
        assert!(fresh.messages.is_empty());
    }

    #[test]
    fn update_applies_patch_fields() {
        let (store, token, crumb) = fixture();
        assert!(store
            .update_conversation("chan", &ConversationPatch::default(), &token, &crumb)
            .unwrap()
            .is_none());
        store.add_message("chan", &LlmMessage::new("user", "hello"), &token, &crumb).unwrap();
        let patch: ConversationPatch =
            serde_json::from_value(serde_json::json!({"messages": [{"role": "user", "content": "replaced"}]})).unwrap();
        let updated = store.update_conversation("chan", &patch, &token, &crumb).unwrap().unwrap();
        assert_eq!(updated.messages, vec![LlmMessage::new("user", "replaced")]);
        let patch = ConversationPatch {
            status: Some(COMPLETED_STATUS.to_string()),
            ..ConversationPatch::default()
        };
        let updated = store.update_conversation("chan", &patch, &token, &crumb).unwrap().unwrap();
        assert_eq!(updated.status, COMPLETED_STATUS);
        assert!(store.get_conversations(&token).unwrap().is_empty());
    }

    #[test]
    fn find_filters_by_pattern() {
        let (store, token, crumb) = fixture();
        for channel in ["Test_1", "Test_2", "prod"] {
            store.get_conversation(channel, &token, &crumb).unwrap();
        }
        let names: Vec<String> = store
            .find_conversations(Some("Test"), &token)
            .unwrap()
            .into_iter()
            .map(|c| c.channel_id)
            .collect();
        assert_eq!(names, vec!["Test_1", "Test_2"]);
        assert_eq!(store.find_conversations(None, &token).unwrap().len(), 3);
        assert!(matches!(store.find_conversations(Some("("), &token), Err(StoreError::Pattern(_))));
    }

    #[test]
    fn load_named_copies_messages() {
        let (store, token, crumb) = fixture();
        store.add_message("template", &LlmMessage::new("user", "Hello"), &token, &crumb).unwrap();
        store.add_message("template", &LlmMessage::new("assistant", "Hi"), &token, &crumb).unwrap();
        store.add_message("chan", &LlmMessage::new("user", "first"), &token, &crumb).unwrap();
        let loaded = store.load_named_conversation("chan", "template", &token, &crumb).unwrap();
        assert_eq!(loaded.channel_id, "chan");
        assert_eq!(loaded.messages.len(), 3);
        assert_eq!(loaded.messages[1], LlmMessage::new("user", "Hello"));

        let err = store.load_named_conversation("chan", "missing", &token, &crumb).unwrap_err();
        assert_eq!(err.to_string(), "Named Conversation missing was not found");
    }

    #[test]
    fn summaries_serialize_with_string_ids() {
        let (store, token, crumb) = fixture();
        store.get_conversation("chan", &token, &crumb).unwrap();
        let value = serde_json::to_value(store.get_conversations(&token).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!([{"_id": "000000000000000000000001", "channel_id": "chan"}]));
    }

    #[test]
    fn file_store_persists_across_opens() {
        let path = temp_db_path("persist");
        let _ = std::fs::remove_file(&path);
        let (_, token, crumb) = fixture();
        {
            let store = ConversationStore::open(&path).unwrap();
            store.add_message("chan", &LlmMessage::new("user", "kept"), &token, &crumb).unwrap();
        }
        let store = ConversationStore::open(&path).unwrap();
        let conversation = store.get_conversation("chan", &token, &crumb).unwrap();
        assert_eq!(conversation.messages, vec![LlmMessage::new("user", "kept")]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn bots_are_seeded_once_and_listed_by_name() {
        let (store, token, crumb) = fixture();
        let bot = store.ensure_bot(DEFAULT_BOT_ID, "Echo", "Test bot", &token, &crumb).unwrap();
        assert_eq!(bot.status, ACTIVE_STATUS);
        assert!(bot.channels.is_empty());
        let again = store.ensure_bot(DEFAULT_BOT_ID, "Renamed", "ignored", &token, &crumb).unwrap();
        assert_eq!(again.name, "Echo");
        store.ensure_bot("bbb000000000000000000002", "Fran", "Other", &token, &crumb).unwrap();
        let names: Vec<String> = store.get_bots(Some("^Fr"), &token).unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["Fran"]);
        assert_eq!(store.get_bots(None, &token).unwrap().len(), 2);
        let value = serde_json::to_value(&store.get_bots(Some("Echo"), &token).unwrap()[0]).unwrap();
        assert_eq!(value["_id"], DEFAULT_BOT_ID);
    }

    #[test]
    fn bot_channels_add_once_and_remove() {
        let (store, token, crumb) = fixture();
        store.ensure_bot(DEFAULT_BOT_ID, "Echo", "Test bot", &token, &crumb).unwrap();
        store.add_channel(DEFAULT_BOT_ID, "general", &token, &crumb).unwrap();
        let channels = store.add_channel(DEFAULT_BOT_ID, "general", &token, &crumb).unwrap();
        assert_eq!(channels, vec!["general"]);
        store.add_channel(DEFAULT_BOT_ID, "random", &token, &crumb).unwrap();
        let channels = store.remove_channel(DEFAULT_BOT_ID, "general", &token, &crumb).unwrap();
        assert_eq!(channels, vec!["random"]);
        assert_eq!(store.get_channels(DEFAULT_BOT_ID, &token).unwrap(), vec!["random"]);
    }

    #[test]
    fn update_bot_applies_patch_and_stamps() {
        let (store, token, crumb) = fixture();
        store.ensure_bot(DEFAULT_BOT_ID, "Echo", "Test bot", &token, &crumb).unwrap();
        let patch = BotPatch {
            description: Some("Updated".into()),
            status: Some("archived".into()),
            ..BotPatch::default()
        };
        let later = create_breadcrumb(&token, "10.0.0.1");
        let bot = store.update_bot(DEFAULT_BOT_ID, &patch, &token, &later).unwrap();
        assert_eq!(bot.name, "Echo");
        assert_eq!(bot.description, "Updated");
        assert_eq!(bot.last_saved.unwrap().from_ip, "10.0.0.1");
        assert!(store.get_bots(None, &token).unwrap().is_empty());
    }

    #[test]
    fn missing_bot_is_an_error() {
        let (store, token, crumb) = fixture();
        let err = store.get_bot("nope", &token).unwrap_err();
        assert_eq!(err.to_string(), "Bot nope was not found");
        assert!(store.add_channel("nope", "general", &token, &crumb).is_err());
    }
}
