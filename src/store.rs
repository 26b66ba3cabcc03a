// Local message history. Nothing here is transmitted; it exists purely so
// a restarted CLI session or UI can replay recent traffic.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::room::ALL_ROOM;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: i64,
    pub direction: String,
    pub room: String,
    pub peer_id: String,
    pub text: String,
    pub created_at: u64,
}

pub trait MessageStore: Send + Sync {
    fn store(&self, direction: &str, room: &str, peer_id: &str, text: &str) -> Message;
    fn messages_since(&self, after_id: i64, room: &str) -> Vec<Message>;
}

pub struct InMemoryStore {
    messages: Mutex<Vec<Message>>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for InMemoryStore {
    fn store(&self, direction: &str, room: &str, peer_id: &str, text: &str) -> Message {
        let message = Message {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            direction: direction.to_string(),
            room: room.to_string(),
            peer_id: peer_id.to_string(),
            text: text.to_string(),
            created_at: now_epoch(),
        };
        self.messages.lock().unwrap().push(message.clone());
        message
    }

    fn messages_since(&self, after_id: i64, room: &str) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.id > after_id && (room == ALL_ROOM || m.room == room))
            .cloned()
            .collect()
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &PathBuf) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = SqliteStore { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn default_path() -> PathBuf {
        let app_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("anonchat");
        let _ = std::fs::create_dir_all(&app_dir);
        app_dir.join("history.db")
    }

    fn run_migrations(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                direction TEXT NOT NULL,
                room TEXT NOT NULL,
                peer_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

impl MessageStore for SqliteStore {
    fn store(&self, direction: &str, room: &str, peer_id: &str, text: &str) -> Message {
        let created_at = now_epoch();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (direction, room, peer_id, text, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![direction, room, peer_id, text, created_at as i64],
        )
        .expect("message insert should not fail");
        Message {
            id: conn.last_insert_rowid(),
            direction: direction.to_string(),
            room: room.to_string(),
            peer_id: peer_id.to_string(),
            text: text.to_string(),
            created_at,
        }
    }

    fn messages_since(&self, after_id: i64, room: &str) -> Vec<Message> {
        let conn = self.conn.lock().unwrap();
        let row_mapper = |row: &rusqlite::Row| {
            Ok(Message {
                id: row.get(0)?,
                direction: row.get(1)?,
                room: row.get(2)?,
                peer_id: row.get(3)?,
                text: row.get(4)?,
                created_at: row.get::<_, i64>(5)? as u64,
            })
        };

        if room == ALL_ROOM {
            let mut stmt = conn
                .prepare(
                    "SELECT id, direction, room, peer_id, text, created_at FROM messages
                     WHERE id > ?1 ORDER BY id ASC",
                )
                .expect("statement should prepare");
            stmt.query_map(params![after_id], row_mapper)
                .expect("query should run")
                .filter_map(Result::ok)
                .collect()
        } else {
            let mut stmt = conn
                .prepare(
                    "SELECT id, direction, room, peer_id, text, created_at FROM messages
                     WHERE id > ?1 AND room = ?2 ORDER BY id ASC",
                )
                .expect("statement should prepare");
            stmt.query_map(params![after_id, room], row_mapper)
                .expect("query should run")
                .filter_map(Result::ok)
                .collect()
        }
    }
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
