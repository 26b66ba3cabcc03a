// Owner-mediated room membership state machine carried over Chat.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chat::Chat;
use crate::error::{AnonchatError, Result};
use crate::identity::Identity;
use crate::store::MessageStore;

pub const ROOM_CTL_PREFIX: &str = "ROOMCTL::";
pub const ROOM_MSG_PREFIX: &str = "ROOMMSG::";
pub const ALL_ROOM: &str = "all";

const MAX_ROOM_EVENTS: usize = 50;
const ROOM_ID_GEN_ATTEMPTS: usize = 8;
const MAX_ROOM_CTL_BYTES: usize = 16 * 1024;
const MAX_ROOM_NAME_BYTES: usize = 40;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: u64,
    pub max_members: u32,
    pub locked: bool,
    pub discoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_salt: Option<String>,
    pub members: HashSet<String>,
    pub joined: bool,
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    RoomDiscovered { room_id: String, name: String },
    RoomJoined { room_id: String, name: String },
    RoomJoinDenied { room_id: String, name: String, reason: String },
    RoomKicked { room_id: String, name: String, reason: String },
}

struct Inner {
    rooms: HashMap<String, Room>,
    events: Vec<RoomEvent>,
    known_peers: HashSet<String>,
}

/// Reentrant: every public method may be called from any worker thread.
/// Network sends always happen after the lock guarding `Inner` is released,
/// per the acquire/mutate/release/send discipline.
pub struct RoomManager {
    inner: Mutex<Inner>,
    identity: Arc<Identity>,
    chat: Arc<Chat>,
    store: Arc<dyn MessageStore>,
}

impl RoomManager {
    pub fn new(identity: Arc<Identity>, chat: Arc<Chat>, store: Arc<dyn MessageStore>) -> Self {
        RoomManager {
            inner: Mutex::new(Inner {
                rooms: HashMap::new(),
                events: Vec::new(),
                known_peers: HashSet::new(),
            }),
            identity,
            chat,
            store,
        }
    }

    pub fn get_room(&self, room_id: &str) -> Option<Room> {
        self.inner.lock().unwrap().rooms.get(room_id).cloned()
    }

    pub fn serialize_rooms(&self) -> Vec<Value> {
        let mut rooms: Vec<Room> = self.inner.lock().unwrap().rooms.values().cloned().collect();
        rooms.sort_by_key(|r| r.created_at);
        rooms.iter().map(|r| self.serialize_room(r)).collect()
    }

    pub fn serialize_room(&self, room: &Room) -> Value {
        let members = if room.joined || room.owner_id == self.identity.anon_id {
            let mut sorted: Vec<&String> = room.members.iter().collect();
            sorted.sort();
            sorted
        } else {
            Vec::new()
        };
        json!({
            "id": room.id,
            "name": room.name,
            "owner_id": room.owner_id,
            "created_at": room.created_at,
            "max_members": room.max_members,
            "locked": room.locked,
            "discoverable": room.discoverable,
            "member_count": room.members.len(),
            "members": members,
            "joined": room.joined,
            "pending": room.pending,
            "is_owner": room.owner_id == self.identity.anon_id,
        })
    }

    pub fn get_owned_discoverable_rooms(&self) -> Vec<Room> {
        self.inner
            .lock()
            .unwrap()
            .rooms
            .values()
            .filter(|r| r.owner_id == self.identity.anon_id && r.discoverable)
            .cloned()
            .collect()
    }

    /// Diffs `peer_ids` against the known-peer set and drains the bounded
    /// event FIFO in one critical section, mirroring the one caller (a
    /// state poller) that needs both together; the two pieces of state are
    /// otherwise independent.
    pub fn consume_room_events(&self, peer_ids: &HashSet<String>) -> (HashSet<String>, Vec<RoomEvent>) {
        let mut inner = self.inner.lock().unwrap();
        let new_peers: HashSet<String> = peer_ids.difference(&inner.known_peers).cloned().collect();
        if !new_peers.is_empty() {
            inner.known_peers.extend(new_peers.iter().cloned());
        }
        let events = std::mem::take(&mut inner.events);
        (new_peers, events)
    }

    fn push_event(&self, event: RoomEvent) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(event);
        if inner.events.len() > MAX_ROOM_EVENTS {
            let excess = inner.events.len() - MAX_ROOM_EVENTS;
            inner.events.drain(0..excess);
        }
    }

    fn hash_password(password: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{salt}:{password}").as_bytes());
        hex_encode(&hasher.finalize())
    }

    fn public_payload(room: &Room) -> Value {
        json!({
            "id": room.id,
            "name": room.name,
            "owner_id": room.owner_id,
            "created_at": room.created_at,
            "max_members": room.max_members,
            "locked": room.locked,
            "discoverable": room.discoverable,
        })
    }

    fn send_room_ctl(&self, peer_id: &str, payload: &Value) -> crate::error::Result<()> {
        let message = format!("{ROOM_CTL_PREFIX}{payload}");
        self.chat.send_to_peer(peer_id, &message)
    }

    fn broadcast_room_ctl(&self, peer_ids: &HashSet<String>, payload: &Value) {
        let message = format!("{ROOM_CTL_PREFIX}{payload}");
        for peer_id in peer_ids {
            if peer_id == &self.identity.anon_id {
                continue;
            }
            let _ = self.chat.send_to_peer(peer_id, &message);
        }
    }

    /// `peer_ids = None` broadcasts to everyone; `Some(set)` unicasts to
    /// each id in the set (skipping self, swallowing per-peer failures) —
    /// this second form is what new-peer re-announcement uses.
    pub fn announce_room(&self, room: &Room, peer_ids: Option<&HashSet<String>>) {
        if !room.discoverable {
            return;
        }
        let payload = json!({"type": "room_announce", "room": Self::public_payload(room)});
        let message = format!("{ROOM_CTL_PREFIX}{payload}");
        match peer_ids {
            None => {
                self.chat.send_to_all(&message);
            }
            Some(ids) => {
                for peer_id in ids {
                    if peer_id == &self.identity.anon_id {
                        continue;
                    }
                    let _ = self.chat.send_to_peer(peer_id, &message);
                }
            }
        }
    }

    /// Re-announces every locally-owned discoverable room to newly-seen
    /// peers only, keeping the cost O(rooms × new peers).
    pub fn announce_to_new_peers(&self, new_peer_ids: &HashSet<String>) {
        if new_peer_ids.is_empty() {
            return;
        }
        for room in self.get_owned_discoverable_rooms() {
            self.announce_room(&room, Some(new_peer_ids));
        }
    }

    pub fn handle_room_control(&self, sender_id: &str, raw_payload: &str) {
        if raw_payload.len() > MAX_ROOM_CTL_BYTES {
            log::debug!("room: dropping oversized control frame from {sender_id}");
            return;
        }
        let payload: Value = match serde_json::from_str(raw_payload) {
            Ok(v) => v,
            Err(_) => return,
        };
        let Some(obj) = payload.as_object() else {
            return;
        };
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or("");

        match kind {
            "room_announce" => self.on_room_announce(sender_id, obj),
            "room_join" => self.on_room_join(sender_id, obj),
            "room_join_ack" => self.on_room_join_ack(sender_id, obj),
            "room_members" => self.on_room_members(obj),
            "room_leave" => self.on_room_leave(sender_id, obj),
            "room_kick" => self.on_room_kick(obj),
            _ => {}
        }
    }

    fn on_room_announce(&self, sender_id: &str, obj: &serde_json::Map<String, Value>) {
        let room_data = obj.get("room").and_then(Value::as_object);
        let Some(room_data) = room_data else { return };
        let room_id = room_data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if room_id.is_empty() {
            return;
        }
        // The sender of the frame is trusted as the owner regardless of
        // what the payload claims.
        let owner_id = sender_id.to_string();
        let name = room_data
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Room {}", &room_id.chars().take(6).collect::<String>()));
        let locked = room_data.get("locked").and_then(Value::as_bool).unwrap_or(false);
        let max_members = room_data.get("max_members").and_then(Value::as_u64).unwrap_or(0) as u32;
        let discoverable = room_data
            .get("discoverable")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let created_at = room_data
            .get("created_at")
            .and_then(Value::as_u64)
            .unwrap_or_else(now_epoch);

        let is_new;
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.rooms.get_mut(&room_id) {
                None => {
                    is_new = true;
                    inner.rooms.insert(
                        room_id.clone(),
                        Room {
                            id: room_id.clone(),
                            name: name.clone(),
                            owner_id,
                            created_at,
                            max_members,
                            locked,
                            discoverable,
                            password_hash: None,
                            password_salt: None,
                            members: HashSet::from([sender_id.to_string()]),
                            joined: false,
                            pending: false,
                        },
                    );
                }
                Some(room) => {
                    is_new = false;
                    room.name = name.clone();
                    room.owner_id = owner_id;
                    room.locked = locked;
                    room.max_members = max_members;
                    room.discoverable = discoverable;
                    room.created_at = created_at;
                    if room.members.is_empty() {
                        room.members.insert(sender_id.to_string());
                    }
                }
            }
        }

        if is_new {
            self.push_event(RoomEvent::RoomDiscovered { room_id, name });
        }
    }

    fn on_room_join(&self, sender_id: &str, obj: &serde_json::Map<String, Value>) {
        let room_id = obj.get("room_id").and_then(Value::as_str).unwrap_or("").trim().to_string();
        let password = obj.get("password").and_then(Value::as_str).unwrap_or("").to_string();
        if room_id.is_empty() {
            return;
        }

        enum Outcome {
            Accepted { members: Vec<String>, room: Value },
            Denied { reason: String },
        }

        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            let Some(room) = inner.rooms.get_mut(&room_id) else {
                return;
            };
            if room.owner_id != self.identity.anon_id {
                return;
            }

            let outcome = if room.max_members > 0 && room.members.len() as u32 >= room.max_members {
                Outcome::Denied { reason: "Room is full".to_string() }
            } else if room.locked {
                match (&room.password_hash, &room.password_salt) {
                    (Some(hash), Some(salt)) => {
                        if &Self::hash_password(&password, salt) == hash {
                            room.members.insert(sender_id.to_string());
                            let mut members: Vec<String> = room.members.iter().cloned().collect();
                            members.sort();
                            Outcome::Accepted { members, room: Self::public_payload(room) }
                        } else {
                            Outcome::Denied { reason: "Invalid password".to_string() }
                        }
                    }
                    _ => Outcome::Denied { reason: "Room is locked".to_string() },
                }
            } else {
                room.members.insert(sender_id.to_string());
                let mut members: Vec<String> = room.members.iter().cloned().collect();
                members.sort();
                Outcome::Accepted { members, room: Self::public_payload(room) }
            };
            outcome
        };

        match outcome {
            Outcome::Accepted { members, room } => {
                let ack = json!({
                    "type": "room_join_ack",
                    "room_id": room_id,
                    "ok": true,
                    "members": members,
                    "room": room,
                });
                let _ = self.send_room_ctl(sender_id, &ack);
                let member_set: HashSet<String> = members.into_iter().collect();
                self.broadcast_room_ctl(
                    &member_set,
                    &json!({"type": "room_members", "room_id": room_id, "members": Vec::from_iter(member_set.iter())}),
                );
            }
            Outcome::Denied { reason } => {
                let ack = json!({
                    "type": "room_join_ack",
                    "room_id": room_id,
                    "ok": false,
                    "reason": reason,
                });
                let _ = self.send_room_ctl(sender_id, &ack);
            }
        }
    }

    fn on_room_join_ack(&self, sender_id: &str, obj: &serde_json::Map<String, Value>) {
        let room_id = obj.get("room_id").and_then(Value::as_str).unwrap_or("").trim().to_string();
        if room_id.is_empty() {
            return;
        }
        let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let reason = obj.get("reason").and_then(Value::as_str).unwrap_or("").to_string();
        let room_data = obj.get("room").and_then(Value::as_object);
        let members: Vec<String> = obj
            .get("members")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let room_name;
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.rooms.contains_key(&room_id) {
                if let Some(data) = room_data {
                    let name = data
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Room {}", &room_id.chars().take(6).collect::<String>()));
                    inner.rooms.insert(
                        room_id.clone(),
                        Room {
                            id: room_id.clone(),
                            name,
                            owner_id: data
                                .get("owner_id")
                                .and_then(Value::as_str)
                                .unwrap_or(sender_id)
                                .to_string(),
                            created_at: data.get("created_at").and_then(Value::as_u64).unwrap_or_else(now_epoch),
                            max_members: data.get("max_members").and_then(Value::as_u64).unwrap_or(0) as u32,
                            locked: data.get("locked").and_then(Value::as_bool).unwrap_or(false),
                            discoverable: data.get("discoverable").and_then(Value::as_bool).unwrap_or(false),
                            password_hash: None,
                            password_salt: None,
                            members: HashSet::new(),
                            joined: false,
                            pending: false,
                        },
                    );
                }
            }

            let Some(room) = inner.rooms.get_mut(&room_id) else {
                return;
            };

            if ok {
                room.joined = true;
                room.pending = false;
                room.members = members.into_iter().collect();
                room.members.insert(self.identity.anon_id.clone());
                if let Some(data) = room_data {
                    if let Some(name) = data.get("name").and_then(Value::as_str) {
                        room.name = name.to_string();
                    }
                    if let Some(owner) = data.get("owner_id").and_then(Value::as_str) {
                        room.owner_id = owner.to_string();
                    }
                    if let Some(created_at) = data.get("created_at").and_then(Value::as_u64) {
                        room.created_at = created_at;
                    }
                    if let Some(max) = data.get("max_members").and_then(Value::as_u64) {
                        room.max_members = max as u32;
                    }
                    room.locked = data.get("locked").and_then(Value::as_bool).unwrap_or(false);
                    if let Some(disc) = data.get("discoverable").and_then(Value::as_bool) {
                        room.discoverable = disc;
                    }
                }
            } else {
                room.pending = false;
            }
            room_name = room.name.clone();
        }

        if ok {
            self.push_event(RoomEvent::RoomJoined { room_id, name: room_name });
        } else {
            self.push_event(RoomEvent::RoomJoinDenied {
                room_id,
                name: room_name,
                reason: if reason.is_empty() { "Join denied".to_string() } else { reason },
            });
        }
    }

    fn on_room_members(&self, obj: &serde_json::Map<String, Value>) {
        let room_id = obj.get("room_id").and_then(Value::as_str).unwrap_or("").trim().to_string();
        if room_id.is_empty() {
            return;
        }
        let members: HashSet<String> = obj
            .get("members")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut inner = self.inner.lock().unwrap();
        if let Some(room) = inner.rooms.get_mut(&room_id) {
            room.joined = members.contains(&self.identity.anon_id);
            room.members = members;
            room.pending = false;
        }
    }

    fn on_room_leave(&self, sender_id: &str, obj: &serde_json::Map<String, Value>) {
        let room_id = obj.get("room_id").and_then(Value::as_str).unwrap_or("").trim().to_string();
        if room_id.is_empty() {
            return;
        }
        let members: Vec<String>;
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(room) = inner.rooms.get_mut(&room_id) else { return };
            if room.owner_id != self.identity.anon_id {
                return;
            }
            room.members.remove(sender_id);
            members = room.members.iter().cloned().collect();
        }
        let member_set: HashSet<String> = members.iter().cloned().collect();
        self.broadcast_room_ctl(
            &member_set,
            &json!({"type": "room_members", "room_id": room_id, "members": members}),
        );
    }

    fn on_room_kick(&self, obj: &serde_json::Map<String, Value>) {
        let room_id = obj.get("room_id").and_then(Value::as_str).unwrap_or("").trim().to_string();
        if room_id.is_empty() {
            return;
        }
        let reason = obj.get("reason").and_then(Value::as_str).unwrap_or("").to_string();

        let room_name;
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(room) = inner.rooms.get_mut(&room_id) else { return };
            room.joined = false;
            room.pending = false;
            room.members.remove(&self.identity.anon_id);
            room_name = room.name.clone();
        }
        self.push_event(RoomEvent::RoomKicked {
            room_id,
            name: room_name,
            reason: if reason.is_empty() { "Removed from room".to_string() } else { reason },
        });
    }

    /// Handles a `ROOMMSG::room_id::text` frame: materializes an ad-hoc
    /// room on first receipt from an unknown id, stores the message, and
    /// returns `(room_id, text)` for the upstream callback to surface.
    pub fn handle_room_message(&self, sender_id: &str, message: &str) -> Option<(String, String)> {
        let parts: Vec<&str> = message.splitn(3, "::").collect();
        if parts.len() != 3 {
            return None;
        }
        let room_id = parts[1].trim().to_string();
        let text = parts[2].to_string();
        if room_id.is_empty() {
            return None;
        }

        {
            let mut inner = self.inner.lock().unwrap();
            let room = inner.rooms.entry(room_id.clone()).or_insert_with(|| Room {
                id: room_id.clone(),
                name: format!("Room {}", &room_id.chars().take(6).collect::<String>()),
                owner_id: sender_id.to_string(),
                created_at: now_epoch(),
                max_members: 0,
                locked: false,
                discoverable: false,
                password_hash: None,
                password_salt: None,
                members: HashSet::from([sender_id.to_string()]),
                joined: true,
                pending: false,
            });
            room.joined = true;
            room.pending = false;
            room.members.insert(self.identity.anon_id.clone());
            room.members.insert(sender_id.to_string());
        }

        self.store.store("in", &room_id, sender_id, &text);
        Some((room_id, text))
    }

    pub fn create_room(
        &self,
        name: &str,
        password: &str,
        discoverable: bool,
        max_members: u32,
    ) -> Result<Room> {
        if name.len() > MAX_ROOM_NAME_BYTES {
            return Err(AnonchatError::ValidationError(format!(
                "room name exceeds {MAX_ROOM_NAME_BYTES} bytes"
            )));
        }

        let locked = !password.is_empty();
        let (salt, password_hash) = if locked {
            let salt = random_hex(8);
            let hash = Self::hash_password(password, &salt);
            (Some(salt), Some(hash))
        } else {
            (None, None)
        };

        let room = {
            let mut inner = self.inner.lock().unwrap();
            let mut room_id = String::new();
            for _ in 0..ROOM_ID_GEN_ATTEMPTS {
                let candidate = format!("room_{}", random_hex(4));
                if !inner.rooms.contains_key(&candidate) {
                    room_id = candidate;
                    break;
                }
            }
            if room_id.is_empty() {
                return Err(AnonchatError::RoomPolicyError(
                    "could not allocate a unique room id".to_string(),
                ));
            }

            let room = Room {
                id: room_id.clone(),
                name: name.to_string(),
                owner_id: self.identity.anon_id.clone(),
                created_at: now_epoch(),
                max_members,
                locked,
                discoverable,
                password_hash,
                password_salt: salt,
                members: HashSet::from([self.identity.anon_id.clone()]),
                joined: true,
                pending: false,
            };
            inner.rooms.insert(room_id, room.clone());
            room
        };

        self.announce_room(&room, None);
        Ok(room)
    }

    pub fn join_room(&self, room_id: &str, password: &str) -> (u16, Value) {
        let owner_id;
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(room) = inner.rooms.get_mut(room_id) else {
                return (404, json!({"error": "Room not found"}));
            };
            if room.owner_id == self.identity.anon_id {
                room.joined = true;
                room.pending = false;
                return (200, json!({"ok": true, "room": self.serialize_room(room)}));
            }
            if room.joined {
                return (200, json!({"ok": true, "room": self.serialize_room(room)}));
            }
            room.pending = true;
            owner_id = room.owner_id.clone();
        }

        let payload = json!({"type": "room_join", "room_id": room_id, "password": password});
        if self.send_room_ctl(&owner_id, &payload).is_err() {
            let mut inner = self.inner.lock().unwrap();
            if let Some(room) = inner.rooms.get_mut(room_id) {
                room.pending = false;
            }
            return (400, json!({"error": "Room owner offline"}));
        }

        (200, json!({"ok": true}))
    }

    pub fn leave_room(&self, room_id: &str) -> (u16, Value) {
        let owner_id;
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(room) = inner.rooms.get_mut(room_id) else {
                return (404, json!({"error": "Room not found"}));
            };
            if room.owner_id == self.identity.anon_id {
                return (400, json!({"error": "Owner cannot leave the room"}));
            }
            room.joined = false;
            room.pending = false;
            room.members.remove(&self.identity.anon_id);
            owner_id = room.owner_id.clone();
        }

        let _ = self.send_room_ctl(&owner_id, &json!({"type": "room_leave", "room_id": room_id}));
        (200, json!({"ok": true}))
    }

    pub fn kick_member(&self, room_id: &str, member_id: &str) -> (u16, Value) {
        if member_id.is_empty() {
            return (400, json!({"error": "Missing member id"}));
        }

        let members: Vec<String>;
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(room) = inner.rooms.get_mut(room_id) else {
                return (404, json!({"error": "Room not found"}));
            };
            if room.owner_id != self.identity.anon_id {
                return (403, json!({"error": "Only the owner can kick members"}));
            }
            if member_id == self.identity.anon_id {
                return (400, json!({"error": "Owner cannot kick self"}));
            }
            if !room.members.contains(member_id) {
                return (404, json!({"error": "Member not found"}));
            }
            room.members.remove(member_id);
            members = room.members.iter().cloned().collect();
        }

        let member_set: HashSet<String> = members.iter().cloned().collect();
        self.broadcast_room_ctl(
            &member_set,
            &json!({"type": "room_members", "room_id": room_id, "members": members}),
        );
        let _ = self.send_room_ctl(member_id, &json!({"type": "room_kick", "room_id": room_id}));

        (200, json!({"ok": true}))
    }
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn random_hex(n_bytes: usize) -> String {
    use rand::RngCore;
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn new_identity() -> Arc<Identity> {
        Arc::new(Identity::new(None))
    }

    // RoomManager needs a Chat handle; these unit tests exercise the pure
    // state-machine transitions via handle_room_control directly rather
    // than routing packets through real sockets (that is covered in the
    // end-to-end runtime tests).
    fn new_manager(identity: Arc<Identity>, peer_identity: &Identity) -> (Arc<RoomManager>, Arc<Chat>) {
        use crate::discovery::Discovery;
        use crate::transport::Transport;
        use std::net::Ipv4Addr;

        let transport = Arc::new(Transport::new(Ipv4Addr::LOCALHOST, 0, false).unwrap());
        let discovery = Arc::new(Discovery::new(
            Arc::clone(&transport),
            Arc::clone(&identity),
            Ipv4Addr::LOCALHOST,
            0,
            false,
        ));
        discovery.register_peer_for_test(&peer_identity.anon_id, Ipv4Addr::LOCALHOST, &peer_identity.crypto.public_key_b64());
        let chat = Chat::new(Arc::clone(&transport), Arc::clone(&discovery), Arc::clone(&identity), 0);
        let store = Arc::new(InMemoryStore::new());
        let manager = Arc::new(RoomManager::new(identity, chat.clone(), store));
        (manager, chat)
    }

    #[test]
    fn owner_only_admission_drops_join_at_non_owner() {
        let identity = new_identity();
        let peer = Identity::new(None);
        let (manager, _chat) = new_manager(identity.clone(), &peer);

        // Simulate a non-owned room record (as if discovered via announce).
        {
            let mut inner = manager.inner.lock().unwrap();
            inner.rooms.insert(
                "room_aaaa1111".to_string(),
                Room {
                    id: "room_aaaa1111".to_string(),
                    name: "lobby".to_string(),
                    owner_id: peer.anon_id.clone(),
                    created_at: now_epoch(),
                    max_members: 5,
                    locked: false,
                    discoverable: true,
                    password_hash: None,
                    password_salt: None,
                    members: HashSet::from([peer.anon_id.clone()]),
                    joined: false,
                    pending: false,
                },
            );
        }

        manager.handle_room_control(
            "anon-ccccccc1",
            &json!({"type": "room_join", "room_id": "room_aaaa1111", "password": ""}).to_string(),
        );

        let room = manager.get_room("room_aaaa1111").unwrap();
        assert_eq!(room.members.len(), 1);
    }

    #[test]
    fn join_denied_with_wrong_password_records_event() {
        let identity = new_identity();
        let peer = Identity::new(None);
        let (manager, _chat) = new_manager(identity.clone(), &peer);

        let room = manager
            .create_room("secretroom", "secret", true, 5)
            .expect("room should be created");

        manager.handle_room_control(
            &peer.anon_id,
            &json!({"type": "room_join_ack", "room_id": room.id, "ok": false, "reason": "Invalid password"}).to_string(),
        );

        let peer_ids: HashSet<String> = HashSet::new();
        let (_new_peers, events) = manager.consume_room_events(&peer_ids);
        assert!(events.iter().any(|e| matches!(e, RoomEvent::RoomJoinDenied { .. })));
    }

    #[test]
    fn ad_hoc_room_materializes_on_unknown_roommsg() {
        let identity = new_identity();
        let peer = Identity::new(None);
        let (manager, _chat) = new_manager(identity.clone(), &peer);

        let result = manager.handle_room_message(&peer.anon_id, "ROOMMSG::room_zzzz::hi there");
        assert_eq!(result, Some(("room_zzzz".to_string(), "hi there".to_string())));

        let room = manager.get_room("room_zzzz").unwrap();
        assert!(room.joined);
        assert!(room.members.contains(&peer.anon_id));
        assert!(room.members.contains(&identity.anon_id));
    }

    #[test]
    fn oversized_control_frame_is_dropped_without_panicking() {
        let identity = new_identity();
        let peer = Identity::new(None);
        let (manager, _chat) = new_manager(identity.clone(), &peer);

        let oversized = "x".repeat(MAX_ROOM_CTL_BYTES + 1);
        manager.handle_room_control(&peer.anon_id, &oversized);
        assert!(manager.get_room("room_anything").is_none());
    }

    #[test]
    fn create_room_seeds_owner_as_sole_member() {
        let identity = new_identity();
        let peer = Identity::new(None);
        let (manager, _chat) = new_manager(identity.clone(), &peer);

        let room = manager.create_room("lobby", "", true, 5).unwrap();
        assert_eq!(room.members.len(), 1);
        assert!(room.members.contains(&identity.anon_id));
        assert!(room.joined);
        assert!(!room.locked);
    }

    #[test]
    fn create_room_rejects_over_length_name() {
        let identity = new_identity();
        let peer = Identity::new(None);
        let (manager, _chat) = new_manager(identity.clone(), &peer);

        let too_long = "x".repeat(MAX_ROOM_NAME_BYTES + 1);
        let err = manager.create_room(&too_long, "", true, 5).unwrap_err();
        assert!(matches!(err, AnonchatError::ValidationError(_)));
    }

    #[test]
    fn kick_member_rejects_non_owner_and_self_kick() {
        let identity = new_identity();
        let peer = Identity::new(None);
        let (manager, _chat) = new_manager(identity.clone(), &peer);

        let room = manager.create_room("lobby", "", true, 5).unwrap();
        let (status, _) = manager.kick_member(&room.id, &identity.anon_id);
        assert_eq!(status, 400);

        let (status, _) = manager.kick_member("room_missing", &peer.anon_id);
        assert_eq!(status, 404);
    }
}
