// Periodic presence advertisement and peer-table maintenance over Transport.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::identity::Identity;
use crate::transport::Transport;

pub const GM_INTERVAL: Duration = Duration::from_secs(3);
pub const PEER_TIMEOUT: u64 = 10;

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub ip: Ipv4Addr,
    pub last_seen: u64,
    pub public_key_b64: String,
    pub nickname: Option<String>,
}

type EncHandler = dyn Fn(&str, &str, Ipv4Addr) + Send + Sync;

/// Owns the beacon/ingress threads and the peer table. Chat registers an
/// ENC handler here instead of opening a second socket.
pub struct Discovery {
    transport: Arc<Transport>,
    identity: Arc<Identity>,
    peers: RwLock<HashMap<String, PeerEntry>>,
    running: Arc<AtomicBool>,
    broadcast_ip: Ipv4Addr,
    port: u16,
    enc_handler: RwLock<Option<Arc<EncHandler>>>,
    debug: bool,
}

impl Discovery {
    pub fn new(
        transport: Arc<Transport>,
        identity: Arc<Identity>,
        broadcast_ip: Ipv4Addr,
        port: u16,
        debug: bool,
    ) -> Self {
        Discovery {
            transport,
            identity,
            peers: RwLock::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            broadcast_ip,
            port,
            enc_handler: RwLock::new(None),
            debug,
        }
    }

    pub fn set_enc_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str, Ipv4Addr) + Send + Sync + 'static,
    {
        *self.enc_handler.write().unwrap() = Some(Arc::new(handler));
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let broadcaster = Arc::clone(self);
        thread::spawn(move || broadcaster.broadcast_loop());

        let listener = Arc::clone(self);
        thread::spawn(move || listener.listen_loop());
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.transport.close();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the peer table after sweeping expired entries.
    pub fn get_peers(&self) -> HashMap<String, PeerEntry> {
        self.sweep_expired();
        self.peers.read().unwrap().clone()
    }

    #[cfg(test)]
    pub fn register_peer_for_test(&self, peer_id: &str, ip: Ipv4Addr, public_key_b64: &str) {
        self.peers.write().unwrap().insert(
            peer_id.to_string(),
            PeerEntry {
                ip,
                last_seen: now_epoch(),
                public_key_b64: public_key_b64.to_string(),
                nickname: None,
            },
        );
    }

    fn sweep_expired(&self) {
        let now = now_epoch();
        let mut peers = self.peers.write().unwrap();
        peers.retain(|_, entry| now.saturating_sub(entry.last_seen) <= PEER_TIMEOUT);
    }

    fn broadcast_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let payload = self.identity.crypto.public_key_b64();
            let gm = match self.identity.nickname() {
                Some(nick) if !nick.is_empty() => format!(
                    "GM {} {}|{}",
                    self.identity.anon_id,
                    payload,
                    URL_SAFE_NO_PAD.encode(nick.as_bytes())
                ),
                _ => format!("GM {} {}", self.identity.anon_id, payload),
            };

            if self
                .transport
                .send(&gm, self.broadcast_ip, self.port)
                .is_err()
                && !self.running.load(Ordering::SeqCst)
            {
                break;
            }

            if let Some(nick) = self.identity.nickname() {
                if !nick.is_empty() {
                    let nick_frame = format!(
                        "NICK {} {}",
                        self.identity.anon_id,
                        URL_SAFE_NO_PAD.encode(nick.as_bytes())
                    );
                    let _ = self.transport.send(&nick_frame, self.broadcast_ip, self.port);
                }
            }

            thread::sleep(GM_INTERVAL);
        }
    }

    fn listen_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let (msg, src_ip, _src_port) = match self.transport.recv(4096) {
                Ok(v) => v,
                Err(e) => {
                    if Transport::is_timeout(&e) {
                        continue;
                    }
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    continue;
                }
            };
            self.handle_datagram(&msg, src_ip);
        }
    }

    fn handle_datagram(&self, msg: &str, src_ip: Ipv4Addr) {
        let parts: Vec<&str> = msg.trim().splitn(3, ' ').collect();
        if parts.len() != 3 {
            return;
        }
        let (frame_type, sender_id, rest) = (parts[0], parts[1], parts[2]);

        if frame_type == "ENC" {
            let handler = self.enc_handler.read().unwrap().clone();
            if let Some(handler) = handler {
                handler(sender_id, rest, src_ip);
            }
            self.sweep_expired();
            return;
        }

        if sender_id == self.identity.anon_id {
            self.sweep_expired();
            return;
        }

        match frame_type {
            "GM" | "GM_ACK" => {
                let (pub_key, nick) = parse_presence_payload(rest);
                {
                    let mut peers = self.peers.write().unwrap();
                    let entry = peers.entry(sender_id.to_string()).or_insert(PeerEntry {
                        ip: src_ip,
                        last_seen: 0,
                        public_key_b64: pub_key.clone(),
                        nickname: None,
                    });
                    entry.ip = src_ip;
                    entry.last_seen = now_epoch();
                    entry.public_key_b64 = pub_key;
                    if let Some(n) = nick {
                        entry.nickname = Some(n);
                    }
                }
                if frame_type == "GM" {
                    let reply = format!(
                        "GM_ACK {} {}",
                        self.identity.anon_id,
                        self.identity.crypto.public_key_b64()
                    );
                    let _ = self.transport.send(&reply, src_ip, self.port);
                }
            }
            "NICK" => {
                let mut peers = self.peers.write().unwrap();
                if let Some(entry) = peers.get_mut(sender_id) {
                    entry.nickname = decode_nickname(rest);
                    entry.last_seen = now_epoch();
                }
            }
            _ => {
                if self.debug {
                    log::debug!("discovery: dropping unrecognized frame type {frame_type}");
                }
            }
        }

        self.sweep_expired();
    }
}

fn parse_presence_payload(rest: &str) -> (String, Option<String>) {
    match rest.split_once('|') {
        Some((pub_key, nick_b64)) => (pub_key.to_string(), decode_nickname(nick_b64)),
        None => (rest.to_string(), None),
    }
}

fn decode_nickname(nick_b64: &str) -> Option<String> {
    URL_SAFE_NO_PAD
        .decode(nick_b64)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
