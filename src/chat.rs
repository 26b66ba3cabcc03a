// Pairwise encrypt/decrypt over Discovery's peer table.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::discovery::Discovery;
use crate::error::{AnonchatError, Result};
use crate::identity::Identity;
use crate::transport::Transport;

type OnMessage = dyn Fn(&str, &str) + Send + Sync;

/// Strictly at-most-once, unordered messaging. Attaches to Discovery's
/// ingress loop via the ENC handler rather than owning its own socket.
pub struct Chat {
    transport: Arc<Transport>,
    discovery: Arc<Discovery>,
    identity: Arc<Identity>,
    port: u16,
    running: Arc<AtomicBool>,
    on_message: RwLock<Option<Arc<OnMessage>>>,
}

impl Chat {
    pub fn new(
        transport: Arc<Transport>,
        discovery: Arc<Discovery>,
        identity: Arc<Identity>,
        port: u16,
    ) -> Arc<Self> {
        let chat = Arc::new(Chat {
            transport,
            discovery: Arc::clone(&discovery),
            identity,
            port,
            running: Arc::new(AtomicBool::new(true)),
            on_message: RwLock::new(None),
        });

        let handler_chat = Arc::clone(&chat);
        discovery.set_enc_handler(move |sender_id, blob, src_ip| {
            handler_chat.handle_enc(sender_id, blob, src_ip);
        });

        chat
    }

    pub fn start<F>(&self, on_message: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.on_message.write().unwrap() = Some(Arc::new(on_message));
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn send_to_peer(&self, peer_id: &str, plaintext: &str) -> Result<()> {
        let peers = self.discovery.get_peers();
        let entry = peers
            .get(peer_id)
            .ok_or_else(|| AnonchatError::UnknownPeer(peer_id.to_string()))?;

        self.identity
            .crypto
            .register_peer(peer_id, &entry.public_key_b64)?;
        let blob = self.identity.crypto.encrypt(peer_id, plaintext)?;
        let frame = format!("ENC {} {}", self.identity.anon_id, blob);
        self.transport.send(&frame, entry.ip, self.port)
    }

    /// Best-effort fan-out; a peer lost to expiry mid-iteration just isn't
    /// counted, it never aborts the remaining sends.
    pub fn send_to_all(&self, plaintext: &str) -> usize {
        let peers = self.discovery.get_peers();
        let mut count = 0;
        for peer_id in peers.keys() {
            if self.send_to_peer(peer_id, plaintext).is_ok() {
                count += 1;
            }
        }
        count
    }

    fn handle_enc(&self, sender_id: &str, blob: &str, _src_ip: Ipv4Addr) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if sender_id == self.identity.anon_id {
            return;
        }

        let peers = self.discovery.get_peers();
        let entry = match peers.get(sender_id) {
            Some(e) => e,
            None => return,
        };

        if self
            .identity
            .crypto
            .register_peer(sender_id, &entry.public_key_b64)
            .is_err()
        {
            return;
        }

        let plaintext = match self.identity.crypto.decrypt(sender_id, blob) {
            Ok(p) => p,
            Err(_) => return,
        };

        if let Some(cb) = self.on_message.read().unwrap().clone() {
            cb(sender_id, &plaintext);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;
    use std::time::Duration;

    fn build(port_hint: u16) -> (Arc<Chat>, Arc<Discovery>, Arc<Identity>, Arc<Transport>) {
        let identity = Arc::new(Identity::new(None));
        let transport = Arc::new(Transport::new(Ipv4Addr::LOCALHOST, port_hint, false).unwrap());
        let discovery = Arc::new(Discovery::new(
            Arc::clone(&transport),
            Arc::clone(&identity),
            Ipv4Addr::LOCALHOST,
            0,
            false,
        ));
        let chat = Chat::new(
            Arc::clone(&transport),
            Arc::clone(&discovery),
            Arc::clone(&identity),
            0,
        );
        (chat, discovery, identity, transport)
    }

    #[test]
    fn send_to_peer_unknown_peer_errors() {
        let (chat, _discovery, _identity, _transport) = build(0);
        let err = chat.send_to_peer("anon-ffffffff", "hi").unwrap_err();
        assert!(matches!(err, AnonchatError::UnknownPeer(_)));
    }

    #[test]
    fn encrypted_round_trip_over_loopback() {
        let identity_a = Arc::new(Identity::new(None));
        let identity_b = Arc::new(Identity::new(None));

        let transport_a = Arc::new(Transport::new(Ipv4Addr::LOCALHOST, 0, false).unwrap());
        let port_a = transport_a.local_port();
        let transport_b = Arc::new(Transport::new(Ipv4Addr::LOCALHOST, 0, false).unwrap());
        let port_b = transport_b.local_port();

        let discovery_a = Arc::new(Discovery::new(
            Arc::clone(&transport_a),
            Arc::clone(&identity_a),
            Ipv4Addr::LOCALHOST,
            port_b,
            false,
        ));
        let discovery_b = Arc::new(Discovery::new(
            Arc::clone(&transport_b),
            Arc::clone(&identity_b),
            Ipv4Addr::LOCALHOST,
            port_a,
            false,
        ));

        let chat_a = Chat::new(
            Arc::clone(&transport_a),
            Arc::clone(&discovery_a),
            Arc::clone(&identity_a),
            port_b,
        );
        let chat_b = Chat::new(
            Arc::clone(&transport_b),
            Arc::clone(&discovery_b),
            Arc::clone(&identity_b),
            port_a,
        );

        let (tx, rx) = unbounded();
        chat_b.start(move |sender, text| {
            let _ = tx.send((sender.to_string(), text.to_string()));
        });
        chat_a.start(|_, _| {});

        discovery_a.start();
        discovery_b.start();

        thread::sleep(Duration::from_secs(4));

        chat_a
            .send_to_peer(&identity_b.anon_id, "hello")
            .expect("A should know about B by now");

        let (sender, text) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(sender, identity_a.anon_id);
        assert_eq!(text, "hello");

        discovery_a.stop();
        discovery_b.stop();
    }
}
