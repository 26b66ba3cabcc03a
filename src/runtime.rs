// Top-level wiring: owns the network stack, rebuilds it on interface
// switch, and routes decrypted chat payloads to the room layer or the
// upstream callback.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::chat::Chat;
use crate::discovery::Discovery;
use crate::identity::Identity;
use crate::net::default_interface_ip;
use crate::room::{RoomManager, ROOM_CTL_PREFIX, ROOM_MSG_PREFIX};
use crate::settings::Settings;
use crate::store::{InMemoryStore, MessageStore};
use crate::transport::Transport;

pub type UpstreamCallback = dyn Fn(&str, &str) + Send + Sync;

struct Stack {
    transport: Arc<Transport>,
    discovery: Arc<Discovery>,
    chat: Arc<Chat>,
    room_manager: Arc<RoomManager>,
    current_ip: Ipv4Addr,
}

pub struct Runtime {
    settings: Settings,
    identity: Arc<Identity>,
    store: Arc<dyn MessageStore>,
    stack: Mutex<Stack>,
    upstream: Mutex<Option<Arc<UpstreamCallback>>>,
}

impl Runtime {
    pub fn new(settings: Settings) -> Self {
        let identity = Arc::new(Identity::new(settings.nickname.clone()));
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryStore::new());
        let bind_ip = default_interface_ip(settings.interface_ip.as_deref());

        let stack = build_stack(&settings, Arc::clone(&identity), Arc::clone(&store), bind_ip);

        Runtime {
            settings,
            identity,
            store,
            stack: Mutex::new(stack),
            upstream: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Arc<Identity> {
        Arc::clone(&self.identity)
    }

    pub fn discovery(&self) -> Arc<Discovery> {
        Arc::clone(&self.stack.lock().unwrap().discovery)
    }

    pub fn chat(&self) -> Arc<Chat> {
        Arc::clone(&self.stack.lock().unwrap().chat)
    }

    pub fn room_manager(&self) -> Arc<RoomManager> {
        Arc::clone(&self.stack.lock().unwrap().room_manager)
    }

    pub fn current_ip(&self) -> Ipv4Addr {
        self.stack.lock().unwrap().current_ip
    }

    /// Starts discovery and wires the chat callback that demultiplexes
    /// plain chat text from room control/message frames. Call once.
    pub fn start<F>(&self, upstream_on_message: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.upstream.lock().unwrap() = Some(Arc::new(upstream_on_message));
        let stack = self.stack.lock().unwrap();
        stack.discovery.start();
        self.wire_chat(&stack);
    }

    fn wire_chat(&self, stack: &Stack) {
        let room_manager = Arc::clone(&stack.room_manager);
        let store = Arc::clone(&self.store);
        let upstream_slot = self.upstream.lock().unwrap().clone();

        stack.chat.start(move |sender_id, text| {
            if let Some(ctl) = text.strip_prefix(ROOM_CTL_PREFIX) {
                room_manager.handle_room_control(sender_id, ctl);
                return;
            }
            if text.starts_with(ROOM_MSG_PREFIX) {
                if let Some((room_id, body)) = room_manager.handle_room_message(sender_id, text) {
                    if let Some(cb) = &upstream_slot {
                        cb(sender_id, &format!("[room {room_id}] {body}"));
                    }
                    return;
                }
            }
            store.store("in", sender_id, sender_id, text);
            if let Some(cb) = &upstream_slot {
                cb(sender_id, text);
            }
        });
    }

    /// Stops the current stack, rebinds to `new_ip`, and restarts
    /// discovery/chat. A no-op if already bound there.
    pub fn switch_interface(&self, new_ip: Ipv4Addr) -> bool {
        let mut stack = self.stack.lock().unwrap();
        if stack.current_ip == new_ip {
            return true;
        }

        stack.discovery.stop();
        stack.chat.stop();
        let _ = stack.transport.close();

        *stack = build_stack(&self.settings, Arc::clone(&self.identity), Arc::clone(&self.store), new_ip);
        stack.discovery.start();
        self.wire_chat(&stack);
        true
    }

    pub fn shutdown(&self) {
        let stack = self.stack.lock().unwrap();
        stack.chat.stop();
        stack.discovery.stop();
        let _ = stack.transport.close();
    }
}

fn build_stack(
    settings: &Settings,
    identity: Arc<Identity>,
    store: Arc<dyn MessageStore>,
    bind_ip: Ipv4Addr,
) -> Stack {
    let broadcast_ip: Ipv4Addr = settings.broadcast_ip.parse().unwrap_or(Ipv4Addr::BROADCAST);

    let transport = Arc::new(
        Transport::new(bind_ip, settings.port, true).expect("binding the configured port should succeed"),
    );
    let discovery = Arc::new(Discovery::new(
        Arc::clone(&transport),
        Arc::clone(&identity),
        broadcast_ip,
        settings.port,
        settings.debug,
    ));
    let chat = Chat::new(Arc::clone(&transport), Arc::clone(&discovery), Arc::clone(&identity), settings.port);
    let room_manager = Arc::new(RoomManager::new(Arc::clone(&identity), Arc::clone(&chat), store));

    Stack {
        transport,
        discovery,
        chat,
        room_manager,
        current_ip: bind_ip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn loopback_settings() -> Settings {
        let mut settings = Settings::default();
        settings.port = 0;
        settings.interface_ip = Some("127.0.0.1".to_string());
        settings.broadcast_ip = "127.0.0.1".to_string();
        settings
    }

    #[test]
    fn new_runtime_binds_loopback_and_exposes_collaborators() {
        let runtime = Runtime::new(loopback_settings());
        assert_eq!(runtime.current_ip(), Ipv4Addr::LOCALHOST);
        assert!(runtime.discovery().get_peers().is_empty());
        assert!(!runtime.identity().anon_id.is_empty());
    }

    #[test]
    fn switch_interface_is_a_no_op_for_the_same_ip() {
        let runtime = Runtime::new(loopback_settings());
        assert!(runtime.switch_interface(Ipv4Addr::LOCALHOST));
        assert_eq!(runtime.current_ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn switch_interface_rebinds_discovery_on_a_new_ip() {
        let runtime = Runtime::new(loopback_settings());
        runtime.start(|_, _| {});
        thread::sleep(Duration::from_millis(50));

        assert!(runtime.switch_interface(Ipv4Addr::UNSPECIFIED));
        assert_eq!(runtime.current_ip(), Ipv4Addr::UNSPECIFIED);
        assert!(runtime.discovery().is_running());

        runtime.shutdown();
    }

    #[test]
    fn room_message_frame_reaches_room_manager_directly() {
        // Exercises the same demultiplexing a real ROOMMSG frame goes
        // through in wire_chat's callback, without needing two discovered
        // peers on real sockets (covered at the chat/discovery layer).
        let runtime = Runtime::new(loopback_settings());
        let room = runtime
            .room_manager()
            .create_room("lobby", "", true, 0)
            .expect("room creation should succeed");

        let result = runtime
            .room_manager()
            .handle_room_message("anon-feedface", &format!("ROOMMSG::{}::hello room", room.id));
        assert_eq!(result, Some((room.id, "hello room".to_string())));
    }
}
