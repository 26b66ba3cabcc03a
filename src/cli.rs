// Interactive command dispatcher for the terminal front end.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::runtime::Runtime;

const MAX_LOG_LINES: usize = 200;

pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        LogBuffer { lines: Mutex::new(VecDeque::new()) }
    }

    pub fn record(&self, message: &str) {
        let mut lines = self.lines.lock().unwrap();
        lines.push_back(message.to_string());
        if lines.len() > MAX_LOG_LINES {
            lines.pop_front();
        }
    }

    pub fn recent(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn print_banner(runtime: &Runtime) {
    println!("AnonChat started as: {}", runtime.identity().display_name());
    println!("Security: encrypted (ephemeral session keys)");
    println!("Type /help to see available commands.\n");
}

pub fn print_menu(runtime: &Runtime) {
    println!("\n=== AnonChat ===");
    println!("User: {}", runtime.identity().display_name());
    println!("Interface: {}", runtime.current_ip());
    println!("Commands: /menu /help /logs /peers /send /sendall /quit\n");
}

pub fn print_help() {
    println!(
        "\nCommands:\n\
         \x20 /peers                 List discovered peers\n\
         \x20 /send <id> <message>   Send message to a specific peer\n\
         \x20 /sendall <message>     Send message to all peers\n\
         \x20 /logs                  Show recent logs\n\
         \x20 /menu                  Show the main menu\n\
         \x20 /help                  Show this help\n\
         \x20 /quit                  Exit\n"
    );
}

/// Handles one input line. Returns `false` when the caller should stop
/// reading further input.
pub fn handle_command(line: &str, runtime: &Runtime, logs: &LogBuffer) -> bool {
    let line = line.trim();

    if line == "/quit" || line == "/exit" {
        return false;
    }
    if line == "/menu" {
        print_menu(runtime);
        return true;
    }
    if line == "/help" {
        print_help();
        return true;
    }
    if line == "/logs" {
        let recent = logs.recent();
        if recent.is_empty() {
            println!("No logs yet.");
        } else {
            println!("\nRecent logs:");
            for entry in recent {
                println!("  {entry}");
            }
            println!();
        }
        return true;
    }
    if line == "/peers" {
        let peers = runtime.discovery().get_peers();
        if peers.is_empty() {
            println!("No peers discovered.");
        } else {
            println!("\nPeers:");
            for (peer_id, entry) in peers {
                println!("  {peer_id:<15} {}", entry.ip);
            }
            println!();
        }
        return true;
    }
    if let Some(msg) = line.strip_prefix("/sendall ") {
        let sent = runtime.chat().send_to_all(msg);
        println!("Sent to {sent} peer(s).");
        return true;
    }
    if let Some(rest) = line.strip_prefix("/send ") {
        let mut parts = rest.splitn(2, ' ');
        let (Some(peer_id), Some(msg)) = (parts.next(), parts.next()) else {
            println!("Usage: /send <peer_id> <message>");
            return true;
        };
        match runtime.chat().send_to_peer(peer_id, msg) {
            Ok(()) => println!("Sent to {peer_id}."),
            Err(_) => println!("Unknown peer: {peer_id}"),
        }
        return true;
    }

    println!("Unknown command. Type /help.");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn runtime() -> Runtime {
        let mut settings = Settings::default();
        settings.port = 0;
        settings.interface_ip = Some("127.0.0.1".to_string());
        Runtime::new(settings)
    }

    #[test]
    fn quit_and_exit_stop_the_loop() {
        let runtime = runtime();
        let logs = LogBuffer::new();
        assert!(!handle_command("/quit", &runtime, &logs));
        assert!(!handle_command("/exit", &runtime, &logs));
    }

    #[test]
    fn unknown_peer_send_reports_failure_without_panicking() {
        let runtime = runtime();
        let logs = LogBuffer::new();
        assert!(handle_command("/send anon-ffffffff hi", &runtime, &logs));
    }

    #[test]
    fn log_buffer_caps_at_max_lines() {
        let logs = LogBuffer::new();
        for i in 0..(MAX_LOG_LINES + 10) {
            logs.record(&format!("line {i}"));
        }
        assert_eq!(logs.recent().len(), MAX_LOG_LINES);
    }
}
