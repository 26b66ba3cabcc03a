use std::sync::Arc;

use anonchat::{handle_command, print_banner, print_menu, LogBuffer, Runtime, Settings};

fn main() {
    env_logger::init();

    let settings = Settings::from_env();
    let runtime = Arc::new(Runtime::new(settings));
    let logs = Arc::new(LogBuffer::new());

    print_banner(&runtime);

    let log_handle = Arc::clone(&logs);
    runtime.start(move |sender_id, message| {
        log_handle.record(&format!("[{sender_id}] {message}"));
        println!("[{sender_id}] {message}");
    });

    print_menu(&runtime);

    let stdin = std::io::stdin();
    loop {
        let mut line = String::new();
        print!("> ");
        use std::io::Write as _;
        let _ = std::io::stdout().flush();

        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if !handle_command(line, &runtime, &logs) {
            break;
        }
    }

    println!("\nExiting...");
    runtime.shutdown();
}
