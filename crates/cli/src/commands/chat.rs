use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::bootstrap;
use crate::commands::CommandResult;
use kcart_agent::session::SessionId;
use kcart_core::config::{AppConfig, LoadOptions};

pub fn run(session: Option<String>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    bootstrap::init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let runtime = bootstrap::build_runtime(&config)
            .await
            .map_err(|error| ("bootstrap", format!("{error:#}"), 4u8))?;

        let session_id = SessionId(session.unwrap_or_else(fresh_session_id));
        println!("kcart chat ({}). Type 'exit' to leave.", session_id.0);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|error| ("stdin", error.to_string(), 5u8))?;
            let Some(line) = line else { break };
            let line = line.trim();
            if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                break;
            }

            let reply = runtime.engine.advance(&session_id, line).await;
            println!("{reply}");
        }

        runtime.pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success("chat", "session ended"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

fn fresh_session_id() -> String {
    let seconds = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("chat-{seconds}")
}
