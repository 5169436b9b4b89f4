use std::io;
use std::sync::Arc;

use session_store::TaskStore;
use task_agent::commands::parse_input;
use task_agent::config::config_from_env;
use task_agent::logging::init_logging;
use task_agent::planners::planner_from_env;
use task_agent::runtime::{Runtime, RuntimeDeps};
use task_agent::session::McpToolSession;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> io::Result<()> {
    init_logging();

    let config = config_from_env().map_err(io::Error::other)?;
    let planner = planner_from_env().map_err(io::Error::other)?;

    let cwd = std::env::current_dir()?;
    let store = match &config.store_dir {
        Some(dir) => TaskStore::new(cwd.join(dir)),
        None => TaskStore::at_default(&cwd),
    };

    let session = Arc::new(McpToolSession::new(config.client.clone()).map_err(io::Error::other)?);
    let mut stdout = tokio::io::stdout();
    match session.server_info().await {
        Ok(info) => {
            let banner = format!(
                "Tool server: {} {} ({})\n",
                info.name, info.version, config.client.base_url
            );
            stdout.write_all(banner.as_bytes()).await?;
        }
        Err(error) => tracing::debug!(%error, "server info unavailable"),
    }
    stdout
        .write_all(b"Type a goal to start, or /help for commands.\n")
        .await?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (runtime, handle) = Runtime::new(
        RuntimeDeps {
            session,
            generator: planner.generator,
            analyzer: planner.analyzer,
            store,
            session_key: config.session_key.clone(),
        },
        config.orchestrator,
        events_tx,
    );

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            let line = format!("{}\n", event.render());
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(input) = parse_input(&line) else {
                continue;
            };
            if !handle.send(input) {
                break;
            }
        }
    });

    let task = runtime.run().await;
    reader.abort();
    let _ = printer.await;
    tracing::info!(task_id = %task.id, state = %task.state, "session closed");
    Ok(())
}
