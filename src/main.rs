use anyhow::{Context, Result};
use polychat::models::ModelSelection;
use polychat::state::AppState;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use uuid::Uuid;

// Minimal line-oriented driver over the library. Rendering is a plain
// terminal echo; a real front end would sit where this loop does.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let data_dir = match std::env::var_os("POLYCHAT_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_local_dir()
            .context("Could not determine the local data directory")?
            .join("polychat"),
    };
    let mut state = AppState::init(&data_dir).await?;

    println!("polychat - type a message, or /help for commands");
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if let Some(command) = input.strip_prefix('/') {
            if !run_command(&mut state, command).await? {
                break;
            }
        } else {
            submit(&mut state, input).await?;
        }
    }

    // Keep whatever was typed since the last submission
    state.store.archive_current().await?;
    Ok(())
}

async fn submit(state: &mut AppState, text: &str) -> Result<()> {
    let outcome = state.submit(text).await?;
    for reply in &outcome.replies {
        let content = state
            .store
            .messages()
            .iter()
            .find(|m| m.id == reply.message_id)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        println!("[{}] {}", reply.model_id, content);
    }
    if outcome.cancelled {
        println!("(generation stopped)");
    }
    Ok(())
}

/// Returns false when the loop should exit.
async fn run_command(state: &mut AppState, command: &str) -> Result<bool> {
    let (name, rest) = match command.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "help" => {
            println!("/new                start a fresh conversation");
            println!("/list               list archived conversations");
            println!("/open <id>          switch to an archived conversation");
            println!("/delete <id>        delete an archived conversation");
            println!("/use <m1[,m2,...]>  select the model(s) to dispatch to");
            println!("/models             show the current selection");
            println!("/stream on|off      toggle streaming replies");
            println!("/quit               exit");
        }
        "new" => {
            state.store.start_new().await?;
            println!("started a new conversation");
        }
        "list" => {
            let mut conversations: Vec<_> = state.store.history().conversations.values().collect();
            conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            for conversation in conversations {
                println!(
                    "{}  {}  ({} messages)",
                    conversation.id,
                    conversation.title,
                    conversation.messages.len()
                );
            }
        }
        "open" => match rest.parse::<Uuid>() {
            Ok(id) => {
                if state.store.load(id).await? {
                    for message in state.store.messages() {
                        let tag = message.model_id.as_deref().unwrap_or("you");
                        println!("[{}] {}", tag, message.content);
                    }
                } else {
                    println!("no conversation with id {}", id);
                }
            }
            Err(_) => println!("usage: /open <conversation-id>"),
        },
        "delete" => match rest.parse::<Uuid>() {
            Ok(id) => state.store.delete(id).await?,
            Err(_) => println!("usage: /delete <conversation-id>"),
        },
        "use" => {
            let models: Vec<String> = rest
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            match models.len() {
                0 => println!("usage: /use <model[,model,...]>"),
                1 => {
                    state.settings.selection = ModelSelection::single(models[0].clone());
                    state.save_settings().await?;
                }
                _ => {
                    state.settings.selection = ModelSelection::multi(models);
                    state.save_settings().await?;
                }
            }
        }
        "models" => {
            println!("selected: {}", state.settings.selection.model_ids().join(", "));
            for config in &state.settings.models {
                println!("configured: {} @ {}", config.model, config.api_url);
            }
        }
        "stream" => match rest {
            "on" => {
                state.settings.streaming = true;
                state.save_settings().await?;
            }
            "off" => {
                state.settings.streaming = false;
                state.save_settings().await?;
            }
            _ => println!("usage: /stream on|off"),
        },
        "quit" | "exit" => return Ok(false),
        other => println!("unknown command: /{}", other),
    }
    Ok(true)
}
