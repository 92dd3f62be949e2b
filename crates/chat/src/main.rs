use std::io::Write as _;
use std::process::ExitCode;

use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use wayground_chat::command::HELP_TEXT;
use wayground_chat::{ChatSession, Command, ConversationStore, SessionUpdate, SettingsStore};

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to open conversation storage on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: wayground_storage::StorageError,
    },
    #[snafu(display("failed to build chat backend on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: wayground_llm::BackendError,
    },
    #[snafu(display("failed to read terminal input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

enum Step {
    Input(Option<String>),
    Update(Option<SessionUpdate>),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "wayground stopped");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    tracing::info!(
        config_path = ?settings_store.config_path(),
        api_base_url = %settings.api_base_url,
        "settings loaded"
    );

    let storage = wayground_storage::open_store(settings.storage.to_location())
        .await
        .context(StorageSnafu {
            stage: "open-conversation-storage",
        })?;
    let backend = wayground_llm::create_backend(settings.to_backend_config()).context(
        BackendSnafu {
            stage: "create-http-backend",
        },
    )?;

    let mut session = ChatSession::new(ConversationStore::load(storage), backend);
    println!("{HELP_TEXT}");
    print_current(&session);
    resume_current(&mut session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let step = tokio::select! {
            line = lines.next_line() => Step::Input(line.context(ReadInputSnafu { stage: "read-line" })?),
            update = session.next_update() => Step::Update(update),
        };

        match step {
            Step::Input(None) => break,
            Step::Input(Some(line)) => {
                if !handle_command(&mut session, Command::parse(&line)) {
                    break;
                }
            }
            Step::Update(Some(update)) => render_update(&update),
            Step::Update(None) => break,
        }
    }

    Ok(())
}

/// Returns false when the user asked to leave.
fn handle_command(session: &mut ChatSession, command: Command) -> bool {
    match command {
        Command::Empty => {}
        Command::Quit => return false,
        Command::Help => println!("{HELP_TEXT}"),
        Command::Invalid(message) => println!("{message}"),
        Command::Send(query) => match session.submit(&query) {
            Ok(_) => print_prompt("bot> "),
            Err(error) => println!("not sent: {error}"),
        },
        Command::New => {
            session.new_conversation();
            println!("started a new conversation");
        }
        Command::List => print_list(session),
        Command::Open(position) => {
            let Some(conversation_id) = conversation_at(session, position) else {
                println!("no conversation at {position}");
                return true;
            };
            match session.select_conversation(conversation_id) {
                Ok(_) => {
                    print_current(session);
                    resume_current(session);
                }
                Err(error) => println!("could not resume replies: {error}"),
            }
        }
        Command::Delete(position) => {
            let Some(conversation_id) = conversation_at(session, position) else {
                println!("no conversation at {position}");
                return true;
            };
            if session.delete_conversation(conversation_id) {
                println!("deleted conversation {position}");
            }
        }
    }
    true
}

fn conversation_at(session: &ChatSession, position: usize) -> Option<wayground_chat::ConversationId> {
    session
        .store()
        .conversations()
        .get(position.checked_sub(1)?)
        .map(|conversation| conversation.id)
}

fn resume_current(session: &mut ChatSession) {
    match session.observe_current() {
        Ok(0) => {}
        Ok(_) => print_prompt("bot> "),
        Err(error) => println!("could not resume replies: {error}"),
    }
}

fn print_list(session: &ChatSession) {
    let current = session.store().current_conversation_id();
    let conversations = session.store().conversations();
    if conversations.is_empty() {
        println!("no saved conversations");
        return;
    }

    for (index, conversation) in conversations.iter().enumerate() {
        let marker = if Some(conversation.id) == current { "*" } else { " " };
        println!("{marker} {:>2}. {}", index + 1, conversation.title);
    }
}

fn print_current(session: &ChatSession) {
    let Some(conversation) = session.current_conversation() else {
        return;
    };

    println!("== {} ==", conversation.title);
    for pair in &conversation.messages {
        println!("you> {}", pair.query);
        if let Some(response) = &pair.response {
            println!("bot> {response}");
        }
    }
}

fn render_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Fragment { fragment, .. } => print_prompt(fragment),
        SessionUpdate::Completed { .. } => println!(),
        SessionUpdate::Failed { message, .. } => println!("\n[reply failed: {message}]"),
    }
}

fn print_prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}
