use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use deliberation::gateway::DEFAULT_BASE_URL;
use deliberation::storage::{
    ContextSnapshot, ContextStore, ConversationStore, RoleSnapshot, RoleStore, SettingsStore,
};
use deliberation::{
    selector, CouncilConfig, DataLayout, DeliberationEvent, ModelCatalog, OpenRouterGateway,
    SelectionStrategy, TurnOrchestrator,
};

#[derive(Parser)]
#[command(name = "quorum", about = "Multi-model deliberation council")]
struct Cli {
    /// Root data directory for conversations, contexts, roles, settings
    #[arg(long, default_value = "data")]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List models available from the provider catalog
    Models {
        /// Bypass the catalog cache
        #[arg(long)]
        refresh: bool,
    },
    /// Pick a council with a selection strategy
    Select {
        /// One of: max_stakes, max_stakes_optimized, max_cultural_biases, cheapest
        strategy: SelectionStrategy,
        /// Desired council size (clamped to the minimum of 3)
        #[arg(long, default_value_t = 4)]
        count: usize,
        /// Persist the selection to a conversation; its next turns use
        /// these models instead of the configured council
        #[arg(long)]
        conversation_id: Option<String>,
    },
    /// Create a new conversation
    New {
        /// Pin a stored context to the conversation
        #[arg(long)]
        context_id: Option<String>,
        /// Pin a stored role to the conversation
        #[arg(long)]
        role_id: Option<String>,
    },
    /// Send a message and run a full deliberation turn
    Ask {
        conversation_id: String,
        message: String,
    },
    /// List conversations, newest first
    Conversations,
    /// Start the clarification dialogue for a conversation
    Clarify { conversation_id: String },
    /// Answer the current clarification question
    Answer {
        conversation_id: String,
        answer: String,
    },
    /// Confirm the briefing and convene the council
    Confirm { conversation_id: String },
    /// Show current settings (API key masked)
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let layout = DataLayout::new(&cli.data_dir);
    let settings = SettingsStore::new(layout.settings_file());
    let config = CouncilConfig::from_store(&settings)?;

    match cli.command {
        Command::Models { refresh } => {
            let catalog = ModelCatalog::new(&config.api_key, DEFAULT_BASE_URL);
            let models = catalog.available_models(refresh).await?;
            for model in models {
                println!("{}\t{}\t{}", model.id, model.provider, model.name);
            }
        }
        Command::Select {
            strategy,
            count,
            conversation_id,
        } => {
            let catalog = ModelCatalog::new(&config.api_key, DEFAULT_BASE_URL);
            let models = catalog.available_models(false).await?;
            let selection = selector::select(strategy, count, &models)?;
            for model in &selection.models {
                let rationale = selection
                    .rationales
                    .get(model)
                    .map(String::as_str)
                    .unwrap_or("");
                println!("{model}\t{rationale}");
            }
            if let Some(id) = conversation_id {
                ConversationStore::new(layout.conversations_dir())
                    .set_model_selection(&id, selection)
                    .context("persisting model selection")?;
                info!(conversation = %id, "model selection persisted");
            }
        }
        Command::New {
            context_id,
            role_id,
        } => {
            let context_snapshot = match context_id {
                Some(id) => {
                    let context = ContextStore::new(layout.contexts_dir())
                        .get(&id)
                        .context("loading context")?;
                    Some(ContextSnapshot {
                        id: context.id,
                        name: context.name,
                        content: context.content,
                    })
                }
                None => None,
            };
            let role_snapshot = match role_id {
                Some(id) => {
                    let role = RoleStore::new(layout.roles_dir())
                        .get(&id)
                        .context("loading role")?;
                    Some(RoleSnapshot {
                        id: role.id,
                        name: role.name,
                        description: role.description,
                    })
                }
                None => None,
            };
            let store = ConversationStore::new(layout.conversations_dir());
            let conversation = store.create(context_snapshot, role_snapshot)?;
            println!("{}", conversation.id);
        }
        Command::Ask {
            conversation_id,
            message,
        } => {
            let orchestrator = orchestrator(&layout, &config);
            info!(conversation = %conversation_id, "running deliberation turn");
            let events = orchestrator.run_turn(&conversation_id, &message).await?;
            print_events(&events);
        }
        Command::Conversations => {
            let store = ConversationStore::new(layout.conversations_dir());
            for summary in store.list()? {
                println!(
                    "{}\t{}\t{} messages\t{}",
                    summary.id, summary.updated_at, summary.message_count, summary.title
                );
            }
        }
        Command::Clarify { conversation_id } => {
            let orchestrator = orchestrator(&layout, &config);
            let question = orchestrator.start_clarification(&conversation_id).await?;
            println!("{}", serde_json::to_string_pretty(&question)?);
        }
        Command::Answer {
            conversation_id,
            answer,
        } => {
            let orchestrator = orchestrator(&layout, &config);
            let outcome = orchestrator.submit_answer(&conversation_id, &answer).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Confirm { conversation_id } => {
            let orchestrator = orchestrator(&layout, &config);
            let events = orchestrator.confirm_briefing(&conversation_id).await?;
            print_events(&events);
        }
        Command::Settings => {
            let masked = settings.load()?.masked();
            println!("{}", serde_json::to_string_pretty(&masked)?);
        }
    }

    Ok(())
}

fn orchestrator(layout: &DataLayout, config: &CouncilConfig) -> TurnOrchestrator {
    let backend = Arc::new(OpenRouterGateway::new(&config.api_key));
    let store = ConversationStore::new(layout.conversations_dir());
    TurnOrchestrator::new(backend, store, config.clone())
}

fn print_events(events: &[DeliberationEvent]) {
    for event in events {
        print!("{}", event.to_sse());
    }
}
