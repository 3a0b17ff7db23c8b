//! Troupe CLI
//!
//! Front-end for the orchestration engine: run single agents or workflows,
//! watch live progress, and inspect token usage. Ctrl-C stops every running
//! agent.

use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use troupe::accounting::JsonSnapshotStore;
use troupe::agent::{AgentRole, AgentTaskRunner};
use troupe::state::AgentStatus;
use troupe::workflow::{find_template, templates, WorkflowExecutor};
use troupe::{
    AccountingStore, CliWorker, Config, Event, EventBus, Result, SessionTracker, StateStore,
};

#[derive(Parser)]
#[command(name = "troupe")]
#[command(author, version, about = "Role-based agent orchestration")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single agent
    Run {
        /// Agent role (planner, scout, implementer, reviewer, tester, aggregator)
        role: String,

        /// Prompt for the agent
        prompt: String,
    },

    /// List agent profiles
    Agents,

    /// Workflow commands
    Workflow {
        #[command(subcommand)]
        action: WorkflowCommands,
    },

    /// Show token usage and cost
    Usage,

    /// Reset token usage and cost counters
    ResetUsage,

    /// Initialize the .troupe directory
    Init,

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Run a workflow template
    Run {
        /// Template id (feature, survey, council)
        id: String,

        /// Initial prompt shared by the workflow's steps
        prompt: String,
    },

    /// List workflow templates
    List,
}

/// Constructed stores and executors, wired together once per invocation
struct App {
    state: Arc<StateStore>,
    runner: Arc<AgentTaskRunner>,
    executor: WorkflowExecutor,
}

fn build_app(config: &Config, events: Arc<EventBus>) -> Result<App> {
    let registry = Arc::new(config.registry());
    let worker = Arc::new(CliWorker::new(
        &config.worker.command,
        config.worker.default_model.clone(),
        config.worker.dangerously_skip_permissions,
    )?);
    let state = Arc::new(StateStore::new(events.clone()));
    let accounting = Arc::new(AccountingStore::new(
        Arc::new(JsonSnapshotStore::new(config.accounting_path())),
        events.clone(),
        config.budget(),
    ));
    let sessions = Arc::new(SessionTracker::new());

    let runner = Arc::new(AgentTaskRunner::new(
        registry.clone(),
        worker,
        state.clone(),
        accounting.clone(),
        sessions.clone(),
        config.retry.max_retries,
        config.worker.default_model.clone(),
    ));
    let executor = WorkflowExecutor::new(
        runner.clone(),
        registry,
        state.clone(),
        events.clone(),
    );

    Ok(App {
        state,
        runner,
        executor,
    })
}

/// Print lifecycle and budget events as they arrive
fn spawn_event_printer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Event::RoleStateChanged { state } => match state.status {
                    AgentStatus::Running if state.output.is_empty() => {
                        if state.retry_count == 0 {
                            eprintln!("▶ {} running", state.role);
                        } else {
                            eprintln!("▶ {} retrying (attempt {})", state.role, state.retry_count);
                        }
                    }
                    AgentStatus::Completed => eprintln!("✓ {} completed", state.role),
                    AgentStatus::Error => eprintln!(
                        "✗ {} failed: {}",
                        state.role,
                        state.error.as_deref().unwrap_or("unknown error")
                    ),
                    AgentStatus::Stopped => eprintln!("■ {} stopped", state.role),
                    _ => {}
                },
                Event::BudgetWarning {
                    daily_tokens,
                    daily_limit,
                    ..
                } => {
                    eprintln!(
                        "⚠ budget warning: {} of {} daily tokens used",
                        daily_tokens, daily_limit
                    );
                }
                Event::BudgetExceeded {
                    daily_tokens,
                    daily_limit,
                } => {
                    eprintln!(
                        "⚠ budget exceeded: {} of {} daily tokens used",
                        daily_tokens, daily_limit
                    );
                }
                Event::WorkflowCompleted { id, outputs } => {
                    eprintln!("✓ workflow {} completed ({} outputs)", id, outputs.len());
                }
                _ => {}
            }
        }
    });
}

/// Route Ctrl-C to stop_all so in-flight workers are cancelled cleanly
fn install_interrupt_handler(state: Arc<StateStore>) {
    let result = ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, stopping all agents");
        state.stop_all();
    });
    if let Err(e) = result {
        tracing::warn!("Failed to install interrupt handler: {}", e);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { role, prompt } => {
            let role = AgentRole::from_str(&role)?;
            let events = Arc::new(EventBus::new());
            spawn_event_printer(&events);

            let app = build_app(&config, events)?;
            install_interrupt_handler(app.state.clone());

            let result = app.runner.execute(role, &prompt).await;
            if result.success {
                println!("{}", result.output);
                if let Some(usage) = result.usage {
                    eprintln!(
                        "{} tokens ({} in / {} out)",
                        usage.total_tokens, usage.input_tokens, usage.output_tokens
                    );
                }
            } else {
                eprintln!(
                    "Agent failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
                std::process::exit(1);
            }
        }

        Commands::Agents => {
            let registry = config.registry();
            for profile in registry.profiles() {
                let model = profile.resolved_model(&config.worker.default_model);
                println!(
                    "{:<12} {:<14} model={:<10} tools={}",
                    profile.role.name(),
                    profile.display_name,
                    model,
                    profile.capabilities.join(",")
                );
            }
        }

        Commands::Workflow { action } => match action {
            WorkflowCommands::Run { id, prompt } => {
                let definition = find_template(&id).ok_or_else(|| {
                    troupe::Error::Workflow(format!("unknown workflow template: {}", id))
                })?;

                let events = Arc::new(EventBus::new());
                spawn_event_printer(&events);

                let app = build_app(&config, events)?;
                install_interrupt_handler(app.state.clone());

                let outputs = app.executor.run(&definition, &prompt).await?;

                let mut roles: Vec<_> = outputs.keys().copied().collect();
                roles.sort();
                for role in roles {
                    println!("\n=== {} ===\n{}", role, outputs[&role]);
                }
                if outputs.len() < definition.steps.len() {
                    eprintln!(
                        "\n{} of {} steps produced output",
                        outputs.len(),
                        definition.steps.len()
                    );
                }
            }
            WorkflowCommands::List => {
                for template in templates() {
                    let steps: Vec<&str> =
                        template.steps.iter().map(|s| s.role.name()).collect();
                    println!(
                        "{:<10} {:<12} {} [{}]",
                        template.id,
                        format!("({})", template.pattern),
                        template.name,
                        steps.join(" → ")
                    );
                }
            }
        },

        Commands::Usage => {
            let events = Arc::new(EventBus::new());
            let accounting = AccountingStore::new(
                Arc::new(JsonSnapshotStore::new(config.accounting_path())),
                events,
                config.budget(),
            );
            print_usage(&accounting.snapshot());
        }

        Commands::ResetUsage => {
            let events = Arc::new(EventBus::new());
            let accounting = AccountingStore::new(
                Arc::new(JsonSnapshotStore::new(config.accounting_path())),
                events,
                config.budget(),
            );
            accounting.reset_all();
            println!("Usage counters reset");
        }

        Commands::Init => {
            troupe::config::init()?;
            println!("Initialized .troupe directory");
        }

        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Failed to render config: {}", e),
        },
    }

    Ok(())
}

fn print_usage(snapshot: &troupe::AccountingSnapshot) {
    println!(
        "Totals: {} tokens ({} in / {} out), cost ${:.4}",
        snapshot.totals.total_tokens,
        snapshot.totals.input_tokens,
        snapshot.totals.output_tokens,
        snapshot.totals.cost.unwrap_or(0.0)
    );
    println!("Invocations: {}", snapshot.session_count);

    if let Ok(age) = (chrono::Utc::now() - snapshot.last_daily_reset).to_std() {
        println!(
            "Daily: {} tokens (window started {} ago)",
            snapshot.daily_tokens,
            humantime::format_duration(std::time::Duration::from_secs(age.as_secs()))
        );
    }

    if let Some(budget) = &snapshot.budget {
        let status = if budget.enabled { "enabled" } else { "disabled" };
        println!(
            "Budget: {} / {} daily tokens ({})",
            snapshot.daily_tokens, budget.daily_limit, status
        );
    }

    let mut roles: Vec<_> = snapshot.per_role.keys().copied().collect();
    roles.sort();
    if !roles.is_empty() {
        println!("\nPer role:");
        for role in roles {
            let usage = &snapshot.per_role[&role];
            println!(
                "  {:<12} {} tokens, ${:.4}",
                role.name(),
                usage.total_tokens,
                usage.cost.unwrap_or(0.0)
            );
        }
    }
}
