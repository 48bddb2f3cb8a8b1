use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde_json::json;
use stepwise_engine::{Environment, ExecutionError, Executor, ExecutorOptions, WorkflowGraph, parse_initial_file, parse_workflow_file};
use stepwise_providers::{GeminiDecisionFunction, HttpClient, builtin_registry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const GEMINI_KEY_VAR: &str = "GOOGLE_API_KEY";

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the process environment may already be complete.
    let _ = dotenvy::dotenv();
    init_tracing();
    let environment = Environment::from_process();

    let matches = build_cli().get_matches();
    match matches.subcommand() {
        Some(("run", sub)) => run_cmd(sub, environment).await,
        Some(("plan", sub)) => plan_cmd(sub),
        Some(("models", _)) => models_cmd(&environment).await,
        _ => bail!("unknown command; see --help"),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let file = Arg::new("file")
        .long("file")
        .short('f')
        .required(true)
        .action(ArgAction::Set)
        .help("Path to the workflow YAML/JSON");

    Command::new("stepwise")
        .about("Run declarative agent workflows")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Run a workflow and print the final state")
                .arg(file.clone())
                .arg(
                    Arg::new("initial")
                        .long("initial")
                        .action(ArgAction::Set)
                        .help("JSON/YAML object seeding the 'initial' state entry"),
                )
                .arg(
                    Arg::new("pacing-delay")
                        .long("pacing-delay")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to wait between steps"),
                )
                .arg(
                    Arg::new("max-attempts")
                        .long("max-attempts")
                        .value_parser(value_parser!(u32))
                        .help("Attempts per step for transient failures"),
                )
                .arg(Arg::new("model").long("model").action(ArgAction::Set).help("Gemini model name")),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the execution order and dependency edges without running")
                .arg(file),
        )
        .subcommand(Command::new("models").about("List Gemini models that support generateContent"))
}

async fn run_cmd(matches: &ArgMatches, environment: Environment) -> Result<()> {
    let file = matches.get_one::<String>("file").context("--file is required")?;
    let document = parse_workflow_file(file)?;
    let graph = WorkflowGraph::from_document(&document).with_context(|| format!("invalid workflow '{}'", document.workflow_name))?;

    let mut initial = document.initial.clone();
    if let Some(path) = matches.get_one::<String>("initial") {
        initial.extend(parse_initial_file(path)?);
    }

    let mut options = ExecutorOptions::from_settings(&document.settings);
    if let Some(secs) = matches.get_one::<u64>("pacing-delay") {
        options.pacing_delay = Duration::from_secs(*secs);
    }
    if let Some(attempts) = matches.get_one::<u32>("max-attempts") {
        options.retry.max_attempts = *attempts;
    }

    let client = HttpClient::new(HTTP_TIMEOUT)?;
    let mut decision = GeminiDecisionFunction::new(client.clone(), gemini_key(&environment)?);
    if let Some(model) = matches.get_one::<String>("model") {
        decision = decision.with_model(model);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let executor = Executor::new(Arc::new(builtin_registry(&client)), Arc::new(decision), environment).with_options(options);
    let started_at = Utc::now();
    info!(workflow = %document.workflow_name, started_at = %started_at.to_rfc3339(), order = ?graph.order_ids(), "running workflow");

    match executor.run(&graph, initial, cancel).await {
        Ok(report) => {
            let elapsed = Utc::now() - started_at;
            info!(
                workflow = %document.workflow_name,
                elapsed_secs = elapsed.num_seconds(),
                skipped = report.skipped().count(),
                "workflow finished"
            );
            println!("{}", serde_json::to_string_pretty(&report.state)?);
            Ok(())
        }
        Err(error) => {
            print_failure(&error)?;
            Err(anyhow!(error).context(format!("workflow '{}' failed", document.workflow_name)))
        }
    }
}

fn print_failure(error: &ExecutionError) -> Result<()> {
    if let Some(transcript) = error.transcript() {
        let out = json!({
            "failed_step": error.step_id(),
            "transcript": transcript,
        });
        eprintln!("{}", serde_json::to_string_pretty(&out)?);
    }
    Ok(())
}

fn plan_cmd(matches: &ArgMatches) -> Result<()> {
    let file = matches.get_one::<String>("file").context("--file is required")?;
    let document = parse_workflow_file(file)?;
    let graph = WorkflowGraph::from_document(&document).with_context(|| format!("invalid workflow '{}'", document.workflow_name))?;

    let edges: Vec<_> = graph
        .edges()
        .into_iter()
        .map(|(producer, consumer)| json!({ "from": producer, "to": consumer }))
        .collect();
    let steps: Vec<_> = graph
        .execution_order()
        .map(|node| {
            json!({
                "id": node.id(),
                "agent": node.spec.agent.as_str(),
                "depends_on": node.dependencies,
                "tools": node.tools.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();
    let out = json!({
        "workflow_name": document.workflow_name,
        "order": graph.order_ids(),
        "steps": steps,
        "edges": edges,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn models_cmd(environment: &Environment) -> Result<()> {
    let client = HttpClient::new(Duration::from_secs(15))?;
    let backend = GeminiDecisionFunction::new(client, gemini_key(environment)?);
    let models = backend.list_models().await.context(
        "could not list Gemini models; check the API key, that the Generative Language API is enabled, and network access",
    )?;
    if models.is_empty() {
        bail!("no models supporting generateContent were found");
    }
    for name in models {
        println!("- {name}");
    }
    Ok(())
}

fn gemini_key(environment: &Environment) -> Result<String> {
    environment
        .get(GEMINI_KEY_VAR)
        .filter(|key| !key.trim().is_empty())
        .map(str::to_string)
        .with_context(|| format!("{GEMINI_KEY_VAR} is not set (checked the environment and .env)"))
}
