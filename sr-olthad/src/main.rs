//! sr-OLTHAD console.
//!
//! Drives an [`SrOlthad`] session from the terminal: the user supplies the
//! environment state, watches the LM streams, approves or rejects each step's
//! OLTHAD diff and executes the returned actions.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use sr_olthad::agents::AgentName;
use sr_olthad::agents::prompts::{
    PromptInputs, PromptRegistry, example_olthad, example_task_in_question,
};
use sr_olthad::core::stringify::{StringifyOptions, stringify};
use sr_olthad::emissions::{
    PostLmGenerationStepApprover, PostLmGenerationStepEmission, PreLmGenerationStepEmission,
    PreLmGenerationStepHandler, StepHandlers,
};
use sr_olthad::io::config::{DEFAULT_CONFIG_FILE, SrOlthadConfig, load_config, write_config};
use sr_olthad::io::lm::{LmStreamsHandler, OpenAiLmProvider};
use sr_olthad::io::tree_store::{load_session, write_session};
use sr_olthad::logging;
use sr_olthad::step::{ExecutableActionClassifier, SrOlthad};

#[derive(Parser)]
#[command(
    name = "sr-olthad",
    version,
    about = "Structured Reasoning with Open-Language Task Hierarchies of Any Depth"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file with the default settings.
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Start an interactive console session.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Highest-level task (asked for when omitted).
        #[arg(long)]
        task: Option<String>,
        /// File with documentation of the environment's domain.
        #[arg(long)]
        domain_docs: Option<PathBuf>,
        /// Accept every LM step without asking.
        #[arg(long)]
        auto_approve: bool,
        /// OLTHAD snapshot to resume from (if present) and save after each step.
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Print an agent's rendered prompts for the example OLTHAD.
    Prompts {
        /// Agent key, e.g. `planner` or `successful-completion`.
        agent: AgentName,
        #[arg(long, default_value = "1.0")]
        version: String,
        #[arg(long, default_value = "(environment state)")]
        env_state: String,
    },
    /// Print a saved OLTHAD the way the LMs see it.
    Show {
        snapshot: PathBuf,
        /// Redact planned subtasks below and hide the status of this node.
        #[arg(long)]
        in_question: Option<String>,
        #[arg(long, default_value_t = 3)]
        indent: usize,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Run {
            config,
            task,
            domain_docs,
            auto_approve,
            state,
        } => {
            cmd_run(
                &config,
                task,
                domain_docs.as_deref(),
                auto_approve,
                state.as_deref(),
            )
            .await
        }
        Command::Prompts {
            agent,
            version,
            env_state,
        } => cmd_prompts(agent, &version, env_state),
        Command::Show {
            snapshot,
            in_question,
            indent,
        } => cmd_show(&snapshot, in_question.as_deref(), indent),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SrOlthadConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn cmd_run(
    config_path: &Path,
    task: Option<String>,
    domain_docs: Option<&Path>,
    auto_approve: bool,
    state: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let domain_documentation = match domain_docs {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => String::new(),
    };
    let handlers = StepHandlers {
        pre_step: Some(Arc::new(ConsolePreStep)),
        approver: if auto_approve {
            None
        } else {
            Some(Arc::new(ConsoleApprover))
        },
        streams: Some(Arc::new(ConsoleStreams::default())),
    };
    let lms = OpenAiLmProvider::new(config.openai.clone());
    let classifier = Arc::new(ConsoleClassifier);

    let mut sr_olthad = match state.filter(|path| path.exists()) {
        Some(path) => {
            let snapshot = load_session(path)?;
            println!("resuming from {}", path.display());
            SrOlthad::resume(
                snapshot,
                domain_documentation,
                classifier,
                &config,
                &lms,
                handlers,
            )?
        }
        None => {
            let task = match task {
                Some(task) => task,
                None => ask("Highest-level task:").await?,
            };
            SrOlthad::new(task, domain_documentation, classifier, &config, &lms, handlers)?
        }
    };

    loop {
        let env_state = read_env_state().await?;
        let action = sr_olthad.next_action(env_state).await?;
        if let Some(path) = state {
            write_session(path, &sr_olthad.snapshot())?;
        }
        match action {
            Some(action) => println!("\nNext action: {action}"),
            None => {
                println!("\nThe highest-level task has been exited.");
                return Ok(());
            }
        }
    }
}

fn cmd_prompts(agent: AgentName, version: &str, env_state: String) -> Result<()> {
    let indent = SrOlthadConfig::default().json_indent;
    let registry = PromptRegistry::new(indent)?;
    let task = example_task_in_question();
    let opts = StringifyOptions::with_indent(indent).in_question(&task.id);
    let inputs = PromptInputs {
        env_state,
        olthad: stringify(&example_olthad(), &opts),
        task_in_question: stringify(&task, &opts),
    };
    for message in registry.render(agent, version, &inputs)? {
        println!("=== {} ===\n{}\n", message.role.as_str(), message.content);
    }
    Ok(())
}

fn cmd_show(snapshot: &Path, in_question: Option<&str>, indent: usize) -> Result<()> {
    let session = load_session(snapshot)?;
    let traversal = &session.traversal;
    let mut opts = StringifyOptions::with_indent(indent);
    if let Some(id) = in_question {
        opts = opts.in_question(id);
    }
    println!("{}", stringify(traversal.root_node(), &opts));
    match traversal.cur_node_id() {
        Some(id) => println!("current node: {id}"),
        None => println!("current node: none (exited the root)"),
    }
    if let Some(id) = &session.last_action_node_id {
        println!("awaiting summary of action: {id}");
    }
    Ok(())
}

/// Read one line from stdin after printing `question`.
async fn ask(question: &str) -> Result<String> {
    let question = question.to_string();
    tokio::task::spawn_blocking(move || -> Result<String> {
        print!("{question} ");
        io::stdout().flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            bail!("stdin closed");
        }
        Ok(line.trim().to_string())
    })
    .await?
}

async fn confirm(question: &str) -> Result<bool> {
    loop {
        match ask(&format!("{question} [y/n]")).await?.to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please answer 'y' or 'n'."),
        }
    }
}

/// Environment state lines, up to the first empty line.
async fn read_env_state() -> Result<String> {
    println!("\nEnvironment state (finish with an empty line):");
    tokio::task::spawn_blocking(|| -> Result<String> {
        let mut lines = Vec::new();
        for line in io::stdin().lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                break;
            }
            lines.push(line);
        }
        if lines.is_empty() {
            bail!("no environment state given");
        }
        Ok(lines.join("\n"))
    })
    .await?
}

struct ConsolePreStep;

#[async_trait]
impl PreLmGenerationStepHandler for ConsolePreStep {
    async fn handle(&self, emission: &PreLmGenerationStepEmission) {
        println!(
            "\n=== {} (current node {}) ===",
            emission.agent_name, emission.cur_node_id
        );
        if emission.n_streams_to_handle > 1 {
            println!("({} voting calls)", emission.n_streams_to_handle);
        }
    }
}

/// Prints chunks as they arrive, labeling each switch between voting
/// streams.
#[derive(Default)]
struct ConsoleStreams {
    last_idx: Mutex<Option<Option<usize>>>,
}

impl LmStreamsHandler for ConsoleStreams {
    fn handle(&self, chunk: &str, stream_idx: Option<usize>) {
        let mut last = self
            .last_idx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = io::stdout().lock();
        if let Some(idx) = stream_idx
            && *last != Some(stream_idx)
        {
            let _ = write!(out, "\n[stream {idx}] ");
        }
        *last = Some(stream_idx);
        let _ = write!(out, "{chunk}");
        let _ = out.flush();
    }
}

struct ConsoleApprover;

#[async_trait]
impl PostLmGenerationStepApprover for ConsoleApprover {
    async fn approve(&self, emission: &PostLmGenerationStepEmission) -> Result<bool> {
        println!("\n--- OLTHAD after the {} step ---", emission.agent_name);
        for line in &emission.diff {
            print!("{line}");
            if !line.ends_with('\n') {
                println!();
            }
        }
        confirm("Accept this step?").await
    }
}

struct ConsoleClassifier;

#[async_trait]
impl ExecutableActionClassifier for ConsoleClassifier {
    async fn is_executable_action(&self, task: &str) -> Result<bool> {
        confirm(&format!("\nIs \"{task}\" an executable action?")).await
    }
}
