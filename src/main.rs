use std::io::{self, BufRead};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use agentsmith_hub::project::{HubNodeFactory, StdoutOutput};
use agentsmith_hub::{Event, Hub};

#[derive(Parser)]
#[command(name = "agentsmith-hub")]
#[command(about = "Security event-stream processing engine", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a ruleset XML file and report the result
    Validate {
        /// Path to the ruleset XML file
        ruleset: PathBuf,
    },
    /// Evaluate events from stdin through one ruleset, emitting JSON lines
    Run {
        /// Path to the ruleset XML file
        ruleset: PathBuf,
    },
    /// Run a project: input files feed the graph, outputs go to stdout
    Project {
        /// Path to the project YAML file
        project: PathBuf,
        /// Ruleset files registered as RULESET.<file stem>
        #[arg(long = "ruleset")]
        rulesets: Vec<PathBuf>,
        /// Event files registered as INPUT.<file stem>
        #[arg(long = "input")]
        inputs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt::init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .init();
    }

    let hub = Hub::builder().build();
    match cli.command {
        Command::Validate { ruleset } => {
            let source = std::fs::read_to_string(&ruleset)?;
            match hub.compile(&source) {
                Ok(compiled) => {
                    println!(
                        "{}: ok ({} rules)",
                        compiled.id,
                        compiled.rules.len()
                    );
                }
                Err(err) => {
                    eprintln!("{}: {err}", ruleset.display());
                    std::process::exit(1);
                }
            }
        }
        Command::Run { ruleset } => {
            let source = std::fs::read_to_string(&ruleset)?;
            let compiled = hub.compile(&source)?;
            let evaluator = hub.evaluator(compiled);

            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event = match Event::from_slice(line.as_bytes()) {
                    Ok(event) => event,
                    Err(err) => {
                        eprintln!("skipping malformed event: {err}");
                        continue;
                    }
                };
                for emitted in evaluator.evaluate(&event).await {
                    println!("{}", emitted.to_json());
                }
            }
        }
        Command::Project {
            project,
            rulesets,
            inputs,
        } => {
            let source = std::fs::read_to_string(&project)?;
            let config = agentsmith_hub::ProjectConfig::from_yaml(&source)?;

            let mut factory = HubNodeFactory::new();
            for path in &rulesets {
                let name = stem(path)?;
                let compiled = hub.compile(&std::fs::read_to_string(path)?)?;
                factory.register_ruleset(&name, hub.evaluator(compiled));
            }
            for path in &inputs {
                let name = stem(path)?;
                let path = path.clone();
                factory.register_input(&name, move || {
                    Box::new(agentsmith_hub::project::FileInput::new(path.clone()))
                });
            }
            let graph = agentsmith_hub::ProjectGraph::parse(&config.content)?;
            for node in graph
                .nodes
                .iter()
                .filter(|n| n.kind == agentsmith_hub::project::NodeKind::Output)
            {
                factory.register_output(&node.name, || Box::new(StdoutOutput::new()));
            }

            let mut built = hub.build_project(&config, &factory)?;
            built.start().await?;
            tokio::signal::ctrl_c().await?;
            built.stop().await?;
        }
    }
    Ok(())
}

fn stem(path: &std::path::Path) -> anyhow::Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))
}
