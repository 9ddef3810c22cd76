use clap::{Parser, Subcommand};
use std::io::Write;

mod diagnostics;
mod script;

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "gizmo-replay")]
#[command(about = "Replay a gizmo graph script and print its root events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script (validated before the first step) and print one JSON
    /// line per root event.
    Run {
        #[arg(long)]
        script: String,

        /// Print a JSON snapshot of these node aliases after the last step.
        #[arg(long)]
        snapshot: Vec<String>,

        /// -v for debug logging, -vv for trace.
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },
}

fn main() -> Result<()> {
    use anyhow::Context;

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Run {
            script,
            snapshot,
            verbose,
        } => {
            diagnostics::init(verbose);

            // 1) Parse + validate the script.
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {script}"))?;
            let raw = script::RawScript::from_json(&text)
                .with_context(|| format!("parsing {script}"))?;
            let validated = raw.validate_and_build()?;

            // 2) Replay.
            let mut replay = script::Replay::new(&validated)?;
            let events = replay.run(&validated)?;

            // 3) Report.
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for event in &events {
                writeln!(out, "{}", serde_json::to_string(event)?)?;
            }
            for alias in &snapshot {
                let mut doc = serde_json::Map::new();
                doc.insert(alias.clone(), replay.snapshot(alias)?);
                writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
            }
            tracing::debug!(
                events = events.len(),
                nodes = replay.graph().len(),
                "replay finished"
            );
        }
    }

    Ok(())
}
