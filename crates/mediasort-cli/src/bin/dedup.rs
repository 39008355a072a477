use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use mediasort_core::backups::{self, BackupAction};
use mediasort_core::dedup;
use mediasort_core::writer::{self, PlanCommand, PlanWriter};
use mediasort_core::ThrottledProgress;

#[derive(Parser)]
#[command(name = "mediasort-dedup", version, about = "Find duplicate media by content hash and clean up backup copies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a `sha256<TAB>relative/path` log for every file below DIR
    Hash {
        dir: PathBuf,
        /// Log file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Turn a hash log into `rm` commands for redundant copies
    Group {
        log: PathBuf,
        #[command(flatten)]
        plan: PlanArgs,
    },
    /// Resolve `name~` backup files below DIR
    Backups {
        dir: PathBuf,
        #[command(flatten)]
        plan: PlanArgs,
    },
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Append the plan to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Apply the plan after printing it
    #[arg(long)]
    execute: bool,
}

impl PlanArgs {
    fn emit(&self, commands: &[PlanCommand], origin: &Path) -> anyhow::Result<(u64, u64)> {
        let mut plan = PlanWriter::open(self.output.as_deref())?;
        plan.header(origin)?;
        plan.write(commands)?;
        let executed = if self.execute {
            writer::execute(commands)?
        } else {
            0
        };
        Ok((plan.lines(), executed))
    }
}

fn hash(dir: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }
    let pb = mediasort_cli::progress_bar();
    let callback = |stage: &str, current: u64, total: u64, message: &str| {
        mediasort_cli::report(&pb, stage, current, total, message);
    };
    let entries = dedup::build_hash_log(dir, &ThrottledProgress::new(&callback));
    pb.finish_and_clear();
    let entries = entries?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(fs::File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    dedup::write_hash_log(&entries, &mut out)?;
    out.flush()?;
    eprintln!("Done! {} files hashed", entries.len());
    Ok(())
}

fn group(log: &Path, plan: &PlanArgs) -> anyhow::Result<()> {
    let bytes = fs::read(log)?;
    let groups = dedup::group_hash_log(&String::from_utf8_lossy(&bytes));
    let base = log
        .canonicalize()?
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let commands = dedup::removal_commands(&groups, &base);
    let (written, executed) = plan.emit(&commands, log)?;
    eprintln!(
        "Done! {} duplicate groups, {} redundant copies, {} lines written, {} executed",
        groups.len(),
        commands.len(),
        written,
        executed
    );
    Ok(())
}

fn sweep(dir: &Path, plan: &PlanArgs) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }
    let pb = mediasort_cli::progress_bar();
    let callback = |stage: &str, current: u64, total: u64, message: &str| {
        mediasort_cli::report(&pb, stage, current, total, message);
    };
    let actions = backups::plan_sweep(dir, &ThrottledProgress::new(&callback));
    pb.finish_and_clear();

    let commands: Vec<PlanCommand> = actions.iter().map(BackupAction::command).collect();
    let (written, executed) = plan.emit(&commands, dir)?;
    eprintln!(
        "Done! {} backup files, {} lines written, {} executed",
        actions.len(),
        written,
        executed
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    mediasort_cli::init_logging();
    match Cli::parse().command {
        Command::Hash { dir, output } => hash(&dir, output.as_deref()),
        Command::Group { log, plan } => group(&log, &plan),
        Command::Backups { dir, plan } => sweep(&dir, &plan),
    }
}
