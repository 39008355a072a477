use std::path::PathBuf;

use clap::Parser;
use mediasort_core::writer::RejectPolicy;
use mediasort_core::ProcessOptions;

#[derive(Parser)]
#[command(name = "mediasort", version, about = "Plan date-based renames and moves for photo and video folders")]
struct Cli {
    /// Root directories to reorganize
    roots: Vec<PathBuf>,

    /// Move files into YYYY/MM subdirectories (default: only fix modification times)
    #[arg(long)]
    do_move: bool,

    /// Only trust embedded metadata and the external tool
    #[arg(long)]
    no_pickup: bool,

    /// Apply the plan after printing it
    #[arg(long)]
    execute: bool,

    /// What to do with files that cannot be classified
    #[arg(long, value_enum)]
    rejects: Option<RejectPolicy>,

    /// Append the plan to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directories processed concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Path to the exiftool executable (default: search PATH)
    #[arg(long, env = "MEDIASORT_EXIFTOOL")]
    exiftool: Option<PathBuf>,

    /// Never run exiftool
    #[arg(long)]
    no_exiftool: bool,

    /// JSON options file; flags given on the command line take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_options(self) -> anyhow::Result<ProcessOptions> {
        let mut options = match &self.config {
            Some(path) => ProcessOptions::from_json_file(path)?,
            None => ProcessOptions::default(),
        };
        if !self.roots.is_empty() {
            options.roots = self.roots;
        }
        options.do_move |= self.do_move;
        options.execute |= self.execute;
        if self.no_pickup {
            options.pickup = false;
        }
        if self.no_exiftool {
            options.use_exiftool = false;
        }
        if let Some(rejects) = self.rejects {
            options.rejects = rejects;
        }
        if let Some(output) = self.output {
            options.plan_output = Some(output);
        }
        if let Some(jobs) = self.jobs {
            options.concurrency = jobs;
        }
        if let Some(exiftool) = self.exiftool {
            options.exiftool = Some(exiftool);
        }
        if options.roots.is_empty() {
            anyhow::bail!("no root directories given");
        }
        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    mediasort_cli::init_logging();
    let options = Cli::parse().into_options()?;
    let t_total = std::time::Instant::now();

    let pb = mediasort_cli::progress_bar();
    let result = mediasort_core::process(&options, &|stage, current, total, message| {
        mediasort_cli::report(&pb, stage, current, total, message);
    });
    pb.finish_and_clear();
    let result = result?;

    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    eprintln!(
        "Done! {} files, {} moves, {} retouched, {} in place, {} rejected, {} failed batches, {} commands written, {} executed ({:.2}s)",
        result.total_files,
        result.moves,
        result.retouches,
        result.in_place,
        result.rejected,
        result.failed_batches,
        result.commands_written,
        result.commands_executed,
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
