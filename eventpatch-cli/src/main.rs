use clap::Parser;
use std::path::PathBuf;

use eventpatch_core::{dump_events, run, PatchSettings};

#[derive(Debug, Parser)]
#[command(name = "eventpatch", version, about = "Rule-based event script patcher")]
struct Args {
    /// Instruction catalog (JSON).
    #[arg(long)]
    catalog: PathBuf,

    #[arg(long, required_unless_present = "dump_events")]
    rules: Option<PathBuf>,

    /// Event file, or a directory of `.json` / `.json.gz` event files.
    #[arg(long, required_unless_present = "dump_events")]
    input: Option<PathBuf>,

    #[arg(long, required_unless_present = "dump_events")]
    output: Option<PathBuf>,

    /// Fail when a required rule never applies.
    #[arg(long, default_value_t = false)]
    strict: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Verbosity level (can be repeated for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Debug-only: print a decoded listing of one event file and exit.
    #[arg(long, value_name = "EVENTS", hide = true)]
    dump_events: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    if args.verbose > 0 {
        log::set_max_level(match args.verbose {
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        });
    }

    if let Some(events) = args.dump_events.as_ref() {
        match dump_events(&args.catalog, events) {
            Ok(listing) => print!("{listing}"),
            Err(err) => {
                eprintln!("Failed to dump {:?}: {}", events, err);
                std::process::exit(1);
            }
        }
        return;
    }

    let (Some(rules_path), Some(input_path), Some(output_path)) = (args.rules, args.input, args.output) else {
        eprintln!("Error: --rules, --input and --output are required");
        std::process::exit(2);
    };

    let settings = PatchSettings {
        catalog_path: args.catalog,
        rules_path,
        input_path,
        output_path,
        strict: args.strict,
        debug: args.debug,
    };

    match run(settings) {
        Ok(summary) => {
            if summary.unsatisfied > 0 {
                eprintln!(
                    "Warning: {} required rule(s) never applied; rerun with --debug for details",
                    summary.unsatisfied
                );
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
