use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use paced_core::metrics::WindowMode;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    let d = humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}': {e} (expected e.g. 10s, 250ms, 1m)"))?;
    if d.is_zero() {
        return Err(format!("duration '{s}' must be positive"));
    }
    Ok(d)
}

fn parse_window_mode(input: &str) -> Result<WindowMode, String> {
    input
        .parse()
        .map_err(|_| format!("invalid window mode '{input}' (expected fixed or timed)"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bars on stderr and a summary table on stdout.
    HumanReadable,
    /// Emit JSON progress and summary lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "paced",
    author,
    version,
    about = "Load generator driven by YAML test plans",
    long_about = "paced runs a test plan: thread groups of virtual users walking a tree of samplers, controllers, timers and config elements.\n\nClosed groups keep a fixed population looping over the tree; open groups start a new user for every arrival of a rate schedule such as `rate(10/sec) random_arrivals(1 min)`.",
    after_help = "Examples:\n  paced run plan.yaml\n  paced run plan.yaml --report-interval 5s --output json\n  paced run plan.yaml --seed 42 --fail-on-error\n  paced validate plan.yaml\n\nLog verbosity: PACED_LOG (or RUST_LOG), e.g. PACED_LOG=paced_core=debug"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a test plan
    Run(RunArgs),

    /// Check a test plan without running it
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the test plan (.yaml)
    pub plan: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the test plan (.yaml)
    pub plan: PathBuf,

    /// Response-time window behaviour at each report: fixed (keep sliding) or timed (clear)
    #[arg(long, value_name = "MODE", value_parser = parse_window_mode, default_value = "fixed")]
    pub window_mode: WindowMode,

    /// Capacity of the fixed response-time windows
    #[arg(long, value_name = "N", default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub window_size: u64,

    /// Live progress period (e.g. 1s, 500ms)
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub report_interval: Duration,

    /// Seed for timers and arrivals of groups without their own seed
    #[arg(long, env = "PACED_SEED")]
    pub seed: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Exit with code 10 when any sample failed
    #[arg(long)]
    pub fail_on_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m 30s"), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn cli_parses_run_flags() {
        let parsed = Cli::try_parse_from([
            "paced",
            "run",
            "plan.yaml",
            "--window-mode",
            "timed",
            "--window-size",
            "50",
            "--report-interval",
            "250ms",
            "--seed",
            "7",
            "--output",
            "json",
            "--fail-on-error",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.plan, PathBuf::from("plan.yaml"));
                assert_eq!(args.window_mode, WindowMode::Timed);
                assert_eq!(args.window_size, 50);
                assert_eq!(args.report_interval, Duration::from_millis(250));
                assert_eq!(args.seed, Some(7));
                assert_eq!(args.output, OutputFormat::Json);
                assert!(args.fail_on_error);
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_run_defaults() {
        let cli = match Cli::try_parse_from(["paced", "run", "plan.yaml"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.window_mode, WindowMode::Fixed);
                assert_eq!(args.window_size, 100);
                assert_eq!(args.report_interval, Duration::from_secs(1));
                assert_eq!(args.output, OutputFormat::HumanReadable);
                assert!(!args.fail_on_error);
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_rejects_unknown_window_mode() {
        let res = Cli::try_parse_from(["paced", "run", "plan.yaml", "--window-mode", "rolling"]);
        assert!(res.is_err());
    }
}
