use std::collections::HashSet;
use std::io::{self, BufRead, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;
use tracing_subscriber::EnvFilter;

use npm_avail::classify::{ClassifiedError, classify};
use npm_avail::config::Config;
use npm_avail::controller::{CheckController, CheckState, Phase};
use npm_avail::registry::{HttpRegistry, ProbeError};
use npm_avail::resolve::{Resolver, Verdict};
use npm_avail::validate::{Violation, validate};

/// Names checked at once in batch mode.
const MAX_CONCURRENT_CHECKS: usize = 8;

#[derive(Parser)]
#[command(
    name = "npm-avail",
    version,
    about = "Check whether names are available as npm users, scopes, and organizations",
    after_help = "Validates each name against npm's naming rules, then probes user \
                  accounts, scopes and organizations in that order. A name is \
                  available only if none of the three already holds it.\n\n\
                  Probes are read-only and go through a CORS-bypass proxy unless \
                  --no-proxy is given."
)]
struct Cli {
    /// Names to check (also reads from stdin)
    #[arg(allow_hyphen_values = true)]
    names: Vec<String>,

    /// Suppress output, exit code only
    #[arg(short, long)]
    quiet: bool,

    /// Only print available names
    #[arg(short, long)]
    available_only: bool,

    /// Print one JSON object per name
    #[arg(long)]
    json: bool,

    /// Proxy prefix the encoded request URL is appended to
    #[arg(long, value_name = "PREFIX", conflicts_with = "no_proxy")]
    proxy: Option<String>,

    /// Query npm directly instead of through a proxy
    #[arg(long)]
    no_proxy: bool,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    timeout: u64,

    /// Treat stdin lines as successive edits of one name, checking after each pause
    #[arg(short, long, conflicts_with_all = ["json", "available_only"])]
    interactive: bool,

    /// Quiet period in milliseconds before an interactive check runs
    #[arg(long, value_name = "MS", default_value_t = 300)]
    debounce: u64,

    /// Log probe activity to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default()
            .with_probe_timeout(Duration::from_secs(self.timeout))
            .with_debounce(Duration::from_millis(self.debounce));
        if self.no_proxy {
            config = config.without_proxy();
        } else if let Some(prefix) = &self.proxy {
            config = config.with_proxy(prefix.clone());
        }
        config
    }
}

/// What is printed for one name.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Report {
    Available(Verdict),
    Taken(Verdict),
    Invalid {
        name: String,
        violations: Vec<Violation>,
    },
    Error {
        name: String,
        error: ClassifiedError,
    },
}

impl Report {
    fn from_outcome(name: &str, outcome: Result<Verdict, ProbeError>) -> Self {
        match outcome {
            Ok(verdict) if verdict.is_available => Self::Available(verdict),
            Ok(verdict) => Self::Taken(verdict),
            Err(e) => Self::Error {
                name: name.to_owned(),
                error: classify(&e),
            },
        }
    }

    fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    fn line(&self) -> String {
        match self {
            Self::Available(verdict) | Self::Taken(verdict) => {
                format!("{}\t{verdict}\t{}", verdict.name, verdict.reference_url)
            }
            Self::Invalid { name, violations } => {
                let messages: Vec<&str> = violations.iter().map(|v| v.message.as_str()).collect();
                format!("{name}\tinvalid: {}", messages.join("; "))
            }
            Self::Error { name, error } => {
                let hint = if error.is_recoverable() {
                    " (retry may help)"
                } else {
                    ""
                };
                format!("{name}\terror: {error}{hint}")
            }
        }
    }

    fn render(&self, json: bool) -> String {
        if json {
            serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
        } else {
            self.line()
        }
    }
}

fn main() -> ExitCode {
    reset_sigpipe();

    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let config = cli.config();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: starting async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    if cli.interactive {
        return runtime.block_on(interactive(config, cli.names, cli.quiet));
    }

    let mut names: Vec<String> = cli.names.iter().map(|n| n.trim().to_owned()).collect();

    // Read from stdin if not a terminal
    if !io::stdin().is_terminal() {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    let trimmed = l.trim().to_string();
                    if !trimmed.is_empty() {
                        names.push(trimmed);
                    }
                }
                Err(e) => {
                    eprintln!("error: reading stdin: {e}");
                    return ExitCode::from(2);
                }
            }
        }
    }

    if names.is_empty() {
        eprintln!("error: no names provided");
        eprintln!("usage: npm-avail [OPTIONS] [NAMES...]");
        return ExitCode::from(2);
    }

    // Deduplicate while preserving order
    let mut seen = HashSet::new();
    names.retain(|n| seen.insert(n.clone()));

    let reports = runtime.block_on(check_all(config, &names));

    let mut all_available = true;
    for report in &reports {
        if !report.is_available() {
            all_available = false;
        }
        if cli.quiet || (cli.available_only && !report.is_available()) {
            continue;
        }
        println!("{}", report.render(cli.json));
    }

    if all_available {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Validate every name, then resolve the valid ones concurrently.
async fn check_all(config: Config, names: &[String]) -> Vec<Report> {
    let resolver = Arc::new(Resolver::new(HttpRegistry::new(config)));
    let limit = Arc::new(Semaphore::new(MAX_CONCURRENT_CHECKS));
    let mut slots: Vec<Option<Report>> = names.iter().map(|_| None).collect();
    let mut tasks = JoinSet::new();

    for (index, name) in names.iter().enumerate() {
        let outcome = validate(name);
        if !outcome.is_valid {
            slots[index] = Some(Report::Invalid {
                name: name.clone(),
                violations: outcome.violations,
            });
            continue;
        }

        let resolver = Arc::clone(&resolver);
        let limit = Arc::clone(&limit);
        let name = name.trim().to_owned();
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await;
            let outcome = resolver.resolve(&name).await;
            (index, Report::from_outcome(&name, outcome))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, report)) => slots[index] = Some(report),
            Err(e) => error!(error = %e, "check task failed"),
        }
    }

    slots
        .into_iter()
        .zip(names)
        .map(|(slot, name)| {
            slot.unwrap_or_else(|| {
                Report::from_outcome(name, Err(ProbeError::Internal("check task failed".into())))
            })
        })
        .collect()
}

/// Feed stdin lines to a debounced controller as if they were typed.
async fn interactive(config: Config, initial: Vec<String>, quiet: bool) -> ExitCode {
    let controller = CheckController::new(HttpRegistry::new(config.clone()), config.debounce);

    let mut updates = controller.subscribe();
    let progress = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if !quiet {
                eprintln!("{}", describe(&state));
            }
        }
    });

    let edit = |input: &str| {
        let outcome = validate(input);
        if outcome.is_valid {
            controller.request_check(input);
        } else {
            if !quiet && !input.trim().is_empty() {
                for violation in &outcome.violations {
                    eprintln!("{}: invalid: {}", input.trim(), violation.message);
                }
            }
            controller.request_check("");
        }
    };

    for name in &initial {
        edit(name.as_str());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => edit(line.as_str()),
            Ok(None) => break,
            Err(e) => {
                eprintln!("error: reading stdin: {e}");
                progress.abort();
                return ExitCode::from(2);
            }
        }
    }

    let mut settled = controller.subscribe();
    let state = match settled.wait_for(CheckState::is_settled).await {
        Ok(state) => state.clone(),
        Err(e) => {
            eprintln!("error: {e}");
            progress.abort();
            return ExitCode::from(2);
        }
    };
    progress.abort();

    let report = match (state.verdict, state.error) {
        (Some(verdict), _) if verdict.is_available => Report::Available(verdict),
        (Some(verdict), _) => Report::Taken(verdict),
        (None, Some(error)) => Report::Error {
            name: controller.latest_name().unwrap_or_default(),
            error,
        },
        (None, None) => {
            if !quiet {
                eprintln!("error: no valid name entered");
            }
            return ExitCode::from(1);
        }
    };

    if !quiet {
        println!("{}", report.line());
    }
    if report.is_available() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn describe(state: &CheckState) -> String {
    match state.phase {
        Phase::Idle => "idle".to_owned(),
        Phase::Pending => "waiting for input to settle".to_owned(),
        Phase::Checking => "checking".to_owned(),
        Phase::Resolved => match &state.verdict {
            Some(verdict) => format!("{}: {verdict}", verdict.name),
            None => "resolved".to_owned(),
        },
        Phase::Errored => match &state.error {
            Some(error) => format!("error: {error}"),
            None => "error".to_owned(),
        },
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose {
        "npm_avail=debug"
    } else {
        "npm_avail=error"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[cfg(unix)]
fn reset_sigpipe() {
    // SAFETY: runs first thing in main, before any other thread exists.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
fn reset_sigpipe() {}
