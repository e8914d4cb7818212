//! This is the primary binary for the management target.  It serves the config tree described by
//! a schema file over HTTP.

#![deny(rust_2018_idioms)]

#[macro_use]
extern crate log;

use simplelog::{Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use snafu::{ensure, ResultExt};
use std::env;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use apiserver::server::ServerConfig;
use apiserver::serve;

// gNMI's customary port
const DEFAULT_BIND_ADDRESS: &str = "[::]:32123";
const DEFAULT_SUBSCRIBE_TIMEOUT_SECS: u64 = 5;

type Result<T> = std::result::Result<T, error::Error>;

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(crate)))]
    pub(crate) enum Error {
        #[snafu(display("Schema file {} does not exist", path.display()))]
        NonexistentSchema { path: PathBuf },

        #[snafu(display("{}", source))]
        Server { source: apiserver::server::Error },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },
    }
}

/// Stores user-supplied arguments.
struct Args {
    apply_command: Option<PathBuf>,
    bind_address: String,
    config_path: Option<PathBuf>,
    log_level: LevelFilter,
    schema_path: PathBuf,
    subscribe_timeout: Duration,
    threads: usize,
}

/// Informs the user about proper usage of the program and exits.
fn usage() -> ! {
    let program_name = env::args().next().unwrap_or_else(|| "program".to_string());
    eprintln!(
        r"Usage: {}
            --schema PATH
            [ --config PATH ]
            [ --bind-address ADDRESS ]
            [ --apply-command PATH ]
            [ --subscribe-timeout SECONDS ]
            [ --threads COUNT ]
            [ --log-level trace|debug|info|warn|error ]

    Bind address defaults to {}
    Subscribe timeout defaults to {} seconds",
        program_name, DEFAULT_BIND_ADDRESS, DEFAULT_SUBSCRIBE_TIMEOUT_SECS
    );
    process::exit(2);
}

/// Prints a more specific message before exiting through usage().
fn usage_msg<S: AsRef<str>>(msg: S) -> ! {
    eprintln!("{}\n", msg.as_ref());
    usage();
}

/// Parses a positive number given to the named argument.
fn parse_positive<T>(arg: &str, value: &str) -> T
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    match value.parse::<T>() {
        Ok(n) if n > T::default() => n,
        Ok(_) => usage_msg(format!("Argument to {} must be positive", arg)),
        Err(e) => usage_msg(format!("Invalid value '{}' given to {}: {}", value, arg, e)),
    }
}

/// Parses user arguments into an Args structure.
fn parse_args(args: env::Args) -> Args {
    let mut apply_command = None;
    let mut bind_address = None;
    let mut config_path = None;
    let mut log_level = None;
    let mut schema_path = None;
    let mut subscribe_timeout = None;
    let mut threads = None;

    let mut iter = args.skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--schema" => {
                schema_path = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --schema")),
                ))
            }

            "--config" => {
                config_path = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --config")),
                ))
            }

            "--bind-address" => {
                bind_address = Some(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --bind-address")),
                )
            }

            "--apply-command" => {
                apply_command = Some(PathBuf::from(iter.next().unwrap_or_else(|| {
                    usage_msg("Did not give argument to --apply-command")
                })))
            }

            "--subscribe-timeout" => {
                let secs_str = iter
                    .next()
                    .unwrap_or_else(|| usage_msg("Did not give argument to --subscribe-timeout"));
                let secs: u64 = parse_positive("--subscribe-timeout", &secs_str);
                subscribe_timeout = Some(Duration::from_secs(secs));
            }

            "--threads" => {
                let threads_str = iter
                    .next()
                    .unwrap_or_else(|| usage_msg("Did not give argument to --threads"));
                threads = Some(parse_positive("--threads", &threads_str));
            }

            "--log-level" => {
                let log_level_str = iter
                    .next()
                    .unwrap_or_else(|| usage_msg("Did not give argument to --log-level"));
                log_level = Some(LevelFilter::from_str(&log_level_str).unwrap_or_else(|_| {
                    usage_msg(format!("Invalid log level '{}'", log_level_str))
                }));
            }

            _ => usage(),
        }
    }

    Args {
        apply_command,
        config_path,
        schema_path: schema_path.unwrap_or_else(|| usage()),
        bind_address: bind_address.unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
        log_level: log_level.unwrap_or(LevelFilter::Info),
        subscribe_timeout: subscribe_timeout
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_SUBSCRIBE_TIMEOUT_SECS)),
        threads: threads.unwrap_or(1),
    }
}

/// Starts a web server to accept user requests, dispatching those requests to the store.
async fn run() -> Result<()> {
    let args = parse_args(env::args());

    // TerminalMode::Mixed will send errors to stderr and anything less to stdout.
    TermLogger::init(
        args.log_level,
        LogConfig::default(),
        TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)?;

    // Make sure the schema exists
    ensure!(
        args.schema_path.exists(),
        error::NonexistentSchemaSnafu {
            path: &args.schema_path
        }
    );

    // The store locks its tree, so any number of worker threads can share it.
    let threads_suffix = match args.threads {
        n if n > 1 => "s",
        _ => "",
    };
    info!(
        "Starting server at {} with {} thread{} and schema at {}",
        &args.bind_address,
        args.threads,
        threads_suffix,
        args.schema_path.display(),
    );

    serve(ServerConfig {
        bind_address: args.bind_address,
        schema_path: args.schema_path,
        config_path: args.config_path,
        apply_command: args.apply_command,
        subscribe_timeout: args.subscribe_timeout,
        threads: args.threads,
    })
    .await
    .context(error::ServerSnafu)
}

// Returning a Result from main makes it print a Debug representation of the error, but with Snafu
// we have nice Display representations of the error, so we wrap "main" (run) and print any error.
// https://github.com/shepmaster/snafu/issues/110
#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}", e);
        process::exit(1);
    }
}
