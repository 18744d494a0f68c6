use clap::{arg, command, value_parser, ArgAction, ArgMatches, Command};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

use orc::orc::builtin::{prelude, Stdout};
use orc::orc::program::{self, ProgramError};
use orc::runtime::{Engine, EngineConfig, Failure, Observer};

fn main() {
    let matches = command!()
        .subcommand_required(true)
        .arg(arg!(-v --verbose ... "Log more; repeat for more detail").global(true))
        .subcommand(
            Command::new("run")
                .about("Run a compiled Orc program")
                .arg(arg!(<file> "The program, as JSON").value_parser(value_parser!(PathBuf)))
                .arg(
                    arg!(--"max-tokens" <N> "Fail forks beyond this many live tokens")
                        .value_parser(value_parser!(usize)),
                )
                .arg(arg!(--stats "Print execution statistics").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("check")
                .about("Load and compile a program without running it")
                .arg(arg!(<file> "The program, as JSON").value_parser(value_parser!(PathBuf))),
        )
        .get_matches();

    let level = match matches.get_count("verbose") {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let ok = match matches.subcommand() {
        Some(("run", args)) => run(args),
        Some(("check", args)) => check(args),
        _ => unreachable!(),
    };
    if !ok {
        std::process::exit(1);
    }
}

/// Renders failures against the program source.
struct CliObserver {
    source: Arc<str>,
}

impl Observer for CliObserver {
    fn token_failed(&mut self, failure: &Failure) {
        eprintln!("{:?}", failure.to_report(Some(&*self.source)));
    }
}

fn report(error: &ProgramError, source: Option<&str>) {
    eprintln!("{:?}", error.to_report(source));
}

fn check(args: &ArgMatches) -> bool {
    let Some(file) = args.get_one::<PathBuf>("file") else {
        return false;
    };
    let (expression, source) = match program::load(file) {
        Ok(loaded) => loaded,
        Err(error) => {
            report(&error, None);
            return false;
        }
    };
    match program::build(&expression, &prelude(Arc::new(Stdout))) {
        Ok(compiled) => {
            println!(
                "{} ({} nodes)",
                "Program is well formed".bright_green(),
                compiled.graph.node_count()
            );
            true
        }
        Err(error) => {
            report(&error, Some(source.as_str()));
            false
        }
    }
}

fn run(args: &ArgMatches) -> bool {
    let Some(file) = args.get_one::<PathBuf>("file") else {
        return false;
    };
    let config = EngineConfig {
        max_tokens: args.get_one::<usize>("max-tokens").copied(),
    };
    let show_stats = args.get_flag("stats");

    let (expression, source) = match program::load(file) {
        Ok(loaded) => loaded,
        Err(error) => {
            report(&error, None);
            return false;
        }
    };
    let compiled = match program::build(&expression, &prelude(Arc::new(Stdout))) {
        Ok(compiled) => compiled,
        Err(error) => {
            report(&error, Some(source.as_str()));
            return false;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("{}: {error}", "Could not start the runtime".bright_red());
            return false;
        }
    };
    runtime.block_on(async {
        let observer = CliObserver {
            source: Arc::from(source.as_str()),
        };
        let mut engine = Engine::new(compiled, config, observer);
        let result = engine.run().await;
        if show_stats {
            eprintln!("{}\n{}", "Statistics:".bright_blue(), engine.stats().show());
        }
        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(%error, "engine stopped");
                eprintln!("{}: {error}", "Internal error".bright_red());
                false
            }
        }
    })
}
