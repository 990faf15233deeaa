use backtrace::Backtrace;
use clap::{Arg, Command};

mod agent;
mod buffer;
mod collector;
mod config;
mod envelope;
mod exposition;
mod gatherer;
mod ingress;
mod metrics;
mod pipeline;

use config::Config;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "Aggregates telemetry envelopes from co-located processes and serves \
            them, together with metrics scraped from local Prometheus endpoints, \
            on a single metrics endpoint.",
        )
        .arg(
            Arg::new("CONFIG")
                .help("Agent configuration file")
                .action(clap::ArgAction::Set)
                .required(true)
                .index(1),
        )
        .get_matches();

    // load config from file
    let Some(file) = matches.get_one::<String>("CONFIG") else {
        eprintln!("missing configuration file");
        std::process::exit(1);
    };

    let config = match Config::load(file) {
        Ok(c) => c,
        Err(error) => {
            eprintln!("error loading config file: {file}\n{error}");
            std::process::exit(1);
        }
    };

    agent::run(config);
}
