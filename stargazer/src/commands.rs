use crate::CLAP_STYLING;
use clap::arg;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("stargazer")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("stargazer")
        .about(
            "Determines whether a host exposes a web API and, if so, maps its endpoints and \
            the HTTP methods each one accepts.",
        )
        .styles(CLAP_STYLING)
        .arg(
            arg!(<HOSTNAME>)
                .required(true)
                .help("Hostname to probe for an API"),
        )
        .arg(
            arg!(-m --"mode" <MODE>)
                .required(false)
                .help("Run probes one at a time or across a worker pool")
                .value_parser(["serial", "parallel"])
                .default_value("serial"),
        )
        .arg(
            arg!(--"procs" <NUM_WORKERS>)
                .required(false)
                .help("The number of workers in the pool (parallel mode only)")
                .value_parser(clap::value_parser!(usize))
                .default_value("1"),
        )
        .arg(
            arg!(--"level" <LEVEL>)
                .required(false)
                .help("Logger level at which to display logged statements")
                .value_parser(["DEBUG", "INFO", "WARNING", "ERROR"])
                .ignore_case(true)
                .default_value("INFO"),
        )
        .arg(
            arg!(-w --"wordlist-file" <PATH>)
                .required(false)
                .help("Path to a newline-delimited file of candidate paths")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            arg!(-p --"path" <PATH>)
                .required(false)
                .help("A candidate path to probe; may be repeated")
                .action(clap::ArgAction::Append),
        )
        .arg(
            arg!(--"methods" <LIST>)
                .required(false)
                .help("Comma separated HTTP methods to try")
                .default_value("GET,HEAD,OPTIONS,POST,PUT,DELETE"),
        )
        .arg(
            arg!(--"timeout" <SECONDS>)
                .required(false)
                .help("Per-probe timeout in seconds")
                .value_parser(clap::value_parser!(u64))
                .default_value("5"),
        )
        .arg(
            arg!(--"retries" <COUNT>)
                .required(false)
                .help("Retries for probes that time out or cannot connect")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            arg!(--"scheme" <SCHEME>)
                .required(false)
                .help("URL scheme used to reach the host")
                .value_parser(["http", "https"])
                .default_value("https"),
        )
        .arg(
            arg!(--"port" <PORT>)
                .required(false)
                .help("Port to connect to (default: scheme default)")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            arg!(--"queue" <CAPACITY>)
                .required(false)
                .help("Maximum number of queued work units in parallel mode")
                .value_parser(clap::value_parser!(usize))
                .default_value("1024"),
        )
        .arg(
            arg!(-f --"format" <FORMAT>)
                .required(false)
                .help("Report format: text, json")
                .value_parser(["text", "json"])
                .default_value("text"),
        )
        .arg(
            arg!(-o --"output" <PATH>)
                .required(false)
                .help("Save report to file (default: display to screen)")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(arg!(-q --"quiet" "Suppress banner and progress output").required(false))
}
