use clap::{arg, command, Arg, Command};

const DEFAULT_FEATURE_SET: &str = "3.19.0";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug)]
pub struct Args {
    pub node_name: String,
    pub peers: Vec<String>,
    pub feature_set: String,
    pub log_level: String,
    pub log_dir: Option<String>,
}

pub fn cli() -> Command {
    command!()
        .about("Runs a single Designated-Coordinator join round against an in-memory demo cluster")
        .arg(arg!(-n --"node-name" <NAME> "This node's name, also used as the Designated Coordinator identity").default_value("A"))
        .arg(arg!(-p --peers <NAMES> "Comma-separated peer names to seed the demo cluster with").default_value("B,C"))
        .arg(arg!(-f --"our-feature-set" <VERSION> "This node's advertised protocol version").default_value(DEFAULT_FEATURE_SET))
        .arg(
            Arg::new("log_level")
                .short('d')
                .long("loglevel")
                .value_name("log_level")
                .default_value(DEFAULT_LOG_LEVEL)
                .help("Specify log level, e.g. info or join_coordinator=trace,info"),
        )
        .arg(arg!(--"log-dir" <DIR> "Directory to write rolling log files to").required(false))
}

impl Args {
    pub fn parse() -> Args {
        let m = cli().get_matches();
        Args {
            node_name: m.get_one::<String>("node-name").cloned().unwrap(),
            peers: m.get_one::<String>("peers").cloned().unwrap_or_default().split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
            feature_set: m.get_one::<String>("our-feature-set").cloned().unwrap(),
            log_level: m.get_one::<String>("log_level").cloned().unwrap(),
            log_dir: m.get_one::<String>("log-dir").cloned(),
        }
    }
}
