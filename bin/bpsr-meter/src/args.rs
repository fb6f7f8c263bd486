use clap::{Args as ClapArgs, Parser, Subcommand};

/** ARG PARSER **/
#[derive(Parser, Debug)]
#[clap(version)]
#[command(
    name = "bpsr-meter",
    about = "Passive combat meter: sniffs the game's TCP stream and derives per-entity damage and healing statistics",
    bin_name = "bpsr-meter",
)]
pub struct Args {
    #[clap(short('q'), long = "quiet", help = "Suppress all log output", default_value = "false")]
    pub quiet: bool,
    #[clap(long = "log-level", value_name = "LEVEL", help = "Log level for our crates (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, ClapArgs)]
pub struct ArgsLive {
    #[clap(short('d'), long = "device", value_name = "DEVICE", help = "Capture device name; defaults to the first usable device")]
    pub device: Option<String>,
    #[clap(
        short('f'),
        long = "filter",
        value_name = "FILTER",
        help = "BPF capture filter; correctness does not depend on it, it only cuts load",
        default_value = "tcp"
    )]
    pub filter: String,
    #[clap(short('r'), long = "record", value_name = "FILE", help = "Also write every captured frame to a record file for later replay")]
    pub record_path: Option<String>,
    #[clap(short('i'), long = "interval", value_name = "SECONDS", help = "Seconds between meter prints", default_value = "1")]
    pub interval_secs: u64,
    #[clap(long = "json", help = "Print meter snapshots as JSON instead of a table", default_value = "false")]
    pub json: bool,
}

#[derive(Debug, ClapArgs)]
pub struct ArgsReplay {
    #[clap(value_name = "FILE", help = "Input capture: a .pcap file or a record file produced by `live --record`")]
    pub file_path: String,
    #[clap(short('p'), long = "pace", help = "Replay with the original inter-packet timing", default_value = "false")]
    pub pace: bool,
    #[clap(long = "session", help = "Print the full-session table instead of the last section", default_value = "false")]
    pub session: bool,
    #[clap(short('o'), long = "output", value_name = "OUTPUT", help = "Write the final report to a file instead of stdout")]
    pub output_path: Option<String>,
    #[clap(long = "json", help = "Print the final snapshot as JSON instead of a table", default_value = "false")]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Capture live traffic and run the meter")]
    Live(ArgsLive),
    #[command(about = "Replay a captured file through the meter")]
    Replay(ArgsReplay),
}
