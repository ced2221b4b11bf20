use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

use crate::cmd::config::{Action, Calibrate, Config, Correct, History, Live, SensorChoice};
use gasmon_core::concentrationunit::ConcentrationUnit;
use gasmon_core::gaschannel::{ChannelGroup, GasChannel, DEFAULT_O2_REFERENCE};
use gasmon_core::reading::DeviceReading;

#[derive(Debug, Parser)]
#[command(
    name = "gasmon",
    about = "Gas analyzer calibration and monitoring",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Path to SQLite database
    #[arg(long = "db", value_name = "PATH", default_value = "gasmon.db", global = true)]
    pub db_path: String,

    /// Where readings come from: sim, db (latest ingested row) or an http(s) URL
    #[arg(long, value_name = "SOURCE", default_value = "db", global = true)]
    pub sensor: SensorChoice,

    /// Unit the http source reports CO2 in (ppm or percent)
    #[arg(long = "co2-unit", value_name = "UNIT", default_value = "percent", global = true)]
    pub co2_unit: ConcentrationUnit,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a 30 reading calibration against a reference gas
    Calibrate {
        #[command(subcommand)]
        group: CalibrateCmd,
    },

    /// Show stored calibration records
    Records,

    /// Correct one raw value with the stored calibration
    Correct(CorrectArgs),

    /// Show or export recent readings
    History(HistoryArgs),

    /// Follow the sensor, corrected, until Ctrl-C
    Live(LiveArgs),

    /// Store one reading as posted by the analyzer node
    Ingest(IngestArgs),

    /// Show or set whether CO2 is derived from O2
    #[command(name = "co2-mode")]
    Co2Mode {
        #[arg(value_enum)]
        state: Option<Toggle>,
    },
}

/* --------------------- calibrate --------------------- */

#[derive(Debug, Subcommand)]
pub enum CalibrateCmd {
    /// Calibrate CO alone
    Co(CoArgs),

    /// Calibrate CO2 and O2 together from the same samples
    #[command(name = "co2-o2")]
    Co2O2(Co2O2Args),
}

#[derive(Debug, Args)]
pub struct CoArgs {
    /// Reference gas concentration in ppm
    #[arg(long = "reference", value_name = "PPM", allow_hyphen_values = true)]
    pub reference: String,

    /// Wait out the sensor warm-up before sampling
    #[arg(long)]
    pub warmup: bool,
}

#[derive(Debug, Args)]
pub struct Co2O2Args {
    /// CO2 reference in percent
    #[arg(long = "co2-ref", value_name = "PERCENT", allow_hyphen_values = true)]
    pub co2_reference: String,

    /// O2 reference in percent
    #[arg(long = "o2-ref", value_name = "PERCENT", default_value_t = DEFAULT_O2_REFERENCE.to_string(), allow_hyphen_values = true)]
    pub o2_reference: String,

    /// Wait out the sensor warm-up before sampling
    #[arg(long)]
    pub warmup: bool,
}

/* ----------------------- correct ----------------------- */

#[derive(Debug, Args)]
pub struct CorrectArgs {
    /// Gas channel (CO, CO2, O2)
    #[arg(long)]
    pub channel: GasChannel,

    /// Raw value in the channel unit
    #[arg(long, allow_hyphen_values = true)]
    pub value: f64,

    /// Raw O2 of the same sample, used when CO2 is derived from O2
    #[arg(long, allow_hyphen_values = true)]
    pub o2: Option<f64>,

    /// Leave the value uncorrected
    #[arg(long)]
    pub raw: bool,
}

/* ----------------------- history ----------------------- */

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Number of most recent rows
    #[arg(short = 'n', long, default_value_t = 100)]
    pub limit: usize,

    /// Show raw values instead of corrected ones
    #[arg(long)]
    pub raw: bool,

    /// Cap values the way charts plot them
    #[arg(long)]
    pub chart: bool,

    /// Write rows to a csv file instead of printing
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub csv: Option<PathBuf>,

    /// Timezone for printed timestamps, e.g. Europe/Helsinki
    #[arg(short = 'z', long = "tz")]
    pub tz: Option<Tz>,
}

/* ------------------------ live ------------------------ */

#[derive(Debug, Args)]
pub struct LiveArgs {
    /// Show raw values instead of corrected ones
    #[arg(long)]
    pub raw: bool,

    /// Stop after this many readings
    #[arg(long)]
    pub count: Option<usize>,
}

/* ----------------------- ingest ----------------------- */

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(long = "node", default_value = "node_unknown")]
    pub node_name: String,

    /// CO in ppm
    #[arg(long, default_value_t = 0.0)]
    pub co: f64,

    /// CO2 in ppm, stored as percent
    #[arg(long, default_value_t = 0.0)]
    pub co2: f64,

    /// O2 in percent
    #[arg(long, default_value_t = 0.0)]
    pub o2: f64,

    #[arg(long, default_value_t = 0)]
    pub fan: i64,

    #[arg(long, default_value_t = 0)]
    pub compressor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Cli {
    pub fn into_config(self) -> Config {
        let action = match self.command {
            Commands::Calibrate { group } => match group {
                CalibrateCmd::Co(a) => Action::Calibrate(Calibrate {
                    group: ChannelGroup::Co,
                    references: vec![(GasChannel::CO, a.reference)],
                    warmup: a.warmup,
                }),
                CalibrateCmd::Co2O2(a) => Action::Calibrate(Calibrate {
                    group: ChannelGroup::Co2O2,
                    references: vec![
                        (GasChannel::CO2, a.co2_reference),
                        (GasChannel::O2, a.o2_reference),
                    ],
                    warmup: a.warmup,
                }),
            },
            Commands::Records => Action::Records,
            Commands::Correct(a) => Action::Correct(Correct {
                channel: a.channel,
                value: a.value,
                o2: a.o2,
                use_calibration: !a.raw,
            }),
            Commands::History(a) => Action::History(History {
                limit: a.limit,
                use_calibration: !a.raw,
                chart: a.chart,
                csv: a.csv,
                tz: a.tz,
            }),
            Commands::Live(a) => Action::Live(Live { use_calibration: !a.raw, count: a.count }),
            Commands::Ingest(a) => Action::Ingest(DeviceReading {
                node_name: a.node_name,
                co_ppm: a.co,
                co2_ppm: a.co2,
                o2_percent: a.o2,
                fan: a.fan,
                compressor: a.compressor,
            }),
            Commands::Co2Mode { state } => Action::Co2Mode(state.map(|s| s == Toggle::On)),
        };

        Config::new(PathBuf::from(self.db_path), self.sensor, self.co2_unit, action)
    }
}
