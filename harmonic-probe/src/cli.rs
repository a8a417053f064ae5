use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "harmonic-probe",
    version,
    about = "Measure the harmonic ratios of piano strikes",
    long_about = "Listens for key strikes on the default input device, captures every \
                  harmonic of the selected note and prints one JSON record per line."
)]
pub struct Cli {
    /// Note to measure, e.g. A4 or C#3
    #[arg(long, default_value = "A4")]
    pub note: String,

    /// Session name captures are grouped under
    #[arg(long, default_value = "default")]
    pub session: String,

    /// TOML configuration file
    #[arg(long, env = "HARMONIC_PROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON file that keeps envelope maxima between runs
    #[arg(long, env = "HARMONIC_PROBE_ENVELOPES")]
    pub envelopes: Option<PathBuf>,

    /// Stop after this many seconds (runs until the input closes otherwise)
    #[arg(long)]
    pub seconds: Option<u64>,

    /// Feed a synthetic piano tone instead of the microphone
    #[arg(long)]
    pub synthetic: bool,

    /// Inharmonicity coefficient of the synthetic tone
    #[arg(long, default_value_t = 0.0004)]
    pub inharmonicity: f32,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
