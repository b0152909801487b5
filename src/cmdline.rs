//! Definition of the command line interface. Uses the `argh` derive macro.

use argh::FromArgs;
use coramc_utils::OutputFile;
use std::path::PathBuf;

#[derive(FromArgs)]
#[argh(help_triggers("-h", "--help"))]
/// The control-thread compiler
pub struct Opts {
    /// input control-thread program, stdin when omitted
    #[argh(positional)]
    pub file: Option<PathBuf>,

    /// output file, default is stdout
    #[argh(option, short = 'o', long = "output", default = "OutputFile::Stdout")]
    pub output: OutputFile,

    /// name of the generated thread module
    #[argh(
        option,
        short = 't',
        long = "thread",
        default = "String::from(\"ctrl_thread\")"
    )]
    pub thread: String,

    /// set the log level (off | error | warn | info | debug | trace)
    #[argh(option, long = "log", default = "log::LevelFilter::Warn")]
    pub log_level: log::LevelFilter,
}

impl Opts {
    /// Parse the command line arguments into an `Opts` struct.
    pub fn get_opts() -> Self {
        argh::from_env()
    }
}
