use std::ffi::OsString;
use std::os::fd::RawFd;

use clap::{Arg, Command, value_parser};

/// Environment variable that makes the binary answer a smoke test and exit.
pub const TEST_ENV: &str = "TEST";

/// Process arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Args {
    /// Inbound pipe: configuration and commands.
    pub conf_fd: RawFd,
    /// Outbound pipe: status and media.
    pub video_fd: RawFd,
}

impl Args {
    pub fn command() -> Command {
        Command::new(app_name())
            .version(version())
            .author(env!("CARGO_PKG_AUTHORS"))
            .about(env!("CARGO_PKG_DESCRIPTION"))
            .arg(
                Arg::new("conf-fd")
                    .long("conf-fd")
                    .value_name("FD")
                    .help("Descriptor of the inbound configuration pipe.")
                    .env("PIPE_CONF_FD")
                    .value_parser(value_parser!(i32).range(0..))
                    .required(true),
            )
            .arg(
                Arg::new("video-fd")
                    .long("video-fd")
                    .value_name("FD")
                    .help("Descriptor of the outbound video pipe.")
                    .env("PIPE_VIDEO_FD")
                    .value_parser(value_parser!(i32).range(0..))
                    .required(true),
            )
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        // both are required, clap has already rejected a missing one
        let conf_fd = matches.get_one::<i32>("conf-fd").copied().unwrap_or(-1);
        let video_fd = matches.get_one::<i32>("video-fd").copied().unwrap_or(-1);
        Ok(Self { conf_fd, video_fd })
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
