use crate::config::{Args, TEST_ENV, app_name, version};
use crate::pipeline::{DefaultBackend, Pipeline};
use crate::utils::ipc::Endpoints;
use std::process::ExitCode;
use std::{panic, process};
use tracing_subscriber::filter::LevelFilter;

pub mod capture;
pub mod config;
pub mod encoder;
pub mod overlay;
pub mod params;
pub mod pipeline;
pub mod protocol;
pub mod utils;

fn main() -> ExitCode {
    // smoke test from the parent: no pipes are open
    if std::env::var_os(TEST_ENV).is_some() {
        println!("test passed");
        return ExitCode::SUCCESS;
    }

    // stdout is reserved, logs go to stderr; the level is lowered once the
    // parameters are known
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::TRACE)
        .init();

    let args = match Args::try_parse_from(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    // terminate right away on SIGINT, SIGTERM, or SIGHUP
    if let Err(e) = ctrlc::set_handler(move || {
        process::exit(130);
    }) {
        log::error!("Error setting Ctrl-C handler: {e}");
        return ExitCode::FAILURE;
    }

    let endpoints = match Endpoints::from_raw_fds(args.conf_fd, args.video_fd) {
        Ok(endpoints) => endpoints,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("{} {} starting", app_name(), version());
    let pipeline = Pipeline::new(endpoints.conf, Box::new(endpoints.video));
    match pipeline.run(&DefaultBackend) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
