//! `conduitd`: serves the sample editor handlers and pumps them on the main
//! thread until SIGINT or SIGTERM.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::signal::{SIGINT, SIGTERM};

use conduitd::editor::{AssetLibrary, register_sample_handlers};
use conduitd::registry::RegistryBuilder;
use conduitd::{StructuredHealthReporter, SystemConfigLoader, bootstrap_with};

fn main() -> ExitCode {
    let library = AssetLibrary::with_assets(["/Game/Hero", "/Game/Maps/Arena"]);
    let mut builder = RegistryBuilder::new();
    if let Err(error) = register_sample_handlers(&mut builder, &library) {
        eprintln!("conduitd: {error}");
        return ExitCode::FAILURE;
    }

    let reporter = Arc::new(StructuredHealthReporter);
    let bridge = match bootstrap_with(&SystemConfigLoader, reporter, builder.freeze()) {
        Ok(bridge) => bridge,
        Err(error) => {
            eprintln!("conduitd: {error}");
            return ExitCode::FAILURE;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(error) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
            eprintln!("conduitd: failed to install signal handler: {error}");
            return ExitCode::FAILURE;
        }
    }

    let serving = match bridge.serve() {
        Ok(serving) => serving,
        Err(error) => {
            eprintln!("conduitd: {error}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = bridge.execution_loop().run(&stop);
    let stopped = serving.shutdown();
    match (outcome, stopped) {
        (Ok(_), Ok(_)) => ExitCode::SUCCESS,
        (Err(error), _) => {
            eprintln!("conduitd: {error}");
            ExitCode::FAILURE
        }
        (_, Err(error)) => {
            eprintln!("conduitd: {error}");
            ExitCode::FAILURE
        }
    }
}
