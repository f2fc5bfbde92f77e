//! Binary entry point. Initializes logging, builds the default `Config`, starts the Session
//! Manager singleton (which spawns its receiver thread), then blocks on a shutdown signal.
//! Deliberately inert beyond owning the Session Manager's lifetime: no HTTP listener is stood
//! up here.

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let manager = mav_sessiond::manager::init(mav_sessiond::Config::default());
    tracing::info!("mav-sessiond started");

    if let Err(err) = ctrlc::set_handler({
        let manager = std::sync::Arc::clone(&manager);
        move || {
            tracing::info!("shutdown signal received");
            manager.shutdown();
            std::process::exit(0);
        }
    }) {
        tracing::error!(error = %err, "failed to install Ctrl-C handler; exiting immediately");
        return;
    }

    loop {
        std::thread::park();
    }
}
