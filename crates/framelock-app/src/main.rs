mod app;
mod audio;
mod cli;
mod error;
mod media;
mod settings;
mod sync;
mod transport;

use anyhow::Result;
use clap::Parser;

use app::{Exit, Session};
use cli::Cli;
use transport::output::CpalTransport;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        for name in CpalTransport::list_devices() {
            println!("{name}");
        }
        return Ok(());
    }

    let config = cli.resolve();
    if cli.save_config {
        config.save();
    }

    let mut session = Session::open(&config)?;
    let exit = session.run();
    session.shutdown();

    match exit? {
        Exit::Quit => log::info!("Bye"),
        Exit::Finished => log::info!("Playback finished"),
    }
    Ok(())
}
