use clap::Parser;
use log::*;

mod command_def;
mod command_handler;
mod formatting;
mod watch;

use command_def::Arguments;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    let cli = Arguments::parse();
    debug!("Running {:?}", cli.command);
    if let Err(e) = command_handler::handle_command(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
