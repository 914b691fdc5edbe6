mod cli;
mod commands;
mod digest;
mod env_loader;
mod error;
mod logging;
mod onebot;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
