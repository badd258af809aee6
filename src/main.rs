use clap::Parser;

use kubert::error::Error;

fn main() {
    let cli = kubert::cli::Cli::parse();
    match kubert::app::run(cli) {
        Ok(()) => {}
        Err(Error::ChildExit(code)) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    }
}
