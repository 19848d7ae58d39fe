use std::process::ExitCode;

use alignscan::{Cli, Output};

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    match cli.run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            Output::new(false, false).error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
