use std::process::ExitCode;

fn main() -> ExitCode {
    docgenie_cli::run()
}
