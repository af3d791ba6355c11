use std::process::ExitCode;

fn main() -> ExitCode {
    quotar_cli::run()
}
