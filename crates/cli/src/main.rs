use std::process::ExitCode;

fn main() -> ExitCode {
    hagglz_cli::run()
}
