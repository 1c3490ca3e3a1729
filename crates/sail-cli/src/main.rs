use std::process::ExitCode;

fn main() -> ExitCode {
    match sail_cli::runner::main(std::env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
