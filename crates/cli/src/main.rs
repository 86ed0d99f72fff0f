use std::process::ExitCode;

fn main() -> ExitCode {
    repuestos_cli::run()
}
