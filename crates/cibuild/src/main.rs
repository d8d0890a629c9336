use std::process::ExitCode;

fn main() -> ExitCode {
    cibuild::run()
}
