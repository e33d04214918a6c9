#![forbid(unsafe_code)]

//! qbj: Question Bank Janitor CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage errors share the user-error exit code.
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };
    if let Err(e) = cli_app::run(&args) {
        eprintln!("qbj: {e}");
        std::process::exit(e.exit_code());
    }
}
