use clap::Parser;
use cnn_pool::cli::{execute_run, init_logging, print_summary, Cli, Commands, RunConfig};
use cnn_pool::core::EngineError;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            mode,
            sync,
            workers,
            processes,
            capacity,
            tasks,
            input_size,
            input,
            output,
            quiet,
        } => {
            init_logging(quiet);
            let config = RunConfig {
                mode,
                sync,
                workers,
                processes,
                capacity,
                tasks,
                input_size,
                input,
                output,
                quiet,
            };

            let result = execute_run(&config);
            print_summary(&result);
            match result {
                Ok(_) => ExitCode::SUCCESS,
                Err(EngineError::LostTasks { .. }) => ExitCode::from(2),
                Err(_) => ExitCode::FAILURE,
            }
        }
    }
}
