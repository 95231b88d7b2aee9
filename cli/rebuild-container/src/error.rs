//! Error display for the CLI.

use colored::Colorize;
use tidewatch_agent::runtime::RuntimeError;
use tidewatch_agent::UpdateError;

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(update_err) = err.downcast_ref::<UpdateError>() {
        match update_err {
            UpdateError::Recreate(e) if e.original_removed() => {
                eprintln!(
                    "\n{}",
                    format!(
                        "Hint: The original container {} was already removed and has no replacement.",
                        e.container
                    )
                    .yellow()
                );
            }
            UpdateError::Inspection {
                source: RuntimeError::NotFound(_),
                ..
            } => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the container ID with `docker ps -a`.".yellow()
                );
            }
            UpdateError::Inspection {
                source: RuntimeError::Unreachable(_),
                ..
            } => {
                eprintln!(
                    "\n{}",
                    "Hint: Check that the Docker daemon is running and DOCKER_HOST is correct."
                        .yellow()
                );
            }
            _ => {}
        }
    }
}
