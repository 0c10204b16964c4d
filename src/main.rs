//! Command-line entry point.
//!
//! Parses arguments, applies the process-wide options (configuration
//! directory, log file) and hands off to the daemon or a one-shot command.

use anyhow::Result;

use twilightr::args::{self, CliAction, ParsedArgs};
use twilightr::commands;
use twilightr::config;
use twilightr::constants::EXIT_FAILURE;
use twilightr::logger::Log;
use twilightr::{Twilightr, log_error_exit};

fn main() -> Result<()> {
    let parsed_args = ParsedArgs::parse(std::env::args());

    let result = match parsed_args.action {
        CliAction::ShowVersion => {
            args::display_version_info();
            Ok(())
        }
        CliAction::ShowHelp => {
            args::display_help();
            Ok(())
        }
        CliAction::ShowHelpDueToError => {
            args::display_help();
            std::process::exit(EXIT_FAILURE);
        }
        CliAction::Run {
            debug_enabled,
            config_dir,
            log_file,
        } => {
            config::set_config_dir(config_dir)?;
            // Held until the daemon returns so the file is flushed
            let _log_guard = match log_file {
                Some(path) => Some(Log::start_file_logging(path)?),
                None => None,
            };
            Twilightr::new(debug_enabled).run()
        }
        CliAction::Status {
            debug_enabled,
            at,
            json,
            config_dir,
        } => {
            config::set_config_dir(config_dir)?;
            commands::status::handle_status_command(at.as_deref(), json, debug_enabled)
        }
    };

    if let Err(e) = result {
        log_error_exit!("{}", e);
        eprintln!("{e:?}");
        std::process::exit(EXIT_FAILURE);
    }
    Ok(())
}
