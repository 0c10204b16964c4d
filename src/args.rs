//! Command-line argument parsing and processing.
//!
//! Two commands are supported: `run` (the default) starts the daemon, and
//! `status` performs a single evaluation and prints the result. Flags may
//! appear before or after the command.

/// Represents the parsed command-line arguments and their intended actions.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Run the scheduler daemon
    Run {
        debug_enabled: bool,
        config_dir: Option<String>,
        log_file: Option<String>,
    },
    /// Evaluate once and print the twilight state
    Status {
        debug_enabled: bool,
        /// Local time to evaluate at instead of now (`YYYY-MM-DD HH:MM:SS`)
        at: Option<String>,
        json: bool,
        config_dir: Option<String>,
    },
    /// Display help information and exit
    ShowHelp,
    /// Display version information and exit
    ShowVersion,
    /// Show help due to unknown or malformed arguments and exit
    ShowHelpDueToError,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Run,
    Status,
}

/// Result of parsing command-line arguments.
pub struct ParsedArgs {
    pub action: CliAction,
}

impl ParsedArgs {
    /// Parse command-line arguments into a structured result.
    ///
    /// The first item is the program name and is skipped. `--version` takes
    /// precedence over `--help`, which takes precedence over everything else.
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args_vec: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        if args_vec
            .iter()
            .any(|arg| arg == "--version" || arg == "-V" || arg == "-v")
        {
            return ParsedArgs {
                action: CliAction::ShowVersion,
            };
        }
        if args_vec.iter().any(|arg| arg == "--help" || arg == "-h") {
            return ParsedArgs {
                action: CliAction::ShowHelp,
            };
        }

        let mut debug_enabled = false;
        let mut json = false;
        let mut config_dir: Option<String> = None;
        let mut log_file: Option<String> = None;
        let mut at: Option<String> = None;
        let mut command: Option<Command> = None;
        let mut error_found = false;

        let mut i = 0;
        while i < args_vec.len() {
            let arg = args_vec[i].as_str();
            match arg {
                "--debug" | "-d" => debug_enabled = true,
                "--json" => json = true,
                "--config" | "-c" | "--log" | "-l" | "--at" => {
                    match args_vec.get(i + 1).filter(|value| !value.starts_with('-')) {
                        Some(value) => {
                            let slot = match arg {
                                "--config" | "-c" => &mut config_dir,
                                "--log" | "-l" => &mut log_file,
                                _ => &mut at,
                            };
                            *slot = Some(value.clone());
                            i += 1;
                        }
                        None => {
                            log_warning!("Missing value for {}", arg);
                            error_found = true;
                        }
                    }
                }
                "run" | "status" if command.is_none() => {
                    command = Some(if arg == "run" {
                        Command::Run
                    } else {
                        Command::Status
                    });
                }
                "run" | "status" => {
                    log_error!("Cannot use multiple commands at once: '{}'", arg);
                    error_found = true;
                }
                _ if arg.starts_with('-') => {
                    log_warning!("Unknown argument: {}", arg);
                    error_found = true;
                }
                _ => {
                    log_warning!("Unknown command: {}", arg);
                    error_found = true;
                }
            }
            i += 1;
        }

        if error_found {
            return ParsedArgs {
                action: CliAction::ShowHelpDueToError,
            };
        }

        let action = match command.unwrap_or(Command::Run) {
            Command::Run => {
                if at.is_some() || json {
                    log_warning!("--at and --json only apply to the status command");
                    CliAction::ShowHelpDueToError
                } else {
                    CliAction::Run {
                        debug_enabled,
                        config_dir,
                        log_file,
                    }
                }
            }
            Command::Status => {
                if log_file.is_some() {
                    log_warning!("--log only applies to the run command");
                    CliAction::ShowHelpDueToError
                } else {
                    CliAction::Status {
                        debug_enabled,
                        at,
                        json,
                        config_dir,
                    }
                }
            }
        };

        ParsedArgs { action }
    }
}

/// Displays version information using custom logging style.
pub fn display_version_info() {
    log_version!();
    log_pipe!();
    println!("┗ {}", env!("CARGO_PKG_DESCRIPTION"));
}

/// Displays custom help message using logger methods.
pub fn display_help() {
    log_version!();
    log_block_start!(env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!("Usage:");
    log_indented!("twilightr [OPTIONS] [COMMAND]");
    log_block_start!("Options:");
    log_indented!("-c, --config <dir>     Use custom configuration directory");
    log_indented!("-d, --debug            Enable detailed debug output");
    log_indented!("-l, --log <file>       Also write log output to a file (run)");
    log_indented!("    --at <time>        Evaluate at a local time (status)");
    log_indented!("                       Format: \"YYYY-MM-DD HH:MM:SS\"");
    log_indented!("    --json             Print the state as JSON (status)");
    log_indented!("-h, --help             Print help information");
    log_indented!("-V, --version          Print version information");
    log_block_start!("Commands:");
    log_indented!("run                    Track twilight and publish changes (default)");
    log_indented!("status                 Evaluate once and print the current state");
    log_block_start!("Signals:");
    log_indented!("SIGUSR1                Force a re-evaluation");
    log_indented!("SIGUSR2                Reload the configuration file");
    log_end!();
}
