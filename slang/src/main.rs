use clap::Parser as ClapParser;
use std::{path::PathBuf, process};

use env_logger::Env;
use log::error;

use slang::{
    RuntimeSettings,
    loader::{compile_file, listing, locate_script, run_script},
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Compile the source file to a `.sc` file beside it and exit
    #[arg(short, long, conflicts_with = "load")]
    compile: bool,

    /// Run a module by name, trying the `.sc` then the `.sl` file
    #[arg(short, long)]
    load: bool,

    /// Print the parsed code listing instead of running
    #[arg(long)]
    dump: bool,

    #[arg(help = "The .sl or .sc file to run")]
    file: PathBuf,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Print a clap error or help text and pick the exit status: 0 for
/// `--help` and `--version`, 1 for a usage error.
fn report_usage(err: &clap::Error) -> i32 {
    if let Err(io) = err.print() {
        error!("cannot print usage: {io}");
    }
    if err.use_stderr() { 1 } else { 0 }
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => process::exit(report_usage(&err)),
    };

    let settings = RuntimeSettings::for_script(&cli.file);
    let file = if cli.load {
        locate_script(&cli.file, &settings)
    } else {
        cli.file.clone()
    };

    if cli.compile {
        match compile_file(&cli.file, &settings) {
            Ok(out) => println!("{}", out.display()),
            Err(err) => {
                eprintln!("Error compiling {}: {}", cli.file.display(), err);
                process::exit(1);
            }
        }
        return;
    }

    if cli.dump {
        match listing(&file, &settings) {
            Ok(text) => print!("{text}"),
            Err(err) => {
                eprintln!("Error reading {}: {}", cli.file.display(), err);
                process::exit(1);
            }
        }
        return;
    }

    if let Err(err) = run_script(&file, &cli.args, settings) {
        error!("{err}");
        eprintln!("Error executing {}: {}", file.display(), err);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_status(args: &[&str]) -> i32 {
        let err = Cli::try_parse_from(args).unwrap_err();
        report_usage(&err)
    }

    #[test]
    fn test_help_exits_zero() {
        assert_eq!(usage_status(&["slang", "--help"]), 0);
    }

    #[test]
    fn test_usage_errors_exit_one() {
        assert_eq!(usage_status(&["slang"]), 1);
        assert_eq!(usage_status(&["slang", "-c", "-l", "main.sl"]), 1);
    }

    #[test]
    fn test_trailing_args_keep_hyphens() {
        let cli = Cli::try_parse_from(["slang", "-l", "main", "y", "-x"]).unwrap();
        assert!(cli.load);
        assert_eq!(cli.file, PathBuf::from("main"));
        assert_eq!(cli.args, vec!["y".to_string(), "-x".to_string()]);
    }
}
