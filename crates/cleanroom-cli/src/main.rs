use clap::{Parser as ClapParser, Subcommand};
use cleanroom::{Cleanroom, EvalError, Value};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

mod manifest;

use manifest::Manifest;

#[derive(ClapParser)]
#[command(name = "cleanroom")]
#[command(about = "Evaluate manifest scripts that may only call exposed methods")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print the result and the manifest as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate inline script code
    Eval {
        /// The code to evaluate
        code: String,
    },
    /// Run a script file
    Run {
        /// Path to the script
        file: PathBuf,
    },
    /// Check if a script parses correctly
    Check {
        /// Path to the script
        file: PathBuf,
    },
    /// List the methods scripts may call
    Methods,
}

#[derive(Serialize)]
struct Output<'a> {
    result: &'a Value,
    manifest: &'a Manifest,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    denial: Option<&'a cleanroom::Denial>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span: Option<std::ops::Range<usize>>,
}

#[derive(Serialize)]
struct MethodOutput {
    name: String,
    signature: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { code } => {
            let mut manifest = Manifest::default();
            let result = manifest.evaluate(&code);
            finish(result, &manifest, "<eval>", || code.clone(), cli.json);
        }
        Commands::Run { file } => {
            log::info!("Running: {}", file.display());
            let mut manifest = Manifest::default();
            let result = manifest.evaluate_file(&file);
            let filename = file.display().to_string();
            finish(result, &manifest, &filename, || read_or_empty(&file), cli.json);
        }
        Commands::Check { file } => match fs::read_to_string(&file) {
            Ok(code) => check_code(&code, &file),
            Err(e) => {
                eprintln!("Error reading file: {e}");
                std::process::exit(1);
            }
        },
        Commands::Methods => list_methods(cli.json),
    }
}

fn finish(
    result: Result<Value, EvalError>,
    manifest: &Manifest,
    filename: &str,
    source: impl FnOnce() -> String,
    json: bool,
) {
    match result {
        Ok(value) => {
            if json {
                print_json(&Output {
                    result: &value,
                    manifest,
                });
            } else {
                println!("=> {}", value.inspect());
            }
        }
        Err(error) => {
            if json {
                print_json(&ErrorOutput {
                    error: error.to_string(),
                    denial: error.denial(),
                    span: error.span(),
                });
            }
            eprintln!("{}", error.report(filename, &source()));
            std::process::exit(1);
        }
    }
}

fn check_code(code: &str, file: &Path) {
    match cleanroom::parse(code) {
        Ok(()) => println!("OK: {}", file.display()),
        Err(error) => {
            eprintln!("{}", error.report(&file.display().to_string(), code));
            std::process::exit(1);
        }
    }
}

fn list_methods(json: bool) {
    let methods = Manifest::exposed_methods()
        .into_iter()
        .map(|name| {
            let signature = Manifest::exposure()
                .signature(&name)
                .map(ToString::to_string)
                .unwrap_or_default();
            MethodOutput { name, signature }
        })
        .collect::<Vec<_>>();
    if json {
        print_json(&methods);
    } else {
        for method in methods {
            println!("{}{}", method.name, method.signature);
        }
    }
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            std::process::exit(1);
        }
    }
}

fn read_or_empty(file: &Path) -> String {
    fs::read_to_string(file).unwrap_or_default()
}
