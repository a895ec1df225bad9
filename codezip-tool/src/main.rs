use anyhow::{Context, ensure};
use clap::Parser;
use codezip_lib::Config;
use std::{
    collections::HashMap,
    env, fs,
    io::{self, Write},
};

mod fs_utils;
mod packaging;
mod process;
#[cfg(test)]
mod test_utils;

#[derive(Parser, Debug)]
#[command(
    name = "codezip",
    author,
    version,
    about = "Archive every file with a given suffix under a directory into a zip",
    long_about = None
)]
pub struct Cli {
    /// Directory to walk [default: lib]
    #[arg(short, long)]
    pub source: Option<String>,

    /// Archive to create [default: codes.zip]
    #[arg(short, long)]
    pub output: Option<String>,

    /// Only files whose name ends with this are archived [default: .dart]
    #[arg(short = 'x', long)]
    pub suffix: Option<String>,

    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Dry run (just list files and parameters)
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub dry: bool,

    /// Glob patterns to skip (can be specified multiple times)
    #[arg(short = 'k', long)]
    pub skip: Vec<String>,

    /// Generate YAML config to stdout
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub generate_yaml_config: bool,

    /// More log output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.quiet, cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logger(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let merged = resolve_config(cli, read_env())?;

    if cli.generate_yaml_config {
        let yaml = serde_yaml::to_string(&merged)?;
        println!("{yaml}");
        return Ok(());
    }

    let task = merged.to_task();
    let cwd = env::current_dir().context("resolving working directory")?;
    let mut stdout = io::stdout().lock();

    if task.dry {
        writeln!(stdout, "--- DRY RUN ---")?;
        writeln!(stdout, "{}", serde_yaml::to_string(&merged)?)?;
        process::dry_run(&task, &cwd, &mut stdout)?;
        return Ok(());
    }

    process::run(&task, &cwd, &mut stdout)?;
    Ok(())
}

/// Merges env < file < CLI, applies defaults and validates the result.
fn resolve_config(cli: &Cli, env_config: Config) -> anyhow::Result<Config> {
    let mut file_config = Config::default();
    if let Some(path) = cli.config.clone().or(env_config.config.clone()) {
        file_config = read_config_file(&path)?;
    }

    let merged = merge_configs(env_config, file_config, cli_to_config(cli)).with_defaults();

    ensure!(
        !merged.suffix.as_deref().unwrap_or_default().is_empty(),
        "suffix must not be empty"
    );
    ensure!(
        !merged.output.as_deref().unwrap_or_default().is_empty(),
        "output path must not be empty"
    );
    fs_utils::compile_skip_patterns(merged.skip.as_deref().unwrap_or_default())?;

    Ok(merged)
}

/// Reads environment variables prefixed with CODEZIP_
fn read_env() -> Config {
    let vars = env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();
    config_from_vars(&vars)
}

fn config_from_vars(vars: &HashMap<String, String>) -> Config {
    macro_rules! get_env {
        ($key:expr) => {
            vars.get(&format!("CODEZIP_{}", $key)).cloned()
        };
    }

    Config {
        source: get_env!("SOURCE"),
        output: get_env!("OUTPUT"),
        suffix: get_env!("SUFFIX"),
        config: get_env!("CONFIG"),
        dry: get_env!("DRY").map(|v| v == "true" || v == "1" || v.eq_ignore_ascii_case("yes")),
        skip: get_env!("SKIP").map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }),
    }
}

/// Reads YAML or JSON config from file
fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    let lower = path.to_lowercase();
    let cfg = if lower.ends_with(".json") {
        serde_json::from_str(&content).with_context(|| format!("parsing config file {path}"))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("parsing config file {path}"))?
    };
    Ok(cfg)
}

/// Converts CLI struct into Config
fn cli_to_config(cli: &Cli) -> Config {
    Config {
        source: cli.source.clone(),
        output: cli.output.clone(),
        suffix: cli.suffix.clone(),
        config: cli.config.clone(),
        // an absent flag must not override dry: true from env or file
        dry: cli.dry.then_some(true),
        skip: if cli.skip.is_empty() {
            None
        } else {
            Some(cli.skip.clone())
        },
    }
}

/// Merge configs by priority: env < file < cli
fn merge_configs(env: Config, file: Config, cli: Config) -> Config {
    fn pick<T>(env: Option<T>, file: Option<T>, cli: Option<T>) -> Option<T> {
        cli.or(file).or(env)
    }

    Config {
        source: pick(env.source, file.source, cli.source),
        output: pick(env.output, file.output, cli.output),
        suffix: pick(env.suffix, file.suffix, cli.suffix),
        config: pick(env.config, file.config, cli.config),
        skip: pick(env.skip, file.skip, cli.skip),
        dry: pick(env.dry, file.dry, cli.dry),
    }
}
