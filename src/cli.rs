use crate::config::loader::load_config;
use crate::config::types::{JailRequest, LimitName, SandboxConfig, PYTHON};
use crate::exec::executor::JailExecutor;
use crate::safe_exec::executor::{ExecMode, ExecOptions, SafeExecutor};
use crate::safe_exec::json_safe::{json_safe, merge};
use crate::safe_exec::value::Globals;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Run untrusted code in a resource-limited jail",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a configured command in the jail and pass its output through
    Run {
        /// Settings file (JSON)
        #[arg(long)]
        config: PathBuf,
        /// Abstract command name
        #[arg(long, default_value = PYTHON)]
        command: String,
        /// Code to run, given inline
        #[arg(long, conflicts_with = "code_file")]
        code: Option<String>,
        /// Code to run, read from a file
        #[arg(long)]
        code_file: Option<PathBuf>,
        /// File or directory to copy into the sandbox (repeatable)
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
        /// File whose contents become the child's stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,
        /// Name used in logs
        #[arg(long)]
        slug: Option<String>,
        /// Arguments passed to the code
        #[arg(last = true)]
        argv: Vec<String>,
    },
    /// Execute Python with a globals dictionary and print the resulting globals
    Exec {
        /// Settings file (JSON)
        #[arg(long)]
        config: PathBuf,
        /// Python source, given inline
        #[arg(long, conflicts_with = "code_file", required_unless_present = "code_file")]
        code: Option<String>,
        /// Python source, read from a file
        #[arg(long)]
        code_file: Option<PathBuf>,
        /// Initial globals as a JSON object
        #[arg(long, default_value = "{}")]
        globals: String,
        /// File or directory to copy into the sandbox (repeatable)
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
        /// Directory to make importable (repeatable)
        #[arg(long = "python-path", value_name = "DIR")]
        python_path: Vec<PathBuf>,
        /// Name used in logs
        #[arg(long)]
        slug: Option<String>,
        /// Skip the jail entirely (debugging only)
        #[arg(long = "unsafe")]
        force_unsafe: bool,
    },
    /// Validate a settings file and show what it configures
    Check {
        /// Settings file (JSON)
        #[arg(long)]
        config: PathBuf,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(unix) {
        bail!("codejail requires a Unix-like system");
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            command,
            code,
            code_file,
            files,
            stdin_file,
            slug,
            argv,
        } => {
            let executor = JailExecutor::new(load(&config)?);
            let mut request = JailRequest::new(&command).files(&files).argv(argv);
            if let Some(code) = read_code(code, code_file.as_deref())? {
                request = request.code(code);
            }
            if let Some(path) = stdin_file {
                let data = std::fs::read(&path)
                    .with_context(|| format!("Failed to read stdin file {}", path.display()))?;
                request = request.stdin(data);
            }
            if let Some(slug) = slug {
                request = request.slug(slug);
            }

            let result = executor.jail_code(&request)?;
            std::io::stdout().write_all(&result.stdout)?;
            std::io::stderr().write_all(&result.stderr)?;
            std::io::stdout().flush()?;
            if result.timed_out {
                eprintln!("codejail: killed after exceeding the wall-clock limit");
            }
            if !result.success() {
                // Signals map to 128+N like a shell would report them.
                let code = if result.status < 0 {
                    128 - result.status
                } else {
                    result.status
                };
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Exec {
            config,
            code,
            code_file,
            globals,
            files,
            python_path,
            slug,
            force_unsafe,
        } => {
            let mut config = load(&config)?;
            config.always_unsafe |= force_unsafe;
            let executor = SafeExecutor::new(config);
            if executor.mode() == ExecMode::Unsafe {
                eprintln!("codejail: WARNING: executing without a jail");
            }

            let code = read_code(code, code_file.as_deref())?
                .context("Either --code or --code-file is required")?;
            let mut globals = parse_globals(&globals)?;
            let mut options = ExecOptions::new();
            options.files = files;
            options.python_path = python_path;
            options.slug = slug;

            executor.exec(&code, &mut globals, &options)?;
            let output = serde_json::Value::Object(json_safe(&globals)?);
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::Check { config } => {
            let config = load(&config)?;
            print_config(&config);
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<SandboxConfig> {
    load_config(path).with_context(|| format!("Invalid settings file {}", path.display()))
}

fn read_code(code: Option<String>, code_file: Option<&Path>) -> Result<Option<String>> {
    match (code, code_file) {
        (Some(code), _) => Ok(Some(code)),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("Failed to read code file {}", path.display())),
        (None, None) => Ok(None),
    }
}

fn parse_globals(text: &str) -> Result<Globals> {
    let value: serde_json::Value =
        serde_json::from_str(text).context("--globals is not valid JSON")?;
    let serde_json::Value::Object(map) = value else {
        bail!("--globals must be a JSON object");
    };
    let mut globals = Globals::new();
    merge(&mut globals, map);
    Ok(globals)
}

fn print_config(config: &SandboxConfig) {
    println!("Settings OK");
    println!("Sandbox root: {}", config.sandbox_root.display());
    if config.always_unsafe {
        println!("always_unsafe: set, safe_exec will not use the jail");
    }

    let names = config.command_names();
    if names.is_empty() {
        println!("Commands: none (safe_exec falls back to unjailed execution)");
    } else {
        println!("Commands:");
        for name in names {
            if let Some(command) = config.command(name) {
                let user = command.user.as_deref().unwrap_or("(current user)");
                println!("  {:<10} {} as {}", name, command.executable.display(), user);
            }
        }
    }

    println!("Limits:");
    for limit in LimitName::ALL {
        let value = config.limits.get_limit(limit);
        let shown = match (limit, value) {
            (LimitName::Fsize, 0) => "0 (no writes)".to_string(),
            (_, 0) => "0 (unlimited)".to_string(),
            (_, v) => v.to_string(),
        };
        println!("  {:<10} {}", limit.as_str(), shown);
    }
}
