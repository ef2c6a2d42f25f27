//! # mpkbox CLI
//!
//! Command-line front end for the protection-domain sandbox.
//!
//! ## Commands
//!
//! - `mpkbox probe [--json]` - Report PKRU support and the active backend
//! - `mpkbox selftest` - Check copy restoration and the host-call boundary
//! - `mpkbox run <module> [args...]` - Run a built-in module in its domain
//! - `mpkbox config` - Print the effective configuration

mod modules;
mod probe;
mod selftest;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use mpkbox_config::{Config, SandboxConfig};
use mpkbox_domain::{install_backend, profile, Backend};
use mpkbox_hostcall::{ModuleResult, SandboxContext};

/// mpkbox - intra-process isolation with memory protection keys
#[derive(Parser)]
#[command(name = "mpkbox")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report hardware and kernel support for protection keys
    Probe {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the built-in checks against the configured backend
    Selftest,

    /// Run a built-in module through the host-call boundary
    Run {
        /// Module name (echo, fib)
        module: String,

        /// Module arguments (the module name is passed as argument 0)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Domain to run the module in (default: sandbox.domain)
        #[arg(short, long)]
        domain: Option<u32>,

        /// Module heap size in bytes (default: sandbox.heap_size)
        #[arg(long)]
        heap_size: Option<usize>,

        /// Tag the module heap with a hardware protection key
        #[arg(long)]
        protect: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    mpkbox_config::reload().context("Failed to load configuration")?;
    let config = mpkbox_config::config().clone();

    mpkbox_config::init_logging(&config.log);
    profile::init_profile(config.profile.enabled);

    match cli.command {
        Commands::Probe { json } => {
            setup_backend(&config)?;
            probe::cmd_probe(json)
        }
        Commands::Selftest => {
            setup_backend(&config)?;
            selftest::cmd_selftest()
        }
        Commands::Run {
            module,
            args,
            domain,
            heap_size,
            protect,
        } => {
            setup_backend(&config)?;
            cmd_run(&config, &module, args, domain, heap_size, protect)
        }
        Commands::Config => cmd_config(&config),
    }
}

/// Resolve the configured backend preference and install it for the process.
fn setup_backend(config: &Config) -> Result<Backend> {
    let backend = Backend::detect(config.domain.backend)
        .with_context(|| format!("Backend {:?} not usable", config.domain.backend))?;
    install_backend(backend).context("Failed to install domain backend")?;
    Ok(backend)
}

fn cmd_run(
    config: &Config,
    name: &str,
    args: Vec<String>,
    domain: Option<u32>,
    heap_size: Option<usize>,
    protect: bool,
) -> Result<()> {
    let module = modules::lookup(name).with_context(|| {
        format!(
            "Unknown module '{name}' (available: {})",
            modules::names().join(", ")
        )
    })?;

    let sandbox = sandbox_settings(config, domain, heap_size)?;
    let mut ctx = SandboxContext::builder()
        .domain(sandbox.domain)
        .heap_size(sandbox.heap_size)
        .protection_key(protect)
        .build()
        .context("Failed to create sandbox context")?;

    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(name.to_string());
    argv.extend(args);

    debug!(module = name, argc = argv.len(), "Running module");
    let result = ctx
        .run(&argv, |env| module(env))
        .with_context(|| format!("Module '{name}' delivered an invalid result"))?;
    info!(module = name, domain = %ctx.domain(), result = result.kind(), "Module finished");

    match result {
        ModuleResult::None => anyhow::bail!("Module '{name}' produced no result"),
        ModuleResult::String(text) => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
        ModuleResult::ByteArray(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            println!("{hex}");
        }
    }
    Ok(())
}

/// Apply `run`'s command-line overrides and check them like file values.
fn sandbox_settings(
    config: &Config,
    domain: Option<u32>,
    heap_size: Option<usize>,
) -> Result<SandboxConfig> {
    let mut config = config.clone();
    if let Some(domain) = domain {
        config.sandbox.domain = domain;
    }
    if let Some(heap_size) = heap_size {
        config.sandbox.heap_size = heap_size;
    }
    config.validate().context("Invalid sandbox settings")?;
    Ok(config.sandbox)
}

fn cmd_config(config: &Config) -> Result<()> {
    if let Some(path) = mpkbox_config::user_config_path() {
        println!("# user file:    {}", path.display());
    }
    println!(
        "# project file: {}",
        mpkbox_config::project_config_path().display()
    );
    println!();
    print!("{}", config.to_toml());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_overrides_are_validated() {
        let config = Config::default();

        let sandbox = sandbox_settings(&config, Some(7), Some(8192)).unwrap();
        assert_eq!(sandbox.domain, 7);
        assert_eq!(sandbox.heap_size, 8192);

        let sandbox = sandbox_settings(&config, None, None).unwrap();
        assert_eq!(sandbox, config.sandbox);

        assert!(sandbox_settings(&config, Some(1), None).is_err());
        assert!(sandbox_settings(&config, Some(16), None).is_err());
        assert!(sandbox_settings(&config, None, Some(0)).is_err());
        assert!(sandbox_settings(&config, None, Some(usize::MAX)).is_err());
    }
}
