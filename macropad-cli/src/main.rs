mod layout;
mod simulate;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use macropad_firmware::Settings;
use macropad_keymap::{Configuration, ComponentKind};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "macropad-cli")]
#[command(about = "Macropad configuration checker, layout renderer and simulator")]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a configuration directory and report what it contains
    Check {
        /// Directory holding components.json, actions.json and macros/
        dir: PathBuf,
    },
    /// Render every layer as an HTML/SVG page
    Layout {
        dir: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay an event script through the firmware core
    Simulate {
        dir: PathBuf,
        /// Script of `<ms> <verb> [id]` lines
        script: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(dir: &Path) -> Result<(Configuration, Settings)> {
    let config = Configuration::load(dir)
        .with_context(|| format!("loading configuration from {}", dir.display()))?;
    let settings = Settings::load(dir)
        .with_context(|| format!("loading settings from {}", dir.display()))?;
    Ok((config, settings))
}

fn check(dir: &Path) -> Result<()> {
    let (config, settings) = load(dir)?;

    let buttons = config
        .components
        .iter()
        .filter(|c| c.kind == ComponentKind::Button)
        .count();
    let encoders = config.components.encoders().count();
    let (rows, cols) = config.components.matrix_dimensions();
    println!(
        "Components: {} ({} buttons, {} encoders), matrix {}x{}",
        config.components.len(),
        buttons,
        encoders,
        rows,
        cols
    );
    for (name, bindings) in &config.actions.layers {
        let bound = bindings.values().filter(|b| !b.is_empty()).count();
        println!("Layer {}: {} bindings", name, bound);
    }
    let ids: Vec<&str> = config.macros.ids().collect();
    println!("Macros: {} [{}]", ids.len(), ids.join(", "));
    println!(
        "Timing: scan {} ms, debounce {} ms, pacing {} ms",
        settings.scan_ms, settings.debounce_ms, settings.macro_pacing_ms
    );

    if config.warnings.is_empty() {
        println!("No warnings.");
    } else {
        println!("{} warning(s):", config.warnings.len());
        for warning in config.warnings.iter() {
            println!("  - {}", warning);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Check { dir } => check(&dir)?,
        Command::Layout { dir, output } => {
            let (config, _) = load(&dir)?;
            let html = layout::generate_html(&config);
            match output {
                Some(path) => {
                    fs::write(&path, html).with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("Layout written to {}", path.display());
                }
                None => print!("{}", html),
            }
        }
        Command::Simulate { dir, script } => {
            let (config, settings) = load(&dir)?;
            let text = fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let lines = simulate::parse_script(&text)
                .with_context(|| format!("parsing {}", script.display()))?;
            if lines.is_empty() {
                bail!("{} contains no events", script.display());
            }
            for sent in simulate::run(config, settings, &lines) {
                println!("{:>7} ms  {}", sent.at, sent.report);
            }
        }
    }

    Ok(())
}
