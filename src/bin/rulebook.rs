use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rulebook_core::compiler::Compiler;
use rulebook_core::config::Config;
use rulebook_core::registry::Registries;

#[derive(Parser)]
#[command(name = "rulebook")]
#[command(about = "Business rule compiler and debugger toolchain", long_about = None)]
struct Cli {
    /// Optional TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Optional TOML registry file (operators, signatures, business objects).
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule file into Python plus source map and block map
    Compile {
        /// Rule source file
        file: PathBuf,
        /// Directory for artifacts; defaults to the source file's directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Skip instrumentation and the block map
        #[arg(long)]
        no_instrument: bool,
    },
    /// Parse a rule file and report any unrecognized lines
    Check {
        /// Rule source file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::builder()
        .config_path(cli.config.clone())
        .build()
        .context("Failed to load configuration")?;
    let registries = load_registries(cli.registry.as_deref())?;

    match cli.command {
        Commands::Compile {
            file,
            out_dir,
            no_instrument,
        } => compile(&config, &registries, &file, out_dir, no_instrument),
        Commands::Check { file } => check(&config, &registries, &file),
    }
}

fn load_registries(path: Option<&std::path::Path>) -> Result<Registries> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Registries::from_toml_str(&text)
                .with_context(|| format!("Failed to parse registry file {}", path.display()))
        }
        None => Ok(Registries::with_defaults()),
    }
}

fn compile(
    config: &Config,
    registries: &Registries,
    file: &PathBuf,
    out_dir: Option<PathBuf>,
    no_instrument: bool,
) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("rules")
        .to_string();
    let out_dir = out_dir
        .or_else(|| file.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let compiler = Compiler::new(registries, config.compiler.indent_width);
    let output = compiler
        .compile(&source, &stem)
        .context("Compilation failed")?;

    for issue in &output.parse_issues {
        eprintln!("error: {issue}");
    }

    let code_path = out_dir.join(format!("{stem}.py"));
    std::fs::write(&code_path, &output.generated_code)
        .with_context(|| format!("Failed to write {}", code_path.display()))?;
    println!("wrote {}", code_path.display());

    let map_path = out_dir.join(format!("{stem}.sourcemap.json"));
    std::fs::write(
        &map_path,
        serde_json::to_string_pretty(&output.source_map)?,
    )?;
    println!("wrote {}", map_path.display());

    if !no_instrument {
        if let Some(instrumented) = &output.instrumented_code {
            let path = out_dir.join(format!("{stem}.instrumented.py"));
            std::fs::write(&path, instrumented)?;
            println!("wrote {}", path.display());
        }
        if let Some(block_map) = &output.block_map {
            let path = out_dir.join(format!("{stem}.blockmap.json"));
            std::fs::write(&path, serde_json::to_string_pretty(block_map)?)?;
            println!("wrote {}", path.display());
        }
        if let Some(err) = &output.instrumentation_error {
            eprintln!("warning: stepping disabled: {err}");
        }
    }

    if output.success {
        Ok(())
    } else {
        anyhow::bail!(
            "{} rule line(s) failed to parse",
            output.parse_issues.len()
        )
    }
}

fn check(config: &Config, registries: &Registries, file: &PathBuf) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let compiler = Compiler::new(registries, config.compiler.indent_width);
    let output = compiler.compile(&source, "check").context("Check failed")?;

    if output.success {
        println!(
            "ok: {} statement(s), {} block(s)",
            output.statements.len(),
            output
                .block_map
                .as_ref()
                .map(|b| b.metadata.total_blocks)
                .unwrap_or(0)
        );
        Ok(())
    } else {
        for issue in &output.parse_issues {
            eprintln!("error: {issue}");
        }
        anyhow::bail!("{} rule line(s) failed to parse", output.parse_issues.len())
    }
}
