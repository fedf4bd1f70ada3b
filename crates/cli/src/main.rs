use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use flowgen_compiler::{
    CompileOutput, CompileRequest, Compiler, ExplicitTransition, Platform,
};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Target platform flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PlatformArg {
    Web,
    Mobile,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Platform {
        match arg {
            PlatformArg::Web => Platform::Web,
            PlatformArg::Mobile => Platform::Mobile,
        }
    }
}

/// Screen-flow test compiler.
#[derive(Parser)]
#[command(name = "flowgen", version, about = "Screen-flow test compiler")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a state unit into runnable test source
    Compile {
        /// Path to the .machine.json state unit
        unit: PathBuf,
        /// Target platform
        #[arg(long, default_value = "web", value_enum)]
        platform: PlatformArg,
        /// Sub-state of a multi-state graph (default: all)
        #[arg(long)]
        state: Option<String>,
        /// Explicit transition event (requires --from)
        #[arg(long, requires = "from")]
        event: Option<String>,
        /// Explicit transition source state (requires --event)
        #[arg(long, requires = "event")]
        from: Option<String>,
        /// Force raw emission mode
        #[arg(long)]
        raw: bool,
        /// Write artifacts into this directory instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Resolve the incoming transitions of a status
    Transitions {
        /// Status name to resolve
        status: String,
        /// Target platform
        #[arg(long, default_value = "web", value_enum)]
        platform: PlatformArg,
        /// Project directory (default: current directory)
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Dump the extracted metadata of a state unit
    Inspect {
        /// Path to the .machine.json state unit
        unit: PathBuf,
        /// Target platform
        #[arg(long, default_value = "web", value_enum)]
        platform: PlatformArg,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            unit,
            platform,
            state,
            event,
            from,
            raw,
            out,
        } => {
            let explicit = match (event, from) {
                (Some(event), Some(from)) => Some(ExplicitTransition { event, from }),
                _ => None,
            };
            cmd_compile(
                &unit,
                platform.into(),
                state,
                explicit,
                raw,
                out,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Transitions {
            status,
            platform,
            project,
        } => {
            cmd_transitions(&status, platform.into(), &project, cli.output);
        }
        Commands::Inspect { unit, platform } => {
            cmd_inspect(&unit, platform.into(), cli.output);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_compile(
    unit: &Path,
    platform: Platform,
    state: Option<String>,
    explicit: Option<ExplicitTransition>,
    raw: bool,
    out: Option<PathBuf>,
    output: OutputFormat,
    quiet: bool,
) {
    let mut compiler = compiler_for(unit);
    let mut request = CompileRequest::new(unit, platform);
    request.target_state = state;
    request.explicit = explicit;
    request.force_raw = raw;
    request.out_dir = out.clone();

    let outputs = match compiler.compile_all(&request) {
        Ok(outputs) => outputs,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    match &out {
        Some(dir) => {
            let base = if dir.is_absolute() {
                dir.clone()
            } else {
                compiler.project().root.join(dir)
            };
            if let Err(e) = fs::create_dir_all(&base) {
                eprintln!("error creating {}: {}", base.display(), e);
                process::exit(1);
            }
            for artifact in &outputs {
                let path = base.join(&artifact.file_name);
                if let Err(e) = fs::write(&path, &artifact.source) {
                    eprintln!("error writing {}: {}", path.display(), e);
                    process::exit(1);
                }
                if !quiet {
                    println!("wrote {}", path.display());
                }
            }
            if output == OutputFormat::Json {
                print_metadata(&outputs);
            }
        }
        None => match output {
            OutputFormat::Text => {
                for artifact in &outputs {
                    if !quiet {
                        println!("// {}", artifact.file_name);
                    }
                    println!("{}", artifact.source);
                }
            }
            OutputFormat::Json => print_metadata(&outputs),
        },
    }
}

fn print_metadata(outputs: &[CompileOutput]) {
    let records: Vec<serde_json::Value> = outputs
        .iter()
        .map(|o| {
            serde_json::json!({
                "fileName": o.file_name,
                "metadata": o.metadata,
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Array(records))
            .unwrap_or_else(|_| "[]".to_string())
    );
}

fn cmd_transitions(status: &str, platform: Platform, project: &Path, output: OutputFormat) {
    let mut compiler = match Compiler::for_path(project) {
        Ok(compiler) => compiler,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    let resolved = match compiler.transitions_for(status, platform) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&resolved).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Text => {
            if resolved.is_empty() {
                println!("no incoming transitions: '{}' is an inducer state", status);
                return;
            }
            for t in &resolved.all {
                let marker = match &resolved.primary {
                    Some(p) if p.from == t.from && p.event == t.event => " (primary)",
                    _ => "",
                };
                println!("{} --{}--> {}{}", t.from, t.event, t.to, marker);
            }
        }
    }
}

fn cmd_inspect(unit: &Path, platform: Platform, output: OutputFormat) {
    let mut compiler = compiler_for(unit);
    let records = match compiler.inspect(unit, platform) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Text => {
            for meta in &records {
                println!("status:          {}", meta.status);
                println!(
                    "previous status: {}",
                    meta.previous_status.as_deref().unwrap_or("(none)")
                );
                println!("action name:     {}", meta.action_name);
                println!("class name:      {}", meta.class_name);
                println!("inducer:         {}", meta.inducer);
                println!("transitions:     {}", meta.transitions.all.len());
                if !meta.delta_fields.is_empty() {
                    println!("delta fields:");
                    for (field, value) in &meta.delta_fields {
                        println!("  {} = {}", field, value);
                    }
                }
                println!();
            }
        }
    }
}

fn compiler_for(unit: &Path) -> Compiler {
    match Compiler::for_path(unit) {
        Ok(compiler) => compiler,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
