use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use nwscript::{
    Argument, CompileOptions, ExecutionOptions, Game, Outcome, Program, render_error,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// NWScript - compile, inspect and run NCS bytecode
#[derive(Parser, Debug)]
#[command(name = "nwscript")]
#[command(about = "NWScript compiler, disassembler, decompiler and VM", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a script to an NCS container
    Compile {
        /// Script source (.nss)
        source: PathBuf,

        /// Output file, defaults to the source with an .ncs extension
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory searched for #include targets (repeatable)
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,

        /// Dialect to compile against (k1 or tsl)
        #[arg(long, default_value = "k1")]
        game: Game,

        /// Attach source positions to instructions
        #[arg(long)]
        debug: bool,

        /// Run the optimizer on the result
        #[arg(short = 'O', long)]
        optimize: bool,
    },

    /// Print approximate source for an NCS container
    Decompile {
        input: PathBuf,

        #[arg(long, default_value = "k1")]
        game: Game,
    },

    /// Print the instruction listing of an NCS container
    Disasm {
        input: PathBuf,

        /// Add labels and subroutine separators
        #[arg(long)]
        pretty: bool,
    },

    /// Execute an NCS container and print every engine call
    Run {
        input: PathBuf,

        /// Maximum number of instructions to execute
        #[arg(long, default_value_t = ExecutionOptions::default().cycle_budget)]
        budget: u64,

        #[arg(long, default_value = "k1")]
        game: Game,
    },
}

/// Command line include directories first, then `NWSCRIPT_INCLUDE`.
fn include_dirs(mut dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    if let Some(paths) = std::env::var_os("NWSCRIPT_INCLUDE") {
        dirs.extend(std::env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
    }
    dirs
}

fn load(path: &Path) -> Result<Program> {
    let bytes = std::fs::read(path)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("cannot read {}", path.display())))?;
    nwscript::read_container(&bytes).map_err(|e| {
        render_error(&e);
        miette!("{} is not a valid NCS file", path.display())
    })
}

fn format_argument(arg: &Argument) -> String {
    match arg {
        Argument::Scalar(value) => value.to_string(),
        Argument::Vector([x, y, z]) => format!("[{}, {}, {}]", x, y, z),
        Argument::Action => "<action>".to_string(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging subscriber
    use tracing_subscriber::{EnvFilter, fmt};

    // Use NWSCRIPT_LOG or RUST_LOG environment variable to control log level
    // Default to WARN if not set
    let filter = EnvFilter::try_from_env("NWSCRIPT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new("warn"))
        .into_diagnostic()?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match args.command {
        Command::Compile {
            source,
            output,
            include,
            game,
            debug,
            optimize,
        } => {
            let options = CompileOptions {
                dialect: game,
                include_dirs: include_dirs(include),
                debug,
                optimize,
            };
            let program = nwscript::compile_file(&source, &options).map_err(|e| {
                render_error(&e);
                miette!("compilation of {} failed", source.display())
            })?;
            let bytes = nwscript::write_container(&program).map_err(|e| miette!("{}", e))?;
            let output = output.unwrap_or_else(|| source.with_extension("ncs"));
            std::fs::write(&output, &bytes)
                .into_diagnostic()
                .map_err(|e| e.wrap_err(format!("cannot write {}", output.display())))?;
            debug!(output = %output.display(), bytes = bytes.len(), "Wrote container");
        }
        Command::Decompile { input, game } => {
            let program = load(&input)?;
            print!("{}", nwscript::decompile(&program, game));
        }
        Command::Disasm { input, pretty } => {
            let program = load(&input)?;
            print!("{}", nwscript::disassemble(&program, pretty));
        }
        Command::Run {
            input,
            budget,
            game,
        } => {
            let program = load(&input)?;
            let options = ExecutionOptions {
                dialect: game,
                cycle_budget: budget,
                ..ExecutionOptions::default()
            };
            let result = nwscript::execute(&program, &options);
            for call in &result.snapshots {
                let args: Vec<String> = call.args.iter().map(format_argument).collect();
                println!("{}({})", call.name, args.join(", "));
            }
            match result.outcome {
                Outcome::Halted => {
                    if let Some(value) = result.result {
                        println!("=> {}", value);
                    }
                }
                Outcome::Faulted(fault) => {
                    return Err(miette!(
                        "execution faulted at instruction {}: {}",
                        fault.index,
                        fault.kind
                    ));
                }
            }
        }
    }

    Ok(())
}
