use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pystatic::session::module_name;
use pystatic::vm::Vm;
use pystatic::vm::disasm::disassemble_module_to_string;
use pystatic::{CompileError, CompileSession, Config};

#[derive(Parser)]
#[command(name = "pysc", version, about = "Static compiler and VM for typed Python modules")]
struct Cli {
    /// Configuration file (defaults to ./pystatic.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Declare and bind modules, reporting static errors
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Compile and run; the first file is the entry module
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Compile every module without static specialization
        #[arg(long)]
        dynamic: bool,
    },
    /// Compile one module to a bytecode file
    Compile {
        file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        dynamic: bool,
    },
    /// Run a compiled bytecode file
    Exec { file: PathBuf },
    /// Print the bytecode of compiled modules
    Disasm {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        dynamic: bool,
    },
}

fn main() -> ExitCode {
    if let Ok(filter) = EnvFilter::try_from_env("PYSTATIC_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
        tracing::debug!("tracing initialized");
    }

    let cli = Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = match Config::discover(cli.config.as_deref(), &cwd) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Check { files } => check(&config, &files),
        Command::Run { files, dynamic } => run(&config, &files, dynamic),
        Command::Compile {
            file,
            output,
            dynamic,
        } => compile(&config, &file, &output, dynamic),
        Command::Exec { file } => exec(&config, &file),
        Command::Disasm { files, dynamic } => disasm(&config, &files, dynamic),
    }
}

/// Parses every file into a new session, printing syntax errors.
fn load_session(config: &Config, files: &[PathBuf]) -> Option<(CompileSession, Vec<String>)> {
    let mut session = CompileSession::new(config.compiler.clone());
    let mut names = Vec::new();
    let mut ok = true;
    for path in files {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("error: cannot read {}: {}", path.display(), e);
                return None;
            }
        };
        let name = module_name(path);
        let display = path.display().to_string();
        match session.add_source(&name, &display, text.clone()) {
            Ok(()) => names.push(name),
            Err(CompileError::Syntax(diags)) => {
                ok = false;
                for d in diags {
                    eprint!("{}", d.format(&display, &text, "Parsing failed", 3));
                }
            }
            Err(e) => {
                eprintln!("error: {}", e);
                return None;
            }
        }
    }
    ok.then_some((session, names))
}

fn report(session: &CompileSession, err: &CompileError, module: &str) -> ExitCode {
    eprint!("{}", session.render(err, module));
    if !matches!(err, CompileError::Static(_) | CompileError::Syntax(_)) {
        eprintln!();
    }
    ExitCode::FAILURE
}

fn check(config: &Config, files: &[PathBuf]) -> ExitCode {
    let Some((mut session, names)) = load_session(config, files) else {
        return ExitCode::FAILURE;
    };
    for name in &names {
        if let Err(e) = session.check(name) {
            return report(&session, &e, name);
        }
    }
    println!("{} module(s) checked", names.len());
    ExitCode::SUCCESS
}

fn run(config: &Config, files: &[PathBuf], dynamic: bool) -> ExitCode {
    let Some((mut session, names)) = load_session(config, files) else {
        return ExitCode::FAILURE;
    };
    let modules = match session.compile_all(dynamic) {
        Ok(m) => m,
        Err(e) => return report(&session, &e, &names[0]),
    };
    let mut vm = Vm::with_limits(config.vm.max_stack, config.vm.max_frames);
    for module in modules {
        vm.load(module);
    }
    run_entry(&mut vm, &names[0])
}

fn run_entry(vm: &mut Vm, entry: &str) -> ExitCode {
    match vm.run(entry) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Traceback (most recent call last):");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn compile(config: &Config, file: &Path, output: &Path, dynamic: bool) -> ExitCode {
    let Some((mut session, names)) = load_session(config, std::slice::from_ref(&file.to_path_buf()))
    else {
        return ExitCode::FAILURE;
    };
    let name = &names[0];
    let result = if dynamic {
        session.compile_dynamic(name)
    } else {
        session.compile(name)
    };
    let module = match result {
        Ok(m) => m,
        Err(e) => return report(&session, &e, name),
    };
    if let Err(e) = pystatic::save_module(&module, output) {
        return report(&session, &e, name);
    }
    println!("wrote {}", output.display());
    ExitCode::SUCCESS
}

fn exec(config: &Config, file: &Path) -> ExitCode {
    let module = match pystatic::load_module(file) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: cannot load {}: {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let entry = module.name.clone();
    let mut vm = Vm::with_limits(config.vm.max_stack, config.vm.max_frames);
    vm.load(module);
    run_entry(&mut vm, &entry)
}

fn disasm(config: &Config, files: &[PathBuf], dynamic: bool) -> ExitCode {
    let Some((mut session, names)) = load_session(config, files) else {
        return ExitCode::FAILURE;
    };
    match session.compile_all(dynamic) {
        Ok(modules) => {
            for module in &modules {
                print!("{}", disassemble_module_to_string(module));
            }
            ExitCode::SUCCESS
        }
        Err(e) => report(&session, &e, &names[0]),
    }
}
