use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal, Write};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};

use kscope::backend::Executor;
use kscope::backend::jit::{JitBackend, OptLevel};
use kscope::backend::vm::VmBackend;
use kscope::driver::{Driver, Options, Summary};
use kscope::lexer::Lexer;
use kscope::precedence::OperatorTable;
use kscope::source::ReaderChars;

const USAGE: &str = "\
usage: kscope [options] [file]

options:
  -b, --backend <jit|vm>                       code generator (default: jit)
  -O, --opt-level <none|speed|speed_and_size>  JIT optimization level (default: speed)
      --no-ir                                  do not dump generated code
      --ast                                    dump each parsed unit
      --prompt / --no-prompt                   force the ready> prompt on or off
  -h, --help                                   show this message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Jit,
    Vm,
}

#[derive(Debug)]
struct Args {
    backend: BackendKind,
    opt_level: OptLevel,
    emit_ir: bool,
    print_ast: bool,
    prompt: Option<bool>,
    input: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut parsed = Args {
        backend: BackendKind::Jit,
        opt_level: OptLevel::default(),
        emit_ir: true,
        print_ast: false,
        prompt: None,
        input: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" | "-b" => {
                let name = args
                    .next()
                    .ok_or_else(|| anyhow!("Missing backend name after {arg}"))?;
                parsed.backend = match name.as_str() {
                    "jit" => BackendKind::Jit,
                    "vm" => BackendKind::Vm,
                    other => bail!("Unknown backend '{other}'"),
                };
            }
            "--opt-level" | "-O" => {
                let level = args
                    .next()
                    .ok_or_else(|| anyhow!("Missing optimization level after {arg}"))?;
                parsed.opt_level = level.parse()?;
            }
            "--no-ir" => parsed.emit_ir = false,
            "--ast" => parsed.print_ast = true,
            "--prompt" => parsed.prompt = Some(true),
            "--no-prompt" => parsed.prompt = Some(false),
            "--help" | "-h" => return Ok(None),
            flag if flag.starts_with('-') && flag != "-" => bail!("Unknown option '{flag}'"),
            _ => {
                if parsed.input.is_some() {
                    bail!("Only one input file is supported");
                }
                parsed.input = Some(arg);
            }
        }
    }

    Ok(Some(parsed))
}

fn main() -> Result<ExitCode> {
    let Some(args) = parse_args(std::env::args().skip(1))? else {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    };

    let input = args.input.as_deref().filter(|path| *path != "-");
    let interactive = input.is_none() && io::stdin().is_terminal();
    let options = Options {
        emit_ir: args.emit_ir,
        print_ast: args.print_ast,
        prompt: args.prompt.unwrap_or(interactive),
    };

    let summary = match input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Opening {path}"))?;
            run_reader(BufReader::new(file), &args, options)?
        }
        None => run_reader(io::stdin().lock(), &args, options)?,
    };

    if summary.failures > 0 && !interactive {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_reader<R: BufRead>(reader: R, args: &Args, options: Options) -> Result<Summary> {
    let mut chars = ReaderChars::new(reader);
    let summary = match args.backend {
        BackendKind::Jit => {
            let backend = JitBackend::new(args.opt_level).context("Creating the JIT backend")?;
            run_with(&mut chars, backend, options)?
        }
        BackendKind::Vm => run_with(&mut chars, VmBackend::new(), options)?,
    };
    if let Some(err) = chars.take_error() {
        return Err(err).context("Reading input");
    }
    Ok(summary)
}

fn run_with<I, B>(chars: I, backend: B, options: Options) -> Result<Summary>
where
    I: Iterator<Item = char>,
    B: Executor,
{
    let operators = OperatorTable::standard();
    let stdout = io::stdout();
    let stderr = io::stderr();
    if options.prompt {
        // the driver reads one token of lookahead before its first prompt
        write!(stderr.lock(), "ready> ").context("Writing prompt")?;
    }
    let mut driver = Driver::new(
        Lexer::new(chars),
        &operators,
        backend,
        options,
        stdout.lock(),
        stderr.lock(),
    );
    driver.run().context("Writing output")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>> {
        parse_args(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn defaults_to_jit_with_ir() {
        let args = parse(&[]).unwrap().unwrap();
        assert_eq!(args.backend, BackendKind::Jit);
        assert_eq!(args.opt_level, OptLevel::Speed);
        assert!(args.emit_ir);
        assert_eq!(args.prompt, None);
        assert_eq!(args.input, None);
    }

    #[test]
    fn reads_flags_and_path() {
        let args = parse(&["-b", "vm", "-O", "none", "--no-ir", "--ast", "--no-prompt", "prog.ks"])
            .unwrap()
            .unwrap();
        assert_eq!(args.backend, BackendKind::Vm);
        assert_eq!(args.opt_level, OptLevel::None);
        assert!(!args.emit_ir);
        assert!(args.print_ast);
        assert_eq!(args.prompt, Some(false));
        assert_eq!(args.input.as_deref(), Some("prog.ks"));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&["--backend"]).is_err());
        assert!(parse(&["--backend", "llvm"]).is_err());
        assert!(parse(&["-O", "max"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["a.ks", "b.ks"]).is_err());
        assert!(parse(&["--help"]).unwrap().is_none());
    }
}
