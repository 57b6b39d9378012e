pub mod commands;

use unixcoder_onnx::ExportConfig;

/// What a command line asks for.
#[derive(Debug)]
pub enum Command {
    Help,
    Version,
    Export(ExportConfig),
}

pub fn run(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    match parse_args(args) {
        Ok(Command::Help) => {
            print_usage();
            Ok(())
        }
        Ok(Command::Version) => {
            print_version();
            Ok(())
        }
        Ok(Command::Export(config)) => commands::export::execute(&config),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            Err(e)
        }
    }
}

/// Parses options on top of `ExportConfig::from_env()`. No arguments runs the export.
pub fn parse_args(args: &[String]) -> Result<Command, Box<dyn std::error::Error>> {
    let mut config = ExportConfig::from_env();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" | "help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "-o" | "--output-dir" => {
                config = config.with_output_dir(option_value(args, i)?);
                i += 1;
            }
            "-m" | "--model-dir" => {
                config = config.with_local_model(option_value(args, i)?);
                i += 1;
            }
            "--max-length" => {
                let value = option_value(args, i)?;
                config.max_length = value
                    .parse()
                    .map_err(|_| format!("Invalid value for --max-length: {}", value))?;
                if config.max_length == 0 {
                    return Err("--max-length must be positive".into());
                }
                i += 1;
            }
            other => return Err(format!("Unknown option: {}", other).into()),
        }
        i += 1;
    }

    Ok(Command::Export(config))
}

fn option_value(args: &[String], i: usize) -> Result<&str, Box<dyn std::error::Error>> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", args[i]).into())
}

fn print_usage() {
    println!("unixcoder-export - Export the UniXcoder encoder as an ONNX embedding model");
    println!();
    println!("USAGE:");
    println!("    unixcoder-export [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -o, --output-dir <DIR>    Directory for the exported files [default: .]");
    println!("    -m, --model-dir <DIR>     Read the model from a local directory instead of the hub");
    println!("        --max-length <N>      Tokenizer truncation length [default: 512]");
    println!("    -h, --help                Print help information");
    println!("    -v, --version             Print version information");
    println!();
    println!("ENVIRONMENT:");
    println!("    UNIXCODER_MODEL_DIR       Same as --model-dir");
    println!("    UNIXCODER_OUTPUT_DIR      Same as --output-dir");
    println!("    RUST_LOG                  Log filter [default: info]");
}

fn print_version() {
    println!("unixcoder-export {}", env!("CARGO_PKG_VERSION"));
}
