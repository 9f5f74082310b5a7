use clap::{Args, Parser as ClapParser, Subcommand};
use golem_script::compiler::Compiler;
use golem_script::config::Config;
use golem_script::error::GolemError;
use golem_script::functions::FunctionRegistry;
use golem_script::parser::{AstParseResult, Parser, ParserOptions};
use golem_script::registry::CommandRegistry;
use std::io::{self, Read};
use std::path::PathBuf;

#[derive(ClapParser)]
#[command(author, version, about = "Golem command script compiler")]
struct Cli {
    /// JSON command registry to use instead of the configured one
    #[arg(long, global = true, value_name = "FILE")]
    commands: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScriptArgs {
    /// Script text, or `-` to read stdin
    input: String,
    /// Fail on chains and sections without a command
    #[arg(long)]
    strict: bool,
    /// Treat the whole input as an alias body
    #[arg(long)]
    alias: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the parse tree as JSON
    Parse {
        #[command(flatten)]
        script: ScriptArgs,
    },
    /// Print the compiled segments as JSON
    Compile {
        #[command(flatten)]
        script: ScriptArgs,
        /// Fail on unresolved variables and unknown functions
        #[arg(long)]
        strict_refs: bool,
    },
    /// List the registered commands
    Commands,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the config for the current environment
    Show,
    /// Write a default config file
    Init,
    /// Print the config file location
    Path,
}

fn read_input(input: &str) -> io::Result<String> {
    if input != "-" {
        return Ok(input.to_string());
    }

    let mut contents = String::new();
    io::stdin().read_to_string(&mut contents)?;
    Ok(contents.trim_end_matches(['\r', '\n']).to_string())
}

fn load_registry(cli_path: Option<&PathBuf>, config: &Config) -> Result<CommandRegistry, GolemError> {
    let registry = match cli_path {
        Some(path) => CommandRegistry::load(path, &config.invoker_keyword)?,
        None => config.registry()?,
    };
    Ok(registry)
}

fn parse_script(
    script: &ScriptArgs,
    registry: &CommandRegistry,
    config: &Config,
) -> Result<AstParseResult, GolemError> {
    let input = read_input(&script.input)?;
    let options = ParserOptions {
        strict: script.strict || config.strict,
        inside_alias: script.alias,
        ..config.parser_options()
    };

    let parsed = Parser::new(&input, registry, &options).parse()?;
    for error in &parsed.errors {
        eprintln!("Error in {:?}: {}", error.raw.trim(), error.error);
    }
    Ok(parsed)
}

fn main() -> Result<(), GolemError> {
    env_logger::init();

    let cli = Cli::parse();
    let existed = Config::get_config_path().exists();
    let config = Config::load();

    match cli.command {
        Commands::Parse { script } => {
            let registry = load_registry(cli.commands.as_ref(), &config)?;
            let parsed = parse_script(&script, &registry, &config)?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Commands::Compile {
            script,
            strict_refs,
        } => {
            let registry = load_registry(cli.commands.as_ref(), &config)?;
            let parsed = parse_script(&script, &registry, &config)?;

            let functions = FunctionRegistry::builtin();
            let mut options = config.compiler_options();
            options.strict_references |= strict_refs;

            let compiled = Compiler::new(&registry, &functions, options).compile(&parsed)?;
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
        Commands::Commands => {
            let registry = load_registry(cli.commands.as_ref(), &config)?;
            for command in registry.commands() {
                if command.aliases.is_empty() {
                    println!("  {:<12} {}", command.name, command.description);
                } else {
                    println!(
                        "  {:<12} {} (aliases: {})",
                        command.name,
                        command.description,
                        command.aliases.join(", ")
                    );
                }
                for sub in &command.subcommands {
                    println!("    {} {}", command.name, sub.name);
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                println!("Environment: {}", config.env_name);
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigCommands::Init => {
                // `Config::load` has already written the defaults
                let config_path = Config::get_config_path();
                if existed {
                    println!("Config already exists at: {}", config_path.display());
                } else {
                    config.save()?;
                    println!("Initialized new config at: {}", config_path.display());
                }
            }
            ConfigCommands::Path => {
                println!("{}", Config::get_config_path().display());
            }
        },
    }

    Ok(())
}
