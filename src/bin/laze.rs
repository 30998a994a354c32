use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use laze::executor::{self, BuildOptions};
use laze::generator::{self, GenerateOptions};
use laze::scaffold::{self, CreateOptions, CreateType};
use laze::PROJECT_FILENAME;

#[derive(Parser)]
#[command(name = "laze", about = "declarative meta build system", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Change to this directory before doing anything
    #[arg(long, short = 'C', global = true, env = "LAZE_CHDIR")]
    chdir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the Ninja build file from the project declarations
    Generate {
        /// Project file to start from
        #[arg(long, short = 'f', env = "LAZE_PROJECT_FILE", default_value = PROJECT_FILENAME)]
        project_file: PathBuf,

        /// Builder whitelist applied to every app (comma-separable)
        #[arg(long, short = 'W', env = "LAZE_WHITELIST", value_delimiter = ',')]
        whitelist: Vec<String>,

        /// Configure only these apps (comma-separable)
        #[arg(long, short = 'A', env = "LAZE_APPS", value_delimiter = ',')]
        apps: Vec<String>,
    },
    /// Generate if necessary, then run the downstream build
    Build {
        /// Project file to start from
        #[arg(long, short = 'f', env = "LAZE_PROJECT_FILE")]
        project_file: Option<PathBuf>,

        /// Project root (located by walking up when omitted)
        #[arg(long, short = 'r', env = "LAZE_PROJECT_ROOT")]
        project_root: Option<PathBuf>,

        /// Directory for sidecar build state
        #[arg(long, short = 'B', env = "LAZE_BUILD_DIR", default_value = "build")]
        build_dir: PathBuf,

        /// Build only for these builders (comma-separable)
        #[arg(long, short = 'b', env = "LAZE_BUILDERS", value_delimiter = ',')]
        builders: Vec<String>,

        /// Run this tool on the built target
        #[arg(long, short = 't', env = "LAZE_TOOL")]
        tool: Option<String>,

        /// Pass targets through instead of filtering by the current folder
        #[arg(long, short = 'g', env = "LAZE_GLOBAL")]
        global: bool,

        /// Verbose downstream build
        #[arg(long, short = 'v', env = "LAZE_VERBOSE")]
        verbose: bool,

        /// Apps (local mode) or raw ninja targets (global mode)
        targets: Vec<String>,
    },
    /// Write an initial project file into the current directory
    Create {
        /// Kind of declaration to scaffold
        #[arg(long = "type", value_enum, default_value = "app", env = "LAZE_TYPE")]
        create_type: CreateType,

        /// Entity name
        #[arg(long, env = "LAZE_NAME")]
        name: Option<String>,

        /// Context to declare the entity in
        #[arg(long, env = "LAZE_CONTEXT")]
        context: Option<String>,

        /// Dependencies (comma-separable)
        #[arg(long, env = "LAZE_DEPENDS", value_delimiter = ',')]
        depends: Vec<String>,

        /// Used modules (comma-separable)
        #[arg(long, env = "LAZE_USES", value_delimiter = ',')]
        uses: Vec<String>,

        /// Source files (defaults to the C/C++/assembly files present)
        #[arg(long, env = "LAZE_SOURCES", value_delimiter = ',')]
        sources: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(dir) = &cli.chdir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot change to {}", dir.display()))?;
    }

    match cli.command {
        Commands::Generate {
            project_file,
            whitelist,
            apps,
        } => {
            let opts = GenerateOptions {
                project_file,
                project_root: std::env::current_dir()?,
                whitelist,
                apps,
                ..Default::default()
            };
            generator::generate_to_file(&opts)?;
        }
        Commands::Build {
            project_file,
            project_root,
            build_dir,
            builders,
            tool,
            global,
            verbose,
            targets,
        } => {
            executor::run_build(&BuildOptions {
                project_file,
                project_root,
                build_dir,
                builders,
                tool,
                global,
                verbose,
                targets,
            })?;
        }
        Commands::Create {
            create_type,
            name,
            context,
            depends,
            uses,
            sources,
        } => {
            let dir = std::env::current_dir()?;
            scaffold::run_create(
                &dir,
                &CreateOptions {
                    create_type,
                    name,
                    context,
                    depends,
                    uses,
                    sources,
                },
            )?;
        }
    }

    Ok(())
}
