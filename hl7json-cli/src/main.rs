// HL7 JSON CLI
//
// Command-line interface for transforming HL7 v2.x messages into JSON.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use colored::Colorize;
use hl7json_core::model::TransformConfig;
use hl7json_core::parser::{Hl7Message, SegmentHierarchy};
use hl7json_core::schema::Schema;
use hl7json_core::template::{RepetitionPolicy, TemplateTransformer};
use hl7json_core::Hl7JsonTransformer;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hl7json")]
#[command(about = "Transform HL7 v2.x messages into JSON", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Compact JSON only
    Json,
    /// Labelled, indented JSON
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the message structure using segment and field names as keys
    Direct {
        /// Path to the HL7 message file
        message: PathBuf,

        /// Segment profile (JSON)
        #[arg(short, long)]
        profile: PathBuf,

        /// Composite data type profile (JSON)
        #[arg(long)]
        fields: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: OutputFormat,
    },

    /// Fill a JSON template with values resolved from the message
    Template {
        /// Path to the HL7 message file
        message: PathBuf,

        /// JSON template whose string leaves are path expressions
        #[arg(short, long)]
        template: PathBuf,

        /// Profile carrying segment grouping rules (JSON)
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Join repeating values with this delimiter instead of emitting arrays
        #[arg(short, long)]
        join: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: OutputFormat,
    },

    /// Resolve path expressions against a message
    Paths {
        /// Path to the HL7 message file
        message: PathBuf,

        /// Path expressions such as PID-3 or OBX[2]-5.1
        #[arg(required = true)]
        expressions: Vec<String>,
    },

    /// Print a shell completion script
    Completions {
        shell: Shell,
    },
}

fn main() -> Result<()> {
    human_panic::setup_panic!();
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Direct {
            message,
            profile,
            fields,
            format,
        } => {
            let transformer =
                Hl7JsonTransformer::from_paths(&profile, &fields, TransformConfig::default())
                    .with_context(|| format!("Failed to load profile {}", profile.display()))?;
            let content = read_message(&message)?;

            if let OutputFormat::Pretty = format {
                println!("{} {}", "Message:".green().bold(), message.display());
                println!("{} {}", "Profile:".green().bold(), profile.display());
            }
            print_json(&transformer.transform_message(&content), format)
        }
        Commands::Template {
            message,
            template,
            profile,
            join,
            format,
        } => {
            let schema = match &profile {
                Some(path) => Schema::from_path(path)
                    .with_context(|| format!("Failed to load profile {}", path.display()))?,
                None => Schema::default(),
            };
            let template_content = fs::read_to_string(&template)
                .with_context(|| format!("Failed to read template: {}", template.display()))?;
            let transformer = TemplateTransformer::from_json_str(
                &template_content,
                Arc::new(schema),
                Arc::new(TransformConfig::default()),
            )
            .with_context(|| format!("Failed to load template {}", template.display()))?;
            let content = read_message(&message)?;

            let policy = RepetitionPolicy::from_delimiter(join.as_deref());
            let output = transformer
                .transform_message(&content, &policy)
                .with_context(|| format!("Failed to apply template {}", template.display()))?;

            if let OutputFormat::Pretty = format {
                println!("{} {}", "Message:".green().bold(), message.display());
                println!("{} {}", "Template:".green().bold(), template.display());
            }
            print_json(&output, format)
        }
        Commands::Paths {
            message,
            expressions,
        } => {
            let content = read_message(&message)?;
            let parsed = Hl7Message::parse(
                &content,
                &SegmentHierarchy::standard(),
                &TransformConfig::default(),
            );

            for expression in &expressions {
                match parsed.query(expression) {
                    Ok(Some(values)) => {
                        println!("{} {}", format!("{}:", expression).green().bold(), format_values(&values))
                    }
                    Ok(None) => println!("{} {}", format!("{}:", expression).yellow().bold(), "no match"),
                    Err(error) => println!("{} {}", "Error:".red().bold(), error),
                }
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn read_message(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read message file: {}", path.display()))
}

fn print_json(value: &serde_json::Value, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Pretty => {
            println!("{}", "Result:".green().bold());
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

/// Repetitions as `[a, b] [c]`
fn format_values(values: &[Vec<String>]) -> String {
    values
        .iter()
        .map(|repetition| format!("[{}]", repetition.join(", ")))
        .collect::<Vec<_>>()
        .join(" ")
}
