//! Command-line interface for the `dfi` tool
//!
//! Parses and inspects type, function and descriptor files, and checks JSON
//! values against types.

use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::DfiConfig;
use crate::descriptor::{DescriptorKind, InterfaceDescriptor, MessageDescriptor};
use crate::error::{DfiError, DfiResult};
use crate::function::DynFunction;
use crate::json;
use crate::types::{DynType, TypeTable};

/// Dynamic function interface descriptor tool
#[derive(Parser)]
#[command(name = "dfi")]
#[command(about = "Inspect DFI type, function and descriptor files")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to ./dfi.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a type descriptor and print its layout
    Type {
        /// Type descriptor, e.g. `{IID a b c}`
        descriptor: String,

        /// Name given to the parsed type
        #[arg(short, long)]
        name: Option<String>,

        /// Descriptor file whose `:types` section provides references
        #[arg(long)]
        types: Option<PathBuf>,

        /// Print the size, alignment and offset of every node
        #[arg(long)]
        layout: bool,
    },

    /// Parse a function descriptor and print its arguments
    Function {
        /// Function descriptor, e.g. `add(#am=handle;PDD#am=pre;*D)N`
        descriptor: String,

        /// Descriptor file whose `:types` section provides references
        #[arg(long)]
        types: Option<PathBuf>,
    },

    /// Parse a message or interface descriptor file
    Inspect {
        /// Descriptor file, resolved against the configured search paths
        file: PathBuf,

        /// Print the JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check a JSON value against a type and print it normalized
    Json {
        /// Type descriptor
        descriptor: String,

        /// JSON text; read from --file when absent
        value: Option<String>,

        /// File holding the JSON value
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Descriptor file whose `:types` section provides references
        #[arg(long)]
        types: Option<PathBuf>,

        /// Pretty-print the result regardless of configuration
        #[arg(long)]
        pretty: bool,
    },
}

/// CLI context for output and configuration
#[derive(Clone)]
pub struct CliContext {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Instant,
}

impl CliContext {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            start_time: Instant::now(),
        }
    }

    /// Print info message if not quiet
    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    /// Print verbose message if verbose mode enabled
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{} {}", "verbose:".dimmed(), message.dimmed());
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", "warning:".yellow().bold(), message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

/// Runs CLI commands; each command returns the report it would print
pub struct DfiDriver {
    context: CliContext,
    config: DfiConfig,
}

impl DfiDriver {
    pub fn new(context: CliContext, config: DfiConfig) -> Self {
        config.apply();
        for dir in config.missing_search_paths() {
            context.warn(&format!("descriptor search path {} is not a directory", dir.display()));
        }
        Self { context, config }
    }

    pub fn config(&self) -> &DfiConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> DfiResult<String> {
        let report = match command {
            Commands::Type {
                descriptor,
                name,
                types,
                layout,
            } => self.type_info(descriptor, name.as_deref(), types.as_deref(), *layout),
            Commands::Function { descriptor, types } => self.function_info(descriptor, types.as_deref()),
            Commands::Inspect { file, json } => self.inspect(file, *json),
            Commands::Json {
                descriptor,
                value,
                file,
                types,
                pretty,
            } => {
                let text = match (value, file) {
                    (Some(value), _) => value.clone(),
                    (None, Some(file)) => {
                        fs::read_to_string(file).map_err(|e| DfiError::from(e).recorded())?
                    }
                    (None, None) => {
                        return Err(DfiError::Config("a JSON value or --file is required".to_string()).recorded())
                    }
                };
                self.json(descriptor, &text, types.as_deref(), *pretty)
            }
        }?;
        self.context
            .verbose(&format!("Finished in {:.2?}", self.context.elapsed()));
        Ok(report)
    }

    /// Named types from a descriptor file, for resolving references
    fn load_types(&self, path: Option<&Path>) -> DfiResult<TypeTable> {
        let Some(path) = path else {
            return Ok(TypeTable::new());
        };
        let (kind, text) = self.read_descriptor(path)?;
        let types = match kind {
            DescriptorKind::Message => MessageDescriptor::parse(&text)?.info().types().clone(),
            DescriptorKind::Interface => InterfaceDescriptor::parse(&text)?.info().types().clone(),
        };
        self.context
            .verbose(&format!("Loaded {} types from {}", types.len(), path.display()));
        Ok(types)
    }

    fn read_descriptor(&self, path: &Path) -> DfiResult<(DescriptorKind, String)> {
        let resolved = match self.config.resolve_descriptor(path) {
            Some(resolved) => resolved,
            None => {
                return Err(DfiError::from(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("descriptor {} not found", path.display()),
                ))
                .recorded())
            }
        };
        self.context.verbose(&format!("Reading {}", resolved.display()));
        let text = fs::read_to_string(&resolved).map_err(|e| DfiError::from(e).recorded())?;
        Ok((detect_kind(&text), text))
    }

    pub fn type_info(
        &self,
        descriptor: &str,
        name: Option<&str>,
        types: Option<&Path>,
        layout: bool,
    ) -> DfiResult<String> {
        let refs = self.load_types(types)?;
        let ty = DynType::parse(descriptor, name, Some(&refs))?;
        if layout {
            return Ok(ty.layout_tree().trim_end().to_string());
        }
        Ok(format!("{}\nsize: {}\nalignment: {}", ty.describe(), ty.size(), ty.alignment()))
    }

    pub fn function_info(&self, descriptor: &str, types: Option<&Path>) -> DfiResult<String> {
        let refs = self.load_types(types)?;
        let function = DynFunction::parse(descriptor, Some(&refs))?;
        let mut lines = vec![format!("function {}", function.name())];
        for argument in function.arguments() {
            lines.push(format!(
                "  {} [{}]: {}",
                argument.name,
                argument.meta,
                argument.ty.describe()
            ));
        }
        lines.push(format!("  returns: {}", function.return_type().describe()));
        // Prepare too, so signatures libffi cannot express are reported here
        let plan = function.prepare()?;
        lines.push(format!("  native arguments: {}", plan.native_argument_count()));
        Ok(lines.join("\n"))
    }

    pub fn inspect(&self, file: &Path, as_json: bool) -> DfiResult<String> {
        let (kind, text) = self.read_descriptor(file)?;
        let summary = match kind {
            DescriptorKind::Message => MessageDescriptor::parse(&text)?.summary_json(),
            DescriptorKind::Interface => InterfaceDescriptor::parse(&text)?.summary_json(),
        };
        if as_json {
            return serde_json::to_string_pretty(&summary).map_err(|e| DfiError::from(e).recorded());
        }

        let mut lines = vec![format!(
            "{} {} {}",
            kind.as_str(),
            summary["name"].as_str().unwrap_or_default(),
            summary["version"].as_str().unwrap_or_default()
        )];
        if let Some(types) = summary["types"].as_object() {
            for (name, ty) in types {
                lines.push(format!("  type {} = {}", name, ty.as_str().unwrap_or_default()));
            }
        }
        if let Some(message) = summary["message"].as_str() {
            lines.push(format!("  message {} (id {})", message, summary["id"]));
        }
        if let Some(methods) = summary["methods"].as_array() {
            for method in methods {
                lines.push(format!(
                    "  method {} = {}",
                    method["id"].as_str().unwrap_or_default(),
                    method["descriptor"].as_str().unwrap_or_default()
                ));
            }
        }
        Ok(lines.join("\n"))
    }

    pub fn json(&self, descriptor: &str, text: &str, types: Option<&Path>, pretty: bool) -> DfiResult<String> {
        let refs = self.load_types(types)?;
        let ty = DynType::parse(descriptor, None, Some(&refs))?;
        let value = json::deserialize(&ty, text)?;
        if pretty || self.config.json.pretty {
            unsafe { json::serialize_pretty(&ty, value.as_ptr()) }
        } else {
            value.to_json()
        }
    }
}

/// Interface files end with a `:methods` section; everything else is
/// treated as a message descriptor
pub fn detect_kind(text: &str) -> DescriptorKind {
    if text.lines().any(|line| line == ":methods") {
        DescriptorKind::Interface
    } else {
        DescriptorKind::Message
    }
}
