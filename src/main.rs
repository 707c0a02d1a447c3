//! CLI entry point for `mimeshell`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};

use mimeshell::config::Config;
use mimeshell::mail::{MailHeader, MailReader, PartKind};
use mimeshell::parser::entity::Entity;
use mimeshell::parser::walk::{WalkNode, Walker};
use mimeshell::parser::{ParseMode, ParseOptions};

/// Inspect MIME messages: header fields, the entity tree, and parts.
#[derive(Parser)]
#[command(name = "mimeshell", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Fail on any malformed input instead of recovering
    #[arg(long, global = true, conflicts_with = "tolerant")]
    strict: bool,

    /// Recover from malformed input where possible
    #[arg(long, global = true)]
    tolerant: bool,

    /// Header size ceiling in bytes
    #[arg(long, global = true, value_name = "BYTES")]
    max_header_bytes: Option<u64>,

    /// Maximum multipart nesting depth
    #[arg(long, global = true, value_name = "LEVELS")]
    max_depth: Option<usize>,

    /// Print JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print sizes in KiB/MiB
    #[arg(long, global = true)]
    human_sizes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the top-level header fields
    Headers {
        /// Message file, or `-` for stdin
        file: PathBuf,
        /// Write the header block exactly as read
        #[arg(long)]
        raw: bool,
    },
    /// Print the entity tree, depth-first
    Tree {
        /// Message file, or `-` for stdin
        file: PathBuf,
    },
    /// List leaf parts as inline or attachment
    Parts {
        /// Message file, or `-` for stdin
        file: PathBuf,
        /// Decode parts into this directory
        #[arg(short = 'x', long, value_name = "DIR")]
        extract: Option<PathBuf>,
        /// Extract inline parts as well as attachments
        #[arg(long, requires = "extract")]
        all: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

/// Output switches resolved from config and flags.
#[derive(Clone, Copy)]
struct Output {
    json: bool,
    human_sizes: bool,
}

impl Output {
    fn size(self, bytes: u64) -> String {
        if self.human_sizes {
            format_size(bytes, BINARY)
        } else {
            format!("{bytes} B")
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = mimeshell::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let options = parse_options(&cli, &config);
    let output = Output {
        json: cli.json || config.output.json,
        human_sizes: cli.human_sizes || config.output.human_sizes,
    };

    match cli.command {
        Commands::Headers { file, raw } => cmd_headers(&file, raw, options, output),
        Commands::Tree { file } => cmd_tree(&file, options, output),
        Commands::Parts { file, extract, all } => {
            cmd_parts(&file, extract.as_deref(), all, options, output)
        }
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Config file values, overridden by flags.
fn parse_options(cli: &Cli, config: &Config) -> ParseOptions {
    let mut options = config.parser.options();
    if cli.strict {
        options.mode = ParseMode::Strict;
    } else if cli.tolerant {
        options.mode = ParseMode::Tolerant;
    }
    if let Some(bytes) = cli.max_header_bytes {
        options.max_header_bytes = bytes;
    }
    if let Some(depth) = cli.max_depth {
        options.max_depth = depth;
    }
    options
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mimeshell::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mimeshell.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Open `path`, with `-` meaning stdin.
fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(Box::new(file))
}

fn cmd_headers(path: &Path, raw: bool, options: ParseOptions, output: Output) -> anyhow::Result<()> {
    let entity = Entity::read(open_input(path)?, options)?;
    let mut stdout = io::stdout().lock();

    if raw {
        entity.header.write_to(&mut stdout)?;
        return Ok(());
    }

    let mail = MailHeader::new(&entity.header);
    if output.json {
        let doc = serde_json::json!({
            "fields": entity.header,
            "subject": mail.subject(),
            "date": mail.date().map(|d| d.to_rfc3339()),
            "message_id": mail.message_id(),
            "content_type": entity.media_type(),
            "recoveries": entity.recoveries(),
        });
        writeln!(stdout, "{}", serde_json::to_string_pretty(&doc)?)?;
        return Ok(());
    }

    for field in &entity.header {
        writeln!(stdout, "{}: {}", field.key(), field.value())?;
    }
    if let (Some(decoded), Some(raw)) = (mail.subject(), entity.header.get("Subject")) {
        if decoded != raw {
            writeln!(stdout, "  {:<12} {}", "Subject", decoded)?;
        }
    }
    if let Some(date) = mail.date() {
        writeln!(stdout, "  {:<12} {}", "Date (UTC)", date.format("%Y-%m-%d %H:%M:%S"))?;
    }
    for recovery in entity.recoveries() {
        eprintln!("  recovered {:?}: {}", recovery.action, recovery.line);
    }
    Ok(())
}

fn cmd_tree(path: &Path, options: ParseOptions, output: Output) -> anyhow::Result<()> {
    let mut walker = Walker::read(open_input(path)?, options)?;
    let mut stdout = io::stdout().lock();
    let mut nodes = Vec::new();

    while let Some(node) = walker.next()? {
        let label = path_label(node.path());
        match node {
            WalkNode::Multipart {
                path,
                media_type,
                recoveries,
                ..
            } => {
                if output.json {
                    nodes.push(serde_json::json!({
                        "path": path,
                        "kind": "multipart",
                        "media_type": media_type,
                        "recoveries": recoveries,
                    }));
                } else {
                    let indent = "  ".repeat(path.len());
                    writeln!(stdout, "{indent}{label} {}", media_type.essence)?;
                }
            }
            WalkNode::Leaf { path, mut entity } => {
                let size = io::copy(&mut entity, &mut io::sink())?;
                let filename = MailHeader::new(&entity.header).filename();
                let issue = entity.decode_issue().map(ToString::to_string);
                if output.json {
                    nodes.push(serde_json::json!({
                        "path": path,
                        "kind": "leaf",
                        "media_type": entity.media_type(),
                        "filename": filename,
                        "size": size,
                        "decode_issue": issue,
                        "recoveries": entity.recoveries(),
                    }));
                } else {
                    let indent = "  ".repeat(path.len());
                    write!(
                        stdout,
                        "{indent}{label} {} ({})",
                        entity.media_type().essence,
                        output.size(size)
                    )?;
                    if let Some(name) = filename {
                        write!(stdout, " \"{name}\"")?;
                    }
                    if let Some(issue) = issue {
                        write!(stdout, " [{issue}]")?;
                    }
                    writeln!(stdout)?;
                }
            }
        }
    }

    if output.json {
        let doc = serde_json::json!({
            "nodes": nodes,
            "truncated": walker.truncated(),
        });
        writeln!(stdout, "{}", serde_json::to_string_pretty(&doc)?)?;
    } else {
        for path in walker.truncated() {
            eprintln!("  {} ended without its closing boundary", path_label(path));
        }
    }
    Ok(())
}

fn cmd_parts(
    path: &Path,
    extract: Option<&Path>,
    all: bool,
    options: ParseOptions,
    output: Output,
) -> anyhow::Result<()> {
    let mut reader = MailReader::create(open_input(path)?, options)?;
    let mut stdout = io::stdout().lock();

    if let Some(dir) = extract {
        let written = mimeshell::export::parts::extract_parts(&mut reader, dir, all)?;
        if output.json {
            writeln!(stdout, "{}", serde_json::to_string_pretty(&written)?)?;
        } else {
            for part in &written {
                writeln!(
                    stdout,
                    "  {:<8} {:<30} {:>10}  {}",
                    path_label(&part.part),
                    part.media_type,
                    output.size(part.size),
                    part.file.display()
                )?;
            }
            writeln!(stdout, "  Extracted {} part(s) to {}", written.len(), dir.display())?;
        }
        return Ok(());
    }

    let mut listed = Vec::new();
    while let Some(mut part) = reader.next_part()? {
        let size = io::copy(&mut part, &mut io::sink())?;
        if output.json {
            listed.push(serde_json::json!({
                "path": part.path(),
                "disposition": part.kind(),
                "media_type": part.media_type().essence,
                "size": size,
            }));
            continue;
        }
        let (kind, name) = match part.kind() {
            PartKind::Inline => ("inline", String::new()),
            PartKind::Attachment { filename } => {
                ("attachment", filename.clone().unwrap_or_default())
            }
        };
        writeln!(
            stdout,
            "  {:<8} {:<10} {:<30} {:>10}  {}",
            path_label(part.path()),
            kind,
            part.media_type().essence,
            output.size(size),
            name
        )?;
    }
    if output.json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&listed)?)?;
    }
    Ok(())
}

/// `1.2.1` style label; the root is `.`.
fn path_label(path: &[usize]) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    path.iter()
        .map(|i| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mimeshell", &mut io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let man = clap_mangen::Man::new(Cli::command());
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    io::stdout().write_all(&buf)?;
    Ok(())
}
