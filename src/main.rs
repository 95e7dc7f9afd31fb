//! CLI entry point for `emlShell`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use emlshell::config::Config;
use emlshell::export::attachment::{export_all_attachments, ExportOptions};
use emlshell::model::attachment::AttachmentMeta;
use emlshell::model::{Message, MimePart};
use emlshell::parser::multipart;

#[derive(Parser)]
#[command(
    name = "emlshell",
    version,
    about = "Inspect .eml files: MIME structure, attachments and text"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the headers that identify a message
    Info {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the MIME part tree
    Parts {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List or extract attachments
    Attachments {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Output directory (defaults to the configured export directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Only list attachments, do not write them
        #[arg(short, long)]
        list: bool,
        /// Write the bodies as stored, without removing the transfer encoding
        #[arg(long)]
        raw: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the text body of a message
    Text {
        path: PathBuf,
    },
    /// Show the configuration file path, or write the defaults there
    Config {
        /// Write a default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = emlshell::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Info { path, json } => cmd_info(&path, json),
        Commands::Parts { path, json } => cmd_parts(&path, json, &config),
        Commands::Attachments {
            paths,
            output,
            list,
            raw,
            json,
        } => {
            if list {
                cmd_list_attachments(&paths, json, &config)
            } else {
                let output = output
                    .or_else(|| config.export.default_output_dir.clone())
                    .unwrap_or_else(|| PathBuf::from("."));
                let mut options = config.export_options();
                if raw {
                    options.decode = false;
                }
                cmd_extract_attachments(&paths, &output, &options)
            }
        }
        Commands::Text { path } => cmd_text(&path, &config),
        Commands::Config { init } => cmd_config(init, &config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = emlshell::config::log_file_path(config);
    let log_dir = emlshell::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_name = log_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "emlshell.log".into());
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Print where the configuration lives; with `init`, write the defaults.
fn cmd_config(init: bool, config: &Config) -> anyhow::Result<()> {
    let path = emlshell::config::config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
    if init {
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }
        emlshell::config::save_config(&Config::default())?;
        println!("  Wrote default config to {}", path.display());
    } else {
        let state = if path.exists() { "found" } else { "not found, using defaults" };
        println!("  {:<14} {} ({state})", "Config", path.display());
        println!(
            "  {:<14} {}",
            "Log file",
            emlshell::config::log_file_path(config).display()
        );
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "emlshell", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

fn open_message(path: &Path) -> anyhow::Result<Message> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Ok(Message::open(path)?)
}

/// Show sender, recipient, subject, date and size of a message.
fn cmd_info(path: &Path, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let start = Instant::now();
    let mut message = open_message(path)?;
    let elapsed = start.elapsed();
    let date = message.date();

    if json {
        let info = serde_json::json!({
            "file": path.to_string_lossy(),
            "size": message.size(),
            "from": message.from(),
            "to": message.to(),
            "subject": message.subject(),
            "date": date.map(|d| d.to_rfc3339()),
            "content_type": message.mime_type(),
            "multipart": message.is_multipart(),
            "parse_time_us": elapsed.as_micros(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!();
        println!("  {:<14} {}", "File", path.display());
        println!("  {:<14} {}", "Size", format_size(message.size(), BINARY));
        println!("  {:<14} {}", "From", message.from().unwrap_or("-"));
        println!("  {:<14} {}", "To", message.to().unwrap_or("-"));
        println!("  {:<14} {}", "Subject", message.subject().unwrap_or("-"));
        if let Some(date) = date {
            println!("  {:<14} {}", "Date", date.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        println!("  {:<14} {}", "Content-Type", message.mime_type());
        println!("  {:<14} {:.2?}", "Parse time", elapsed);
        println!();
    }

    message.close();
    Ok(())
}

/// Print every part of the MIME tree, indented by depth.
fn cmd_parts(path: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let mut message = open_message(path)?;
    let mut rows = Vec::new();
    multipart::walk(
        message.root_mut(),
        config.parser.max_depth,
        &mut |part: &mut MimePart, depth| {
            rows.push(serde_json::json!({
                "depth": depth,
                "content_type": part.mime_type(),
                "encoding": part.transfer_encoding(),
                "attachment": part.attachment_name().filter(|_| part.is_attachment()),
                "offset": part.body().start(),
                "length": part.body().size(),
            }));
        },
    );
    message.close();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in &rows {
        let depth = row["depth"].as_u64().unwrap_or(0) as usize;
        let length = row["length"].as_u64().unwrap_or(0);
        let mut line = format!(
            "{}{:<28} {:>10}",
            "  ".repeat(depth + 1),
            row["content_type"].as_str().unwrap_or_default(),
            format_size(length, BINARY)
        );
        if let Some(name) = row["attachment"].as_str() {
            line.push_str(&format!("  [{name}]"));
        }
        println!("{line}");
    }
    Ok(())
}

/// List the attachments of one or more messages.
fn cmd_list_attachments(paths: &[PathBuf], json: bool, config: &Config) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let mut listing: Vec<(PathBuf, Vec<AttachmentMeta>)> = Vec::new();
    for path in paths {
        let mut message = open_message(path)?;
        listing.push((path.clone(), message.attachments(config.parser.max_depth)));
        message.close();
    }

    if json {
        let items: Vec<serde_json::Value> = listing
            .iter()
            .map(|(path, atts)| {
                serde_json::json!({
                    "file": path.to_string_lossy(),
                    "attachments": atts,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for (path, atts) in &listing {
        println!("  {}", path.display());
        if atts.is_empty() {
            println!("    No attachments found.");
        }
        for att in atts {
            println!(
                "    {:>3}  {:<40} {:<28} {:>10}",
                att.index,
                att.filename,
                att.content_type,
                format_size(att.content_length, BINARY)
            );
        }
    }
    Ok(())
}

/// Extract all attachments from one or more messages.
///
/// With several input files, each message gets its own subfolder named
/// after the file stem.
fn cmd_extract_attachments(
    paths: &[PathBuf],
    output: &Path,
    options: &ExportOptions,
) -> anyhow::Result<()> {
    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Extracting [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    let mut total = 0;
    for path in paths {
        let target = if paths.len() > 1 {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            output.join(emlshell::export::attachment::sanitize_filename_part(
                &stem,
                options.filename_max_len,
            ))
        } else {
            output.to_path_buf()
        };

        let mut message = open_message(path)?;
        let written = export_all_attachments(&mut message, &target, options)?;
        message.close();
        total += written.len();
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "  Extracted {} attachment(s) to {}",
        total,
        output.display()
    );
    Ok(())
}

/// Print the first text/plain body, or the first text/html one.
fn cmd_text(path: &Path, config: &Config) -> anyhow::Result<()> {
    let mut message = open_message(path)?;
    let mut plain: Option<String> = None;
    let mut html: Option<String> = None;
    let mut failure = None;

    multipart::walk(
        message.root_mut(),
        config.parser.max_depth,
        &mut |part: &mut MimePart, _depth| {
            if plain.is_some() || part.is_attachment() || part.is_multipart() {
                return;
            }
            let slot = match part.mime_type().as_str() {
                "text/plain" => &mut plain,
                "text/html" if html.is_none() => &mut html,
                _ => return,
            };
            match part.text() {
                Ok(text) => *slot = Some(text),
                Err(e) => failure = Some(e),
            }
        },
    );
    message.close();

    match plain.or(html) {
        Some(text) => {
            println!("{text}");
            Ok(())
        }
        None => match failure {
            Some(e) => Err(e.into()),
            None => anyhow::bail!("No text body in {}", path.display()),
        },
    }
}
