use anyhow::{bail, Context, Result};
use chunk_text::{
    line_comment_token, trim_range, ChunkPartitioner, ChunkType, Position, Range, SelectionMode,
    TextAddress, TextBuffer,
};
use clap::{Parser, Subcommand};
use kernel_events::parse_record_line;
use log::{debug, warn};
use notebook::receiver::{ExecutionRequest, KernelResultReceiver, RunOptions};
use notebook::render::{NullRenderer, OutputNode};
use notebook::settings::{load_settings, settings_path};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the code chunks of a file
    Chunks {
        file: PathBuf,
        #[command(flatten)]
        chunking: ChunkArgs,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Show the chunk containing a position
    ChunkAt {
        file: PathBuf,
        /// Zero-based row
        #[arg(long)]
        row: usize,
        /// Zero-based column
        #[arg(long, default_value = "0")]
        column: usize,
        #[command(flatten)]
        chunking: ChunkArgs,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Show the chunks a run over a range would submit
    Select {
        file: PathBuf,
        /// Range start as ROW[:COLUMN]
        #[arg(long, value_parser = parse_position)]
        from: Position,
        /// Range end as ROW[:COLUMN] (defaults to the start)
        #[arg(long, value_parser = parse_position)]
        to: Option<Position>,
        /// Which chunks to pick relative to the range (all, above, below, selected)
        #[arg(long, value_delimiter = ',', default_value = "selected")]
        mode: Vec<SelectionMode>,
        #[command(flatten)]
        chunking: ChunkArgs,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Replay recorded kernel output through a result receiver
    Replay {
        /// JSON lines: nbformat output dicts and status records
        outputs: PathBuf,
        /// Render text/html outputs as plain text instead
        #[arg(long)]
        no_html: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Show the settings file location and current values
    Settings {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct ChunkArgs {
    /// Chunk type: paragraph or cell (defaults to the configured type)
    #[arg(long = "type")]
    chunk_type: Option<ChunkType>,
    /// Language id, used to find the comment token for cells
    #[arg(long)]
    language: Option<String>,
}

#[derive(Serialize)]
struct ChunkInfo {
    index: usize,
    range: Range,
    code: Range,
    text: String,
}

#[derive(Tabled)]
struct ChunkTableRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "ROWS")]
    rows: String,
    #[tabled(rename = "CODE")]
    preview: String,
}

impl From<&ChunkInfo> for ChunkTableRow {
    fn from(info: &ChunkInfo) -> Self {
        ChunkTableRow {
            index: info.index,
            rows: format!("{}-{}", info.range.start.row, info.range.end.row),
            preview: truncate_line(&info.text, 60),
        }
    }
}

#[derive(Serialize)]
struct ReplaySummary<'a> {
    state: String,
    execution_count: Option<usize>,
    skipped_lines: usize,
    outputs: &'a [OutputNode],
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    match cli.command {
        Some(Commands::Chunks {
            file,
            chunking,
            json,
        }) => list_chunks(&file, &chunking, json),
        Some(Commands::ChunkAt {
            file,
            row,
            column,
            chunking,
            json,
        }) => chunk_at(&file, Position::new(row, column), &chunking, json),
        Some(Commands::Select {
            file,
            from,
            to,
            mode,
            chunking,
            json,
        }) => select_chunks(&file, Range::new(from, to.unwrap_or(from)), &mode, &chunking, json),
        Some(Commands::Replay {
            outputs,
            no_html,
            json,
        }) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(replay(&outputs, !no_html, json))
        }
        Some(Commands::Settings { json }) => show_settings(json),
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}

/// Parse `ROW` or `ROW:COLUMN`.
fn parse_position(s: &str) -> Result<Position, String> {
    let (row, column) = match s.split_once(':') {
        Some((row, column)) => (row, column),
        None => (s, "0"),
    };
    let row = row
        .trim()
        .parse()
        .map_err(|_| format!("Invalid row in position: {}", s))?;
    let column = column
        .trim()
        .parse()
        .map_err(|_| format!("Invalid column in position: {}", s))?;
    Ok(Position::new(row, column))
}

/// Guess a language id from a file extension.
fn language_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "py" | "pyw" | "ipy" => "python",
        "jl" => "julia",
        "r" => "r",
        "ts" | "tsx" => "typescript",
        "js" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "sh" | "bash" | "zsh" => "shell",
        "lua" => "lua",
        "sql" => "sql",
        "m" => "matlab",
        "clj" => "clojure",
        _ => return None,
    };
    Some(language)
}

/// Truncate to the first line, adding an ellipsis when anything was cut.
fn truncate_line(text: &str, max_len: usize) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or("");
    let more = lines.next().is_some();
    if first.chars().count() > max_len {
        let cut: String = first.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else if more {
        format!("{} ...", first)
    } else {
        first.to_string()
    }
}

/// Shorten a path for display by replacing home directory with ~
fn shorten_path(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(relative) = path.strip_prefix(&home) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

fn read_buffer(file: &Path) -> Result<TextBuffer> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(TextBuffer::from_text(&text))
}

fn partitioner<'a>(
    buffer: &'a TextBuffer,
    file: &Path,
    chunking: &ChunkArgs,
) -> Result<ChunkPartitioner<'a, TextBuffer>> {
    let chunk_type = chunking
        .chunk_type
        .unwrap_or_else(|| load_settings().default_chunk_type);
    let language = chunking
        .language
        .as_deref()
        .or_else(|| language_for_path(file));
    let token = language.and_then(line_comment_token);
    debug!(
        "[runt] {} chunks for {} (language {:?}, comment token {:?})",
        chunk_type,
        file.display(),
        language,
        token
    );
    if chunk_type == ChunkType::Cell && token.is_none() {
        bail!(
            "Cell chunks need a line comment token; pass --language for {}",
            file.display()
        );
    }
    Ok(ChunkPartitioner::for_type(buffer, chunk_type, token.as_deref())?)
}

fn describe(buffer: &TextBuffer, chunks: Vec<Range>) -> Vec<ChunkInfo> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, range)| {
            let code = trim_range(buffer, range);
            ChunkInfo {
                index,
                range,
                code,
                text: buffer.text_in_range(code),
            }
        })
        .collect()
}

fn print_chunks(chunks: &[ChunkInfo], json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(chunks)?);
    } else if chunks.is_empty() {
        println!("No chunks found.");
    } else {
        let rows: Vec<ChunkTableRow> = chunks.iter().map(ChunkTableRow::from).collect();
        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }
    Ok(())
}

fn list_chunks(file: &Path, chunking: &ChunkArgs, json_output: bool) -> Result<()> {
    let buffer = read_buffer(file)?;
    let chunks = partitioner(&buffer, file, chunking)?.all_chunks();
    print_chunks(&describe(&buffer, chunks), json_output)
}

fn chunk_at(file: &Path, point: Position, chunking: &ChunkArgs, json_output: bool) -> Result<()> {
    let buffer = read_buffer(file)?;
    if point.row > buffer.last_row() {
        bail!(
            "Row {} is past the end of {} ({} lines)",
            point.row,
            file.display(),
            buffer.line_count()
        );
    }
    let chunk = partitioner(&buffer, file, chunking)?.chunk_containing_point(point);
    let info = describe(&buffer, vec![chunk]);
    if json_output {
        println!("{}", serde_json::to_string_pretty(&info[0])?);
    } else {
        println!("{}", info[0].text);
    }
    Ok(())
}

fn select_chunks(
    file: &Path,
    range: Range,
    modes: &[SelectionMode],
    chunking: &ChunkArgs,
    json_output: bool,
) -> Result<()> {
    let buffer = read_buffer(file)?;
    let range = buffer.clip_range(range);
    let chunks = partitioner(&buffer, file, chunking)?.chunks_for_range(range, modes);
    let chunks: Vec<ChunkInfo> = describe(&buffer, chunks)
        .into_iter()
        .filter(|chunk| !chunk.text.trim().is_empty())
        .collect();
    print_chunks(&chunks, json_output)
}

async fn replay(outputs: &Path, render_html: bool, json_output: bool) -> Result<()> {
    let file = tokio::fs::File::open(outputs)
        .await
        .with_context(|| format!("Failed to open {}", outputs.display()))?;
    let mut lines = BufReader::new(file).lines();

    let request = ExecutionRequest::new(
        Range::point(Position::new(0, 0)),
        outputs.display().to_string(),
        RunOptions {
            inpane: false,
            owner: Some("runt replay".to_string()),
        },
    );
    let (mut receiver, completion) =
        KernelResultReceiver::new(request, 0, Arc::new(NullRenderer), render_html);

    let mut line_number = 0;
    let mut skipped_lines = 0;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_record_line(&line) {
            Ok(event) => {
                if receiver.ingest(event) {
                    debug!("[runt] Settled at line {}", line_number);
                }
            }
            Err(e) => {
                warn!("[runt] Skipping line {}: {}", line_number, e);
                skipped_lines += 1;
            }
        }
    }

    let outcome = if receiver.state().is_terminal() {
        Some(completion.await)
    } else {
        None
    };

    if json_output {
        let summary = ReplaySummary {
            state: receiver.state().to_string(),
            execution_count: receiver.execution_count(),
            skipped_lines,
            outputs: receiver.tree().nodes(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for node in receiver.tree().nodes() {
        match node {
            OutputNode::Stream { text, .. } | OutputNode::Plain { text } => {
                print!("{}", text);
                if !text.ends_with('\n') {
                    println!();
                }
            }
            OutputNode::Script { source } => println!("[script: {} bytes]", source.len()),
            other => println!("{}", other.display_text()),
        }
    }
    match outcome {
        Some(Ok(Ok(()))) => println!("-- ok"),
        Some(Ok(Err(e))) => println!("-- {}: {}", receiver.state(), e),
        Some(Err(_)) => println!("-- {}", receiver.state()),
        None => println!("-- still pending (no terminal status in recording)"),
    }
    if let Some(count) = receiver.execution_count() {
        println!("-- execution count {}", count);
    }
    if skipped_lines > 0 {
        eprintln!("Skipped {} unreadable lines", skipped_lines);
    }
    Ok(())
}

fn show_settings(json_output: bool) -> Result<()> {
    let settings = load_settings();
    if json_output {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }
    println!("Settings file: {}", shorten_path(&settings_path()));
    println!("  render_html:        {}", settings.render_html);
    println!("  default_chunk_type: {}", settings.default_chunk_type);
    println!("  change_debounce_ms: {}", settings.change_debounce_ms);
    if settings.kernel_hints.is_empty() {
        println!("  kernel_hints:       (none)");
    } else {
        println!("  kernel_hints:");
        for hint in &settings.kernel_hints {
            println!("    {} = {}", shorten_path(&hint.directory), hint.kernel);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("3"), Ok(Position::new(3, 0)));
        assert_eq!(parse_position("3:7"), Ok(Position::new(3, 7)));
        assert!(parse_position("x:1").is_err());
        assert!(parse_position("1:").is_err());
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(Path::new("a/b.py")), Some("python"));
        assert_eq!(language_for_path(Path::new("main.TS")), Some("typescript"));
        assert_eq!(language_for_path(Path::new("notes.txt")), None);
        assert_eq!(language_for_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("x = 1", 10), "x = 1");
        assert_eq!(truncate_line("x = 1\ny = 2", 10), "x = 1 ...");
        assert_eq!(truncate_line("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_describe_trims_chunks() {
        let buffer = TextBuffer::from_text("a = 1\n\n\nb = 2\n");
        let chunks = ChunkPartitioner::for_type(&buffer, ChunkType::Paragraph, None)
            .unwrap()
            .all_chunks();
        let texts: Vec<String> = describe(&buffer, chunks)
            .into_iter()
            .map(|c| c.text)
            .filter(|t| !t.is_empty())
            .collect();
        assert_eq!(texts, vec!["a = 1", "b = 2"]);
    }

    #[test]
    fn test_cli_parses_selection_modes() {
        let cli = Cli::try_parse_from([
            "runt", "select", "x.py", "--from", "2", "--mode", "above,selected",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Select { mode, from, to, .. }) => {
                assert_eq!(mode, vec![SelectionMode::Above, SelectionMode::Selected]);
                assert_eq!(from, Position::new(2, 0));
                assert!(to.is_none());
            }
            _ => panic!("expected select"),
        }
    }
}
