//! Download command - fetch a batch of URLs into the output directory.
//!
//! While the batch runs, typing `p`, `r` or `c` followed by Enter pauses,
//! resumes or cancels it. Ctrl+C cancels; partial files are kept and resumed
//! by the next run.

use std::fs;
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use batchfetch::download::DEFAULT_REPORT_INTERVAL;
use batchfetch::{BatchController, BatchDownloader, BatchStatus, DownloadRequest};
use clap::Args;
use console::style;

use crate::error::CliError;
use crate::progress::ProgressDisplay;
use crate::runner::CliRunner;

/// Arguments for the download command.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// URLs to download; each is saved under its file name
    pub urls: Vec<String>,

    /// Read requests from a file, one `URL [relative/path]` per line
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output directory (overrides download.output_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of concurrent downloads (overrides download.workers)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Do not query sizes before downloading
    #[arg(long)]
    pub skip_probe: bool,

    /// Extract downloaded .zip files when all downloads finished
    #[arg(long)]
    pub extract: bool,

    /// Extract each archive into a folder named after it
    #[arg(long)]
    pub subfolder: bool,

    /// Delete archives after extracting them
    #[arg(long)]
    pub delete_archive: bool,

    /// Print the final report as JSON instead of a progress bar and summary
    #[arg(long)]
    pub json: bool,
}

/// Run the download command.
pub fn run(args: DownloadArgs, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    runner.log_startup("download");
    let config = runner.config();

    let mut requests = Vec::new();
    for url in &args.urls {
        requests.push(request_from_url(url)?);
    }
    if let Some(input) = &args.input {
        requests.extend(read_input_file(input)?);
    }
    if requests.is_empty() {
        return Err(CliError::Config(
            "No URLs given. Pass URLs as arguments or use --input FILE.".to_string(),
        ));
    }

    // CLI takes precedence, then config
    let mut options = config.batch_options();
    if let Some(output) = args.output {
        options.output_root = output;
    }
    if let Some(workers) = args.workers {
        options = options.with_pool_size(workers);
    }
    if args.skip_probe {
        options.skip_probe = true;
    }
    if args.extract {
        options.auto_extract = true;
    }
    if args.subfolder {
        options.extract_to_subfolder = true;
    }
    if args.delete_archive {
        options.delete_archive_after_extract = true;
    }

    let downloader = BatchDownloader::new(config.downloader_settings())?;
    let file_count = requests.len();
    let output_root = options.output_root.clone();
    let handle = downloader.start_batch(requests, options)?;

    let controller = handle.controller();
    ctrlc::set_handler({
        let controller = controller.clone();
        move || controller.cancel()
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    if !args.json {
        println!(
            "Downloading {} files to {}",
            file_count,
            output_root.display()
        );
        if io::stdin().is_terminal() {
            println!("[p] Pause [r] Resume [c] Cancel (then Enter) | [Ctrl+C] Cancel");
            spawn_key_reader(controller);
        }

        let display = ProgressDisplay::new();
        while !handle.is_finished() {
            display.update(&handle.poll());
            thread::sleep(DEFAULT_REPORT_INTERVAL);
        }
        display.finish();
    } else {
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(50));
        }
    }

    let report = handle.wait()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.status == BatchStatus::Cancelled || report.failed > 0 {
        println!("{}", style(report.summary()).yellow());
    } else {
        println!("{}", style(report.summary()).green());
    }

    if report.status == BatchStatus::Completed && report.failed > 0 {
        return Err(CliError::FilesFailed {
            failed: report.failed,
            total: report.file_count,
        });
    }

    Ok(())
}

/// Control keys typed on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKey {
    Pause,
    Resume,
    Cancel,
}

fn parse_control_key(line: &str) -> Option<ControlKey> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "pause" => Some(ControlKey::Pause),
        "r" | "resume" => Some(ControlKey::Resume),
        "c" | "q" | "cancel" => Some(ControlKey::Cancel),
        _ => None,
    }
}

/// Read control keys until stdin closes or the batch is cancelled.
fn spawn_key_reader(controller: BatchController) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_control_key(&line) {
                Some(ControlKey::Pause) => controller.pause(),
                Some(ControlKey::Resume) => controller.resume(),
                Some(ControlKey::Cancel) => {
                    controller.cancel();
                    break;
                }
                None => {}
            }
        }
    });
}

fn request_from_url(url: &str) -> Result<DownloadRequest, CliError> {
    DownloadRequest::from_url(url).ok_or_else(|| {
        CliError::Config(format!(
            "Cannot derive a file name from '{}'. Use --input with an explicit path.",
            url
        ))
    })
}

fn read_input_file(path: &Path) -> Result<Vec<DownloadRequest>, CliError> {
    let content = fs::read_to_string(path).map_err(|e| CliError::Input {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_input(&content)
}

/// Parse `URL [relative/path]` lines; blank lines and `#` comments are skipped.
fn parse_input(content: &str) -> Result<Vec<DownloadRequest>, CliError> {
    let mut requests = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let Some(url) = fields.next() else { continue };
        match fields.next() {
            Some(destination) => requests.push(DownloadRequest::new(url, destination)),
            None => requests.push(request_from_url(url)?),
        }
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_control_key() {
        assert_eq!(parse_control_key("p"), Some(ControlKey::Pause));
        assert_eq!(parse_control_key(" R \n"), Some(ControlKey::Resume));
        assert_eq!(parse_control_key("cancel"), Some(ControlKey::Cancel));
        assert_eq!(parse_control_key("x"), None);
    }

    #[test]
    fn test_parse_input() {
        let content = "\
# roms
http://example.com/files/Game%20One.zip
http://example.com/files/b.bin  nested/b.bin

";
        let requests = parse_input(content).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].destination, PathBuf::from("Game One.zip"));
        assert_eq!(requests[1].destination, PathBuf::from("nested/b.bin"));
        assert_eq!(requests[1].url, "http://example.com/files/b.bin");
    }

    #[test]
    fn test_parse_input_rejects_nameless_url() {
        assert!(parse_input("http://example.com/\n").is_err());
    }

    #[test]
    fn test_read_missing_input_file() {
        let temp = TempDir::new().unwrap();
        let result = read_input_file(&temp.path().join("absent.txt"));
        assert!(matches!(result, Err(CliError::Input { .. })));
    }
}
