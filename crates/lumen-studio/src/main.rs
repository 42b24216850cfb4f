//! `lumen-studio <graph.json> [--dry-run N] [--textures DIR]`
//!
//! Presents a compositor graph in a window, or with `--dry-run` renders N
//! frames on the headless backend and prints the schedule and pool usage.

mod dry_run;
mod graph;
mod scene;
mod viewer;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use lumen_engine::coords::Viewport;
use lumen_engine::device::GpuInit;
use lumen_engine::logging::{init_logging, LoggingConfig};
use lumen_engine::window::{Runtime, RuntimeConfig};

use crate::graph::GraphSource;
use crate::viewer::Viewer;

const USAGE: &str = "usage: lumen-studio <graph.json> [--dry-run N] [--textures DIR]";

/// Logical size used for dry runs.
const DRY_RUN_VIEWPORT: Viewport = Viewport::new(1280.0, 720.0, 1.0);

#[derive(Debug, Default, PartialEq)]
struct Cli {
    graph: Option<PathBuf>,
    dry_run: Option<u64>,
    textures: Option<PathBuf>,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--dry-run" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --dry-run"));
                };
                let frames = v.parse().with_context(|| format!("--dry-run expects a frame count, got {v:?}"))?;
                cli.dry_run = Some(frames);
                i += 2;
            }
            "--textures" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --textures"));
                };
                cli.textures = Some(PathBuf::from(v));
                i += 2;
            }
            other if other.starts_with("--") => {
                return Err(anyhow!("unknown argument: {other}\n{USAGE}"));
            }
            path => {
                if cli.graph.is_some() {
                    return Err(anyhow!("more than one graph given\n{USAGE}"));
                }
                cli.graph = Some(PathBuf::from(path));
                i += 1;
            }
        }
    }
    Ok(cli)
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    let path = cli.graph.ok_or_else(|| anyhow!(USAGE))?;
    let source = GraphSource::load(&path, cli.textures)?;

    if let Some(frames) = cli.dry_run {
        let report = dry_run::run(&source, frames, DRY_RUN_VIEWPORT)?;
        log::info!("dry run ok: {} frames, peak {} live textures", report.frames_rendered, report.peak_live);
        return Ok(());
    }

    let config = RuntimeConfig {
        title: format!("lumen studio - {}", path.display()),
        ..RuntimeConfig::default()
    };
    Runtime::run(config, GpuInit::default(), Viewer::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_cli_dry_run_with_textures() {
        let cli = parse_cli(&args(&["graph.json", "--dry-run", "4", "--textures", "tex"])).unwrap();
        assert_eq!(
            cli,
            Cli {
                graph: Some(PathBuf::from("graph.json")),
                dry_run: Some(4),
                textures: Some(PathBuf::from("tex")),
            }
        );
    }

    #[test]
    fn parse_cli_rejects_bad_input() {
        assert!(parse_cli(&args(&["--dry-run"])).is_err());
        assert!(parse_cli(&args(&["g.json", "--dry-run", "many"])).is_err());
        assert!(parse_cli(&args(&["g.json", "--fullscreen"])).is_err());
        assert!(parse_cli(&args(&["a.json", "b.json"])).is_err());
    }
}
