use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config;
use crate::data::{
    self, DownloadService, HttpDownloadService, HttpPageService, HttpRecordService, PageService,
    RecordService,
};
use crate::export::{self, Exporter};
use crate::group::{self, SortDirection};
use crate::pager::{Library, PagerOptions};
use crate::source::{self, Collection};

#[derive(Debug, Clone)]
struct Command {
    collection: Collection,
    page: usize,
    go_last: bool,
    direction: SortDirection,
    export_path: Option<PathBuf>,
}

impl Default for Command {
    fn default() -> Self {
        Self {
            collection: Collection::Videos,
            page: 0,
            go_last: false,
            direction: SortDirection::NewestFirst,
            export_path: None,
        }
    }
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    run_with_args(&args)
}

pub fn run_with_args(args: &[String]) -> Result<()> {
    let command = parse_args(args)?;
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;

    let (pages, records, downloads): (
        Arc<dyn PageService>,
        Arc<dyn RecordService>,
        Arc<dyn DownloadService>,
    ) = if cfg.service.base_url.trim().is_empty() {
        eprintln!("note: no service.base_url configured, showing sample data");
        (
            Arc::new(data::MockPageService::sample(3, 6)),
            Arc::new(data::MockRecordService),
            Arc::new(data::MockDownloadService),
        )
    } else {
        let client = Arc::new(
            source::Client::new(source::ClientConfig {
                base_url: cfg.service.base_url.clone(),
                user_agent: cfg.service.user_agent.clone(),
                page_size: cfg.feed.page_size,
                http_client: None,
            })
            .context("build feed client")?,
        );
        (
            Arc::new(HttpPageService::new(client.clone())),
            Arc::new(HttpRecordService::new(client.clone())),
            Arc::new(HttpDownloadService::new(client)),
        )
    };

    let mut library = Library::new(
        pages,
        records,
        PagerOptions {
            walk_cap: cfg.feed.walk_cap,
        },
    );

    let landed = if command.go_last {
        library.go_to_last(command.collection)?
    } else {
        library.ensure_page(command.collection, command.page)?
    };

    let items = library.items_of(command.collection, landed).to_vec();
    let groups = group::group_for_display(&items, command.direction);

    println!(
        "{} page {}/{} - {} items in {} groups",
        command.collection.as_str(),
        landed + 1,
        library.page_count(command.collection),
        items.len(),
        groups.len(),
    );
    for (index, group) in groups.iter().enumerate() {
        let representative = &group.variants[group.active_index];
        let label = representative
            .prompt
            .as_deref()
            .unwrap_or(representative.media_url.as_str());
        println!(
            "{:>3}. {}  [{} variant{}]  {}",
            index + 1,
            representative.created_at.format("%Y-%m-%d %H:%M"),
            group.variants.len(),
            if group.variants.len() == 1 { "" } else { "s" },
            label,
        );
    }

    if let Some(path) = command.export_path {
        export_page(&cfg, downloads, &items, &path)?;
    }

    Ok(())
}

fn export_page(
    cfg: &config::Config,
    downloads: Arc<dyn DownloadService>,
    items: &[crate::item::MediaItem],
    path: &std::path::Path,
) -> Result<()> {
    let jobs = export::jobs_from_items(items);
    if jobs.is_empty() {
        bail!("nothing to export on this page");
    }
    let exporter = Exporter::new(
        downloads,
        export::Config {
            workers: cfg.export.workers,
            retry_backoff: cfg.export.retry_backoff,
            batch_size: cfg.export.batch_size,
        },
    );
    let outcomes = exporter.export_batches(jobs)?;
    let multiple = outcomes.len() > 1;
    for (index, outcome) in outcomes.iter().enumerate() {
        let target = if multiple {
            numbered_path(path, index + 1)
        } else {
            path.to_path_buf()
        };
        fs::write(&target, &outcome.archive)
            .with_context(|| format!("write archive {}", target.display()))?;
        println!(
            "wrote {} ({} entries, {} failed)",
            target.display(),
            outcome.names.len(),
            outcome.failed,
        );
    }
    Ok(())
}

fn numbered_path(path: &std::path::Path, number: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "export".to_string());
    let extension = path
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "zip".to_string());
    path.with_file_name(format!("{}-{}.{}", stem, number, extension))
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut command = Command::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--collection" => {
                let value = iter
                    .next()
                    .context("--collection requires videos|images")?;
                command.collection = match value.as_str() {
                    "videos" => Collection::Videos,
                    "images" => Collection::Images,
                    other => bail!("unknown collection {:?}", other),
                };
            }
            "--page" => {
                let value = iter.next().context("--page requires a number")?;
                command.page = value
                    .parse()
                    .with_context(|| format!("bad page number {:?}", value))?;
            }
            "--last" => command.go_last = true,
            "--oldest-first" => command.direction = SortDirection::OldestFirst,
            "--export" => {
                let value = iter.next().context("--export requires a file path")?;
                command.export_path = Some(PathBuf::from(value));
            }
            other => bail!("unknown argument {:?}", other),
        }
    }
    Ok(command)
}
