use std::{path::PathBuf, time::Duration};

use structopt::StructOpt;

use cvs_archive_import::{Loader, MemorySink, VisitOutcome};

#[derive(Debug, StructOpt)]
struct Opt {
    #[structopt(help = "CVS origin URL (file://, rsync://, pserver://, ssh://, fake://)")]
    url: String,

    #[structopt(
        long,
        help = "origin URL recorded at the sink, when it differs from the fetch URL"
    )]
    origin_url: Option<String>,

    #[structopt(
        long,
        parse(from_os_str),
        help = "use an existing CVSROOT copy instead of fetching one"
    )]
    cvsroot: Option<PathBuf>,

    #[structopt(
        long,
        default_value = "/tmp",
        parse(from_os_str),
        help = "base directory for temporary working state"
    )]
    temp_dir: PathBuf,

    #[structopt(
        long,
        default_value = "300s",
        parse(try_from_str = parse_duration::parse::parse),
        help = "maximum time between file commits before they'll be considered different changesets"
    )]
    fuzz: Duration,

    #[structopt(long, help = "largest content size to load, in bytes")]
    max_content_size: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let origin_url = opt.origin_url.clone().unwrap_or_else(|| opt.url.clone());
    let mut sink = MemorySink::new();
    sink.set_origin(&origin_url);

    let mut loader = Loader::new(sink, &opt.url)?
        .with_origin_url(&origin_url)
        .with_temp_dir(&opt.temp_dir)
        .with_fuzz_sec(opt.fuzz.as_secs() as i64)
        .with_max_content_size(opt.max_content_size);
    if let Some(cvsroot) = &opt.cvsroot {
        loader = loader.with_cvsroot(cvsroot);
    }

    let summary = loader.load().await;
    let sink = loader.into_sink();

    match summary.outcome {
        VisitOutcome::Eventful => println!("status: eventful"),
        VisitOutcome::Uneventful => println!("status: uneventful"),
        VisitOutcome::Failed => println!("status: failed"),
        VisitOutcome::NotFound => println!("status: not_found"),
    }
    println!(
        "objects: {} contents, {} skipped, {} directories, {} commits",
        sink.contents.len(),
        sink.skipped_contents.len(),
        sink.directories.len(),
        sink.commits.len()
    );
    if let Some(snapshot) = summary.snapshot {
        println!("snapshot: {}", snapshot);
    }

    if matches!(
        summary.outcome,
        VisitOutcome::Failed | VisitOutcome::NotFound
    ) {
        std::process::exit(1);
    }

    Ok(())
}
