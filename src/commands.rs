//! CLI command implementations

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use trellis_session::{CrawlSession, SessionConfig};

pub async fn crawl(
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
    seed: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(output) = output {
        config.output = Some(output);
    }
    if !config.has_sources() {
        anyhow::bail!(
            "no sources enabled; add a [pypi], [npm], or [stackoverflow] section to the config"
        );
    }

    let mut session = CrawlSession::new(config.clone())?;
    if let Some(seed_path) = seed {
        let file = File::open(&seed_path)
            .with_context(|| format!("cannot open seed snapshot {}", seed_path.display()))?;
        let graph = trellis_core::load(BufReader::new(file))?;
        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "seeding session from {}",
            seed_path.display()
        );
        session = session.with_seed(graph);
    }

    // Ctrl-C cancels the session; whatever was merged stays valid.
    let cancel = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping the crawl");
            cancel.cancel();
        }
    });

    let report = session.run().await;

    for outcome in &report.sources {
        tracing::info!(
            source = %outcome.source,
            records = outcome.records,
            soft_errors = outcome.soft_errors,
            rejected = outcome.rejected,
            fatal = outcome.fatal.as_deref().unwrap_or("-"),
            "source outcome"
        );
    }
    for host in &report.hosts {
        tracing::info!(
            host = %host.host,
            requests = host.requests,
            retries = host.retries,
            failures = host.failures,
            "host traffic"
        );
    }

    if let Some(path) = &config.output {
        let file = File::create(path)
            .with_context(|| format!("cannot create snapshot {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        trellis_core::save(&report.graph, &mut writer)?;
        tracing::info!(
            nodes = report.graph.node_count(),
            edges = report.graph.edge_count(),
            "snapshot written to {}",
            path.display()
        );
    }

    if let Some(err) = report.session_error() {
        tracing::warn!(%err, "session completed partially");
    }
    Ok(())
}

pub fn export(snapshot: PathBuf) -> anyhow::Result<()> {
    let file = File::open(&snapshot)
        .with_context(|| format!("cannot open snapshot {}", snapshot.display()))?;
    let graph = trellis_core::load(BufReader::new(file))?;

    let stdout = std::io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    trellis_core::save(&graph, &mut writer)?;
    Ok(())
}

/// Probe each configured registry endpoint once and report reachability
/// and latency, plus the throttle counters accumulated while probing.
pub async fn limits(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let mut endpoints = Vec::new();
    if let Some(pypi) = &config.pypi {
        endpoints.push(format!("{}/simple/", pypi.base_url.trim_end_matches('/')));
    }
    if let Some(npm) = &config.npm {
        endpoints.push(npm.registry_url.clone());
    }
    if let Some(so) = &config.stackoverflow {
        endpoints.push(so.archive_url.clone());
    }
    if endpoints.is_empty() {
        anyhow::bail!("no sources enabled, nothing to probe");
    }

    let fetcher = trellis_fetch::Fetcher::new(config.fetch.clone())?;
    for endpoint in endpoints {
        let start = Instant::now();
        match fetcher.fetch(&endpoint).await {
            Ok(bytes) => println!(
                "ok    {:>8} bytes  {:>6} ms  {endpoint}",
                bytes.len(),
                start.elapsed().as_millis()
            ),
            Err(err) => println!("fail  {err}"),
        }
    }
    for host in fetcher.host_stats() {
        println!(
            "host {}: {} requests, {} retries, {} failures",
            host.host, host.requests, host.retries, host.failures
        );
    }
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SessionConfig> {
    match path {
        Some(path) => Ok(SessionConfig::from_toml_path(path)?),
        None => Ok(SessionConfig::default()),
    }
}
