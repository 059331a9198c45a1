//! embed-batcher-demo: drive the batcher with a synthetic backend and print stats
//!
//! Usage:
//!   embed-batcher-demo [--requests <n>] [--dim <n>] [--latency-ms <n>]
//!
//! Batching settings come from the environment (BATCH_SIZE, BATCH_TIMEOUT_MS,
//! PROCESSING_CONCURRENCY, MAX_QUEUE_SIZE, DRAIN_TIMEOUT_MS). Logging is
//! controlled by RUST_LOG or LOG_LEVEL and LOG_FORMAT (json | text).
//! Variables are first loaded from `.env`, or `env` when `.env` is absent,
//! in the working directory; the process environment wins over both.

use anyhow::{bail, Context};
use async_trait::async_trait;
use embed_batcher::batch::{BatcherConfig, EmbeddingBatcher};
use embed_batcher::embeddings::{
    BackendError, EmbeddingVectors, InferenceBackend, OutputFlags, SparseWeights,
};
use embed_batcher::validation::TextValidator;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Options {
    requests: usize,
    dim: usize,
    latency: Duration,
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(opts) = parse_args(&args)? else {
        return Ok(());
    };

    let dotenv = load_dotenv(Path::new("."))?;
    init_tracing()?;
    if let Some(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(opts))
}

fn print_usage() {
    println!(
        r#"embed-batcher-demo: exercise the embedding micro-batcher

USAGE:
    embed-batcher-demo [OPTIONS]

OPTIONS:
    --requests <n>      Number of concurrent requests (default 40)
    --dim <n>           Dense vector dimension (default 8)
    --latency-ms <n>    Fixed backend latency per batch (default 20)
    --version           Show version information
    --help              Show this help message

ENVIRONMENT:
    BATCH_SIZE, BATCH_TIMEOUT_MS, PROCESSING_CONCURRENCY,
    MAX_QUEUE_SIZE, DRAIN_TIMEOUT_MS     Batching settings
    RUST_LOG | LOG_LEVEL                 Log filter (default info)
    LOG_FORMAT                           json (default) or text

    Read from ./.env (or ./env) when present."#
    );
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut opts = Options {
        requests: 40,
        dim: 8,
        latency: Duration::from_millis(20),
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            "--version" | "-V" => {
                println!("embed-batcher-demo {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--requests" | "--dim" | "--latency-ms" => {
                let raw = iter
                    .next()
                    .with_context(|| format!("{arg} requires a value"))?;
                let n: u64 = raw
                    .parse()
                    .with_context(|| format!("{arg}: invalid number {raw:?}"))?;
                match arg.as_str() {
                    "--requests" => opts.requests = n as usize,
                    "--dim" => opts.dim = n.max(1) as usize,
                    _ => opts.latency = Duration::from_millis(n),
                }
            }
            other => {
                print_usage();
                bail!("unknown argument: {other}");
            }
        }
    }
    Ok(Some(opts))
}

/// Loads the first of `.env` and `env` found in `dir`. A missing file is not
/// an error; an unreadable or malformed one is.
fn load_dotenv(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    for name in [".env", "env"] {
        let path = dir.join(name);
        match dotenvy::from_path(&path) {
            Ok(()) => return Ok(Some(path)),
            Err(e) if e.not_found() => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to load {}", path.display()))
            }
        }
    }
    Ok(None)
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => {
            let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(level.to_lowercase()).context("invalid LOG_LEVEL")?
        }
    };
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = if format.eq_ignore_ascii_case("text") {
        builder.try_init()
    } else {
        builder.json().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Deterministic stand-in for a model: vectors derive from a hash of the text.
struct SyntheticBackend {
    dim: usize,
    latency: Duration,
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl SyntheticBackend {
    fn embed_one(&self, text: &str, flags: OutputFlags) -> EmbeddingVectors {
        let seed = fnv1a(text);
        let unit = |i: usize| ((seed.rotate_left(i as u32 * 7) % 2000) as f32 / 1000.0) - 1.0;
        let mut v = EmbeddingVectors::default();
        if flags.dense {
            v.dense = Some((0..self.dim).map(unit).collect());
        }
        if flags.sparse {
            let weights: SparseWeights = text
                .split_whitespace()
                .map(|w| ((fnv1a(w) % 30_000) as u32, 1.0 / (1.0 + w.len() as f32)))
                .collect();
            v.sparse = Some(weights);
        }
        if flags.colbert {
            v.colbert = Some(
                text.split_whitespace()
                    .enumerate()
                    .map(|(t, _)| (0..self.dim).map(|i| unit(i + t)).collect())
                    .collect(),
            );
        }
        v
    }
}

#[async_trait]
impl InferenceBackend for SyntheticBackend {
    async fn infer(
        &self,
        texts: &[String],
        flags: OutputFlags,
    ) -> Result<Vec<EmbeddingVectors>, BackendError> {
        tokio::time::sleep(self.latency).await;
        Ok(texts.iter().map(|t| self.embed_one(t, flags)).collect())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

const FLAG_MIX: [OutputFlags; 4] = [
    OutputFlags::new(true, false, false),
    OutputFlags::new(true, true, false),
    OutputFlags::new(false, false, true),
    OutputFlags::new(true, true, true),
];

async fn run(opts: Options) -> anyhow::Result<()> {
    let config = BatcherConfig::from_env().context("invalid batching configuration")?;
    let backend = Arc::new(SyntheticBackend {
        dim: opts.dim,
        latency: opts.latency,
    });
    let batcher = EmbeddingBatcher::new(config, backend)?;
    let validator = TextValidator::new();

    let texts: Vec<String> = (0..opts.requests)
        .map(|i| format!("document {i} about adaptive micro batching for embeddings"))
        .collect();
    tracing::info!(
        stats = ?validator.text_stats(texts.as_slice()),
        "Submitting synthetic workload"
    );

    let calls = texts.iter().enumerate().map(|(i, text)| {
        let flags = FLAG_MIX[i % FLAG_MIX.len()];
        let batcher = &batcher;
        let validator = &validator;
        async move {
            match validator.validate(text, flags) {
                Ok(()) => batcher.embed(text.as_str(), flags).await,
                Err(e) => Err(e),
            }
        }
    });
    let results = join_all(calls).await;

    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut usage_tokens = 0u64;
    for r in &results {
        match r {
            Ok(out) => {
                usage_tokens += out.usage.total_tokens as u64;
                *outcomes.entry("ok").or_default() += 1;
            }
            Err(e) => *outcomes.entry(e.code().name()).or_default() += 1,
        }
    }

    let stats = batcher.stats_snapshot();
    let report = batcher.shutdown().await;

    let summary = serde_json::json!({
        "config": batcher.config(),
        "outcomes": outcomes,
        "usage_tokens": usage_tokens,
        "stats": stats,
        "shutdown": report,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
