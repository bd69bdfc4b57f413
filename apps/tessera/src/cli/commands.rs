//! # CLI Command Implementations

use super::PromoteArgs;
use crate::api;
use crate::config::{DEFAULT_CONFIG_FILE, Mode, TesseraConfig};
use crate::embedder::build_embedder;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tessera_core::{
    CandidateFact, CandidateSelector, EntitySummary, GraphResult, LayeredStore, PromotionOutcome,
    PromotionReport, Promoter, SearchHit, Selection, Session, StoreRequest, TesseraError,
    open_store,
};

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub verbose: bool,
}

fn print_json(value: &serde_json::Value) -> Result<(), TesseraError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| TesseraError::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}

// =============================================================================
// STARTUP
// =============================================================================

/// Load, apply the `--mode` flag and validate.
pub fn load_config(path: Option<&Path>, mode: Option<Mode>) -> Result<TesseraConfig, TesseraError> {
    let mut config = TesseraConfig::load(path)?;
    match mode {
        Some(Mode::Dual) => config.enable_dual(),
        Some(Mode::Single) => config.mode = Mode::Single,
        None => {}
    }
    config.validate()?;
    Ok(config)
}

/// Opened stores for one command.
pub struct Runtime {
    pub session: Session,
    /// Present in dual mode only.
    pub promoter: Option<Promoter>,
}

/// Open the configured layers. A dimension mismatch surfaces here, before
/// any command runs.
pub async fn open_runtime(config: &TesseraConfig) -> Result<Runtime, TesseraError> {
    let embedder = build_embedder(&config.embedding)?;
    let project = open_store(&config.project_store()).await?;

    let Some(global_config) = config.global_store() else {
        return Ok(Runtime {
            session: Session::new(project, embedder),
            promoter: None,
        });
    };

    let global = match open_store(&global_config).await {
        Ok(store) => store,
        Err(e) => {
            if let Err(close_err) = project.close().await {
                tracing::warn!(error = %close_err, "closing project store failed");
            }
            return Err(e);
        }
    };
    let promoter = Promoter::new(
        Arc::clone(&project),
        Arc::clone(&global),
        build_embedder(config.global_embedding())?,
    );
    let layered = LayeredStore::new(project, global);
    Ok(Runtime {
        session: Session::new(Arc::new(layered), embedder),
        promoter: Some(promoter),
    })
}

/// Run `f` against a fresh runtime and close the stores afterwards, also on
/// failure.
async fn with_runtime<F, Fut>(config: &TesseraConfig, f: F) -> Result<(), TesseraError>
where
    F: FnOnce(Arc<Runtime>) -> Fut,
    Fut: std::future::Future<Output = Result<(), TesseraError>>,
{
    let runtime = Arc::new(open_runtime(config).await?);
    let result = f(Arc::clone(&runtime)).await;
    let closed = runtime.session.close().await;
    result.and(closed)
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Write a default config (unless one exists) and create the stores, which
/// locks the embedding dimension.
pub async fn cmd_init(
    path: Option<&Path>,
    mode: Option<Mode>,
    force: bool,
    out: Output,
) -> Result<(), TesseraError> {
    let target = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let written = if target.exists() && !force {
        tracing::info!(path = %target.display(), "config file exists, keeping it");
        false
    } else {
        let mut config = TesseraConfig::default();
        if mode == Some(Mode::Dual) {
            config.enable_dual();
        }
        std::fs::write(target, config.to_toml_string()?)?;
        true
    };

    let config = load_config(Some(target), mode)?;
    with_runtime(&config, |_| async { Ok(()) }).await?;

    if out.json {
        print_json(&serde_json::json!({
            "success": true,
            "config": target.display().to_string(),
            "config_written": written,
            "mode": config.mode.to_string(),
            "project": config.project.path.display().to_string(),
            "global": config.global_store().map(|g| g.path.display().to_string()),
            "dimension": config.embedding.dimension,
        }))
    } else {
        if written {
            println!("Wrote {}", target.display());
        }
        println!("Mode:      {}", config.mode);
        println!(
            "Project:   {} ({})",
            config.project.path.display(),
            config.project.backend
        );
        if let Some(global) = config.global_store() {
            println!("Global:    {} ({})", global.path.display(), global.backend);
        }
        println!("Dimension: {}", config.embedding.dimension);
        Ok(())
    }
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub async fn cmd_status(config: &TesseraConfig, out: Output) -> Result<(), TesseraError> {
    with_runtime(config, |rt| async move {
        let stats = rt.session.stats().await?;
        if out.json {
            return print_json(&serde_json::json!({
                "mode": config.mode.to_string(),
                "entities": stats.entity_count,
                "facts": stats.fact_count,
                "candidates": stats.candidate_count,
                "dimension": stats.dimension,
            }));
        }
        println!("Tessera Status");
        println!("==============");
        println!("Mode:       {}", config.mode);
        println!("Entities:   {}", stats.entity_count);
        println!("Facts:      {}", stats.fact_count);
        if config.mode == Mode::Dual {
            println!("Candidates: {}", stats.candidate_count);
        }
        println!("Dimension:  {}", stats.dimension);
        Ok(())
    })
    .await
}

// =============================================================================
// STORE COMMAND
// =============================================================================

pub async fn cmd_store(
    config: &TesseraConfig,
    request: StoreRequest,
    out: Output,
) -> Result<(), TesseraError> {
    with_runtime(config, |rt| async move {
        let stored = rt.session.store_fact(request).await?;
        if out.json {
            print_json(&serde_json::json!({ "success": true, "stored": stored }))
        } else {
            println!(
                "Stored: {} -[{}]-> {}",
                stored.subject, stored.predicate, stored.object
            );
            Ok(())
        }
    })
    .await
}

// =============================================================================
// SEARCH COMMAND
// =============================================================================

pub async fn cmd_search(
    config: &TesseraConfig,
    query: &str,
    limit: Option<usize>,
    out: Output,
) -> Result<(), TesseraError> {
    with_runtime(config, |rt| async move {
        let hits = rt.session.search(query, limit).await?;
        if out.json {
            return print_json(&serde_json::json!({ "hits": hits }));
        }
        if hits.is_empty() {
            println!("No facts found.");
        }
        for (i, hit) in hits.iter().enumerate() {
            println!("{}", format_hit(i + 1, hit, out.verbose));
        }
        Ok(())
    })
    .await
}

pub fn format_hit(n: usize, hit: &SearchHit, verbose: bool) -> String {
    let mut line = format!(
        "{n}. [{:.3}] {} -[{}]-> {}: {}",
        hit.score, hit.subject, hit.predicate, hit.object, hit.content
    );
    if verbose {
        if let Some(layer) = hit.layer {
            line.push_str(&format!("\n   layer: {layer}"));
        }
        if !hit.context.is_empty() {
            line.push_str(&format!("\n   context: {}", hit.context));
        }
        if !hit.source.is_empty() {
            line.push_str(&format!("\n   source: {}", hit.source));
        }
    }
    line
}

// =============================================================================
// GRAPH COMMAND
// =============================================================================

pub async fn cmd_graph(
    config: &TesseraConfig,
    entity: &str,
    depth: Option<usize>,
    out: Output,
) -> Result<(), TesseraError> {
    with_runtime(config, |rt| async move {
        let graph = rt.session.graph(entity, depth).await?;
        if out.json {
            return print_json(&serde_json::json!({
                "found": graph.is_some(),
                "graph": graph,
            }));
        }
        match graph {
            Some(g) => print!("{}", format_graph(&g)),
            None => println!("No entity matches '{entity}'."),
        }
        Ok(())
    })
    .await
}

pub fn format_graph(graph: &GraphResult) -> String {
    let mut text = format!("Entity: {}\n", graph.matched);
    if !graph.connected.is_empty() {
        let names: Vec<&str> = graph.connected.iter().map(String::as_str).collect();
        text.push_str(&format!("Connected: {}\n", names.join(", ")));
    }
    text.push_str(&format!("Facts ({}):\n", graph.facts.len()));
    for fact in &graph.facts {
        text.push_str(&format!(
            "  {} -[{}]-> {}\n",
            fact.subject, fact.predicate, fact.object
        ));
    }
    text
}

// =============================================================================
// LIST COMMAND
// =============================================================================

pub async fn cmd_list(
    config: &TesseraConfig,
    pattern: Option<&str>,
    out: Output,
) -> Result<(), TesseraError> {
    with_runtime(config, |rt| async move {
        let entities = rt.session.list(pattern).await?;
        if out.json {
            return print_json(&serde_json::json!({ "entities": entities }));
        }
        print!("{}", format_entities(&entities));
        Ok(())
    })
    .await
}

pub fn format_entities(entities: &[EntitySummary]) -> String {
    if entities.is_empty() {
        return "No entities.\n".to_string();
    }
    let width = entities.iter().map(|e| e.name.len()).max().unwrap_or(0);
    entities
        .iter()
        .map(|e| format!("{:<width$}  {}\n", e.name, e.fact_count))
        .collect()
}

// =============================================================================
// PROMOTE COMMAND
// =============================================================================

/// Interactive selector: lists candidates on `output` and reads one line of
/// `all`, `none` or one-based numbers from `input`. Invalid input re-prompts;
/// end of input selects nothing.
pub struct PromptSelector<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, candidates: &[CandidateFact]) -> std::io::Result<Selection> {
        writeln!(self.output, "Promotion candidates:")?;
        for (i, c) in candidates.iter().enumerate() {
            writeln!(
                self.output,
                "  {}. {} -[{}]-> {}",
                i + 1,
                c.subject,
                c.predicate,
                c.object
            )?;
            if c.content != format!("{} {} {}", c.subject, c.predicate, c.object) {
                writeln!(self.output, "     {}", c.content)?;
            }
        }
        loop {
            write!(self.output, "Promote [all / none / 1,3,...]: ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(Selection::None);
            }
            match Selection::parse(&line) {
                Ok(selection) => return Ok(selection),
                Err(e) => writeln!(self.output, "{e}")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> CandidateSelector for PromptSelector<R, W> {
    fn select(&mut self, candidates: &[CandidateFact]) -> Selection {
        self.prompt(candidates).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cannot read selection, promoting nothing");
            Selection::None
        })
    }
}

/// Fixed selection from command-line flags, or `None` when the operator
/// should be prompted.
pub fn selection_from_args(args: &PromoteArgs) -> Result<Option<Selection>, TesseraError> {
    if args.all {
        return Ok(Some(Selection::All));
    }
    if args.none {
        return Ok(Some(Selection::None));
    }
    args.select.as_deref().map(Selection::parse).transpose()
}

pub async fn cmd_promote(
    config: &TesseraConfig,
    args: &PromoteArgs,
    out: Output,
) -> Result<(), TesseraError> {
    if config.mode != Mode::Dual {
        return Err(TesseraError::Config(
            "promote needs dual mode (set mode = \"dual\" or pass --mode dual)".to_string(),
        ));
    }
    let fixed = selection_from_args(args)?;
    if fixed.is_none() && out.json {
        return Err(TesseraError::InvalidInput(
            "--json-mode cannot prompt; pass --all, --none or --select".to_string(),
        ));
    }

    with_runtime(config, |rt| async move {
        let Some(promoter) = rt.promoter.as_ref() else {
            return Err(TesseraError::Config("global layer is not open".to_string()));
        };
        let outcome = match fixed {
            Some(selection) => {
                let mut selector = move |_: &[CandidateFact]| selection.clone();
                promoter.run(&mut selector).await?
            }
            None => {
                let Some(candidates) = promoter.candidates().await? else {
                    return report_promotion(&PromotionOutcome::Unavailable, out);
                };
                if candidates.is_empty() {
                    return report_promotion(
                        &PromotionOutcome::Completed(PromotionReport::default()),
                        out,
                    );
                }
                // Reading stdin blocks; keep it off the async workers.
                let (candidates, selection) = tokio::task::spawn_blocking(move || {
                    let mut selector = PromptSelector::new(
                        std::io::BufReader::new(std::io::stdin()),
                        std::io::stdout(),
                    );
                    let selection = selector.select(&candidates);
                    (candidates, selection)
                })
                .await?;
                PromotionOutcome::Completed(promoter.promote(&candidates, selection).await)
            }
        };
        report_promotion(&outcome, out)
    })
    .await
}

fn report_promotion(outcome: &PromotionOutcome, out: Output) -> Result<(), TesseraError> {
    let report = match outcome {
        PromotionOutcome::Unavailable => {
            if out.json {
                return print_json(&serde_json::json!({ "available": false }));
            }
            println!("The project backend cannot list promotion candidates.");
            return Ok(());
        }
        PromotionOutcome::Completed(report) => report,
    };
    if out.json {
        return print_json(&serde_json::json!({ "available": true, "report": report }));
    }
    print!("{}", format_report(report));
    Ok(())
}

pub fn format_report(report: &PromotionReport) -> String {
    if report.offered == 0 {
        return "No promotion candidates.\n".to_string();
    }
    let mut text = format!(
        "Promoted {} of {} selected ({} offered).\n",
        report.promoted, report.selected, report.offered
    );
    for failure in &report.failures {
        let (s, p, o) = &failure.triple;
        text.push_str(&format!("  failed: {s} -[{p}]-> {o}: {}\n", failure.error));
    }
    for fact in &report.tag_errors {
        text.push_str(&format!(
            "  fact {} promoted but still tagged; it will be offered again\n",
            fact.0
        ));
    }
    text
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(
    config: &TesseraConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), TesseraError> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let runtime = open_runtime(config).await?;

    println!("Tessera Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:       {}", host);
    println!("  Port:       {}", port);
    println!("  Mode:       {}", config.mode);
    println!(
        "  Project:    {} ({})",
        config.project.path.display(),
        config.project.backend
    );
    if let Some(global) = config.global_store() {
        println!("  Global:     {} ({})", global.path.display(), global.backend);
    }
    println!("  Rate limit: {}/s", config.server.rate_limit);
    println!();
    println!("Endpoints:");
    println!("  GET  /health   - Health check");
    println!("  GET  /status   - Store counters");
    println!("  POST /store    - Record a fact");
    println!("  POST /search   - Semantic search");
    println!("  POST /graph    - Graph traversal");
    println!("  GET  /entities - List entities");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    let state = api::AppState::new(runtime.session, &config.mode.to_string());
    api::run_server(&addr, state, config.server.rate_limit).await
}
