//! CLI command handlers.

use clap::Subcommand;
use std::io::Read;
use tacit::hooks::{HookHandler, PreCompactHandler, SessionEndHandler, UserPromptHandler};
use tacit::llm::{AnthropicGateway, LlmGateway, MIGRATION_CONFIDENCE_FLOOR};
use tacit::models::{BodyShape, KeyPointBody};
use tacit::observability::DiagnosticSink;
use tacit::storage::{PlaybookLock, PlaybookStore};
use tacit::templates::TemplateKind;
use tacit::TacitConfig;

/// Host hook events.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum HookEvent {
    /// A user prompt is about to be submitted.
    UserPromptSubmit,
    /// The session is ending.
    SessionEnd,
    /// The host is about to compact its context window.
    PreCompact,
}

impl HookEvent {
    /// Stable name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserPromptSubmit => "user-prompt-submit",
            Self::SessionEnd => "session-end",
            Self::PreCompact => "pre-compact",
        }
    }
}

/// Hook command: read stdin, dispatch, print the response.
///
/// Hooks never fail loudly: any error becomes a no-op `{}` response plus a
/// structured diagnostic record, and the exit code stays zero.
pub fn cmd_hook(
    event: &HookEvent,
    config: &TacitConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = read_hook_input()?;
    let gateway = build_gateway(config);

    metrics::counter!("tacit_hook_invocations_total", "hook" => event.as_str()).increment(1);

    let response = match event {
        HookEvent::UserPromptSubmit => {
            let mut handler = UserPromptHandler::new(config.clone());
            if let Some(gateway) = gateway {
                handler = handler.with_gateway(gateway);
            }
            handler.handle(&input)
        },
        HookEvent::SessionEnd => {
            let mut handler = SessionEndHandler::new(config.clone());
            if let Some(gateway) = gateway {
                handler = handler.with_gateway(gateway);
            }
            handler.handle(&input)
        },
        HookEvent::PreCompact => {
            let mut handler = PreCompactHandler::new(config.clone());
            if let Some(gateway) = gateway {
                handler = handler.with_gateway(gateway);
            }
            handler.handle(&input)
        },
    };

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(hook = event.as_str(), error = %err, "hook failed");
            metrics::counter!("tacit_hook_failures_total", "hook" => event.as_str()).increment(1);
            DiagnosticSink::new(&config.diagnostic_dir, config.diagnostic_mode)
                .save_error(event.as_str(), &err);
            "{}".to_string()
        },
    };

    println!("{response}");
    Ok(())
}

/// Status command: summarize the playbook.
pub fn cmd_status(config: &TacitConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = PlaybookStore::from_config(config);
    let playbook = store.load()?;

    let stable = playbook.stable().count();
    let pending = playbook.pending().count();

    println!("playbook: {}", store.path().display());
    println!("version:  {}", playbook.version);
    if let Some(updated) = playbook.last_updated {
        println!("updated:  {}", updated.to_rfc3339());
    }
    println!("key points: {stable} stable, {pending} pending (cap {})", config.max_kpts);

    let tags = playbook.all_tags();
    if !tags.is_empty() {
        let tag_list: Vec<String> = tags.into_iter().collect();
        println!("tags: {}", tag_list.join(", "));
    }

    let backups = store.backups();
    if !backups.is_empty() {
        println!("backups: {}", backups.len());
    }
    Ok(())
}

/// Init command: write the sample config and template overrides.
pub fn cmd_init(config: &TacitConfig, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.template_dir)?;

    for kind in TemplateKind::all() {
        let path = config.template_dir.join(kind.file_name());
        if path.exists() && !force {
            println!("kept      {}", path.display());
            continue;
        }
        std::fs::write(&path, kind.default_text())?;
        println!("wrote     {}", path.display());
    }

    let config_path = config.project_dir.join(".claude").join("tacit.toml");
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if config_path.exists() && !force {
        println!("kept      {}", config_path.display());
    } else {
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("wrote     {}", config_path.display());
    }
    Ok(())
}

/// Migrate command: up-convert legacy statements to when/do via the LLM.
pub fn cmd_migrate(config: &TacitConfig, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let Some(gateway) = build_gateway(config) else {
        return Err("no LLM API key configured; set TACIT_LLM_API_KEY or ANTHROPIC_API_KEY".into());
    };

    let store = PlaybookStore::from_config(config).with_canonical_shape(BodyShape::WhenDo);
    let _lock = PlaybookLock::exclusive(store.path())?;
    let mut playbook = store.load()?;

    let mut migrated = 0usize;
    let mut skipped = 0usize;

    for kp in &mut playbook.key_points {
        let KeyPointBody::Legacy { .. } = kp.body else {
            continue;
        };
        match gateway.migrate_to_when_do(kp, config.llm.timeout) {
            Ok(decision) if decision.confidence >= MIGRATION_CONFIDENCE_FLOOR => {
                println!(
                    "{}: when \"{}\" do \"{}\" ({:.2})",
                    kp.name, decision.when, decision.action, decision.confidence
                );
                kp.body = KeyPointBody::structured(decision.when, decision.action);
                migrated += 1;
            },
            Ok(decision) => {
                println!(
                    "{}: kept legacy shape (confidence {:.2})",
                    kp.name, decision.confidence
                );
                skipped += 1;
            },
            Err(e) => {
                tracing::warn!(name = %kp.name, error = %e, "migration call failed");
                skipped += 1;
            },
        }
    }

    if dry_run {
        println!("dry run: {migrated} would migrate, {skipped} kept");
        return Ok(());
    }
    if migrated > 0 {
        store.store(&mut playbook)?;
    }
    println!("{migrated} migrated, {skipped} kept");
    Ok(())
}

/// Builds the LLM gateway when an API key is configured.
fn build_gateway(config: &TacitConfig) -> Option<Box<dyn LlmGateway>> {
    AnthropicGateway::from_config(config).map(|gateway| Box::new(gateway) as Box<dyn LlmGateway>)
}

/// Reads hook input from stdin.
fn read_hook_input() -> Result<String, Box<dyn std::error::Error>> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    if input.trim().is_empty() {
        Ok("{}".to_string())
    } else {
        Ok(input)
    }
}

const SAMPLE_CONFIG: &str = r#"# Tacit configuration. Everything here is optional.

# playbook_path = ".claude/playbook.json"
# selection_limit = 6
# max_kpts = 250
# merge_threshold = 0.8
# prune_threshold = -5
# default_temperature = 0.5
# backup_keep = 3
# adaptive_temperature = true
# canonical_shape = "legacy"   # or "when_do"
# update_on_exit = false
# update_on_clear = false
# diagnostic_mode = false

[llm]
# api_key = ""                 # falls back to ANTHROPIC_API_KEY
# model = "claude-3-5-haiku-20241022"
# timeout_ms = 30000
# retries = 2

[logging]
# format = "json"              # or "pretty"
# level = "info"
"#;
