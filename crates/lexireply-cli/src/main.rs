mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use etcetera::{choose_app_strategy, AppStrategy, AppStrategyArgs};
use lexireply::auto_reply::{
    legacy, template, CooldownPolicy, IncomingMessage, JsonFileBackend, LexiconStore, NoMatch,
    ReplyConfig, ReplyEngine, ResolvedSegment, Rule, RuleFilter, RuleId, SessionIdentity,
    SystemClock,
};
use lexireply::logging::{init_logging, LoggingOptions};
use tracing::{debug, warn};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = LoggingOptions {
        level: if cli.verbose { "lexireply=debug" } else { "warn" }.to_string(),
        json: cli.json_logs,
    };
    if let Err(e) = init_logging(&options) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn app_strategy() -> Result<impl AppStrategy> {
    choose_app_strategy(AppStrategyArgs {
        top_level_domain: "org".to_string(),
        author: "lexireply".to_string(),
        app_name: "lexireply".to_string(),
    })
    .context("failed to locate the home directory")
}

/// 配置文件：命令行参数 > 平台配置目录
fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(app_strategy()?.config_dir().join("config.json")),
    }
}

/// 词库文件：命令行参数 > 配置 > 平台数据目录
fn lexicon_path(cli: &Cli, config: &ReplyConfig) -> Result<PathBuf> {
    if let Some(path) = cli.lexicon.as_ref().or(config.lexicon_path.as_ref()) {
        return Ok(path.clone());
    }
    Ok(app_strategy()?.data_dir().join("lexicon.json"))
}

async fn open_store(config: &ReplyConfig, path: &Path) -> Result<LexiconStore> {
    let store = LexiconStore::new(
        Arc::new(JsonFileBackend::new(path)),
        config.store_options(),
    );
    store
        .load()
        .await
        .with_context(|| format!("failed to load lexicon {}", path.display()))?;
    debug!("Opened lexicon {} with {} rules", path.display(), store.len());
    Ok(store)
}

async fn run(cli: Cli) -> Result<()> {
    let config = ReplyConfig::load(&config_path(&cli)?);
    let path = lexicon_path(&cli, &config)?;
    let store = open_store(&config, &path).await?;

    match cli.command {
        Commands::Check {
            message,
            user,
            group,
            name,
            seed,
            json,
        } => {
            let session = match group {
                Some(group) => SessionIdentity::group(group, user),
                None => SessionIdentity::direct(user),
            };
            let mut incoming = IncomingMessage::new(session, message).with_bot_id("lexireply-cli");
            if let Some(name) = name {
                incoming = incoming.with_sender_name(name);
            }
            if let Some(seed) = seed {
                incoming = incoming.with_seed(seed);
            }
            let engine = ReplyEngine::with_store(config, Arc::new(store), Arc::new(SystemClock));
            cmd_check(&engine, &incoming, json)
        }
        Commands::List {
            keyword,
            enabled,
            disabled,
            json,
        } => {
            let filter = RuleFilter {
                keyword,
                enabled: match (enabled, disabled) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                match_mode: None,
            };
            cmd_list(&store, &filter, json)
        }
        Commands::Add {
            keywords,
            responses,
            id,
            mode,
            cooldown,
            scope,
            until_midnight,
            admin_only,
            disabled,
        } => {
            let mut templates = Vec::with_capacity(responses.len());
            for response in &responses {
                let segments = template::parse_inline(response);
                if segments.is_empty() {
                    bail!("response {:?} is empty", response);
                }
                templates.push(segments);
            }
            let mut templates = templates.into_iter();
            let Some(primary) = templates.next() else {
                bail!("at least one response is required");
            };

            let id = id.map(RuleId).unwrap_or_else(|| store.next_id());
            let mut rule = Rule::new(id.get(), keywords, primary)
                .with_mode(mode.map(Into::into).unwrap_or(config.default_match_mode))
                .with_cooldown(cooldown.unwrap_or(config.default_cooldown_seconds))
                .with_scope(scope.map(Into::into).unwrap_or(config.default_scope))
                .with_admin_only(admin_only)
                .with_enabled(!disabled);
            if until_midnight {
                rule = rule.with_cooldown_until_midnight();
            }
            rule.alternates = templates.collect();

            store.add(rule)?;
            store.persist().await?;
            println!("Added rule {}", id);
            Ok(())
        }
        Commands::Remove { id } => {
            let rule = store.remove(RuleId(id))?;
            store.persist().await?;
            println!("Removed rule {} ({})", rule.id, keywords_label(&rule));
            Ok(())
        }
        Commands::Enable { id } => {
            store.set_enabled(RuleId(id), true)?;
            store.persist().await?;
            println!("Enabled rule {}", RuleId(id));
            Ok(())
        }
        Commands::Disable { id } => {
            store.set_enabled(RuleId(id), false)?;
            store.persist().await?;
            println!("Disabled rule {}", RuleId(id));
            Ok(())
        }
        Commands::AddResponse { id, response } => {
            let rule = store.add_response(RuleId(id), template::parse_inline(&response))?;
            store.persist().await?;
            println!("Rule {} now has {} responses", rule.id, rule.template_count());
            Ok(())
        }
        Commands::RemoveResponse { id, index } => {
            let rule = store.remove_response(RuleId(id), index)?;
            store.persist().await?;
            println!("Rule {} now has {} responses", rule.id, rule.template_count());
            Ok(())
        }
        Commands::ImportLegacy { file, replace } => {
            if replace {
                store.clear();
            }
            let import = legacy::import_file(&file, store.next_id().get())?;
            for skipped in &import.skipped {
                warn!("Skipped {:?}: {:?}", skipped.keyword, skipped.reason);
            }
            let imported = import.rules.len();
            for rule in import.rules {
                store.add(rule)?;
            }
            store.persist().await?;
            println!(
                "Imported {} rules from {} ({} skipped)",
                imported,
                file.display(),
                import.skipped.len()
            );
            Ok(())
        }
    }
}

fn cmd_check(engine: &ReplyEngine, message: &IncomingMessage, json: bool) -> Result<()> {
    match engine.handle(message) {
        Ok(reply) => {
            for diagnostic in &reply.diagnostics {
                eprintln!("warning: {:?}", diagnostic);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                println!("{} -> {}", reply.rule_id, render_segments(&reply.segments));
            }
        }
        Err(NoMatch::Suppressed { rule_id, remaining }) => {
            println!(
                "(rule {} is cooling down, {}s left)",
                rule_id,
                remaining.as_secs()
            );
        }
        Err(reason) => println!("(no reply: {})", reason),
    }
    Ok(())
}

fn cmd_list(store: &LexiconStore, filter: &RuleFilter, json: bool) -> Result<()> {
    let rules = store.list(Some(filter));
    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }
    if rules.is_empty() {
        println!("(no rules)");
        return Ok(());
    }
    for rule in &rules {
        let state = if rule.enabled { "" } else { " [disabled]" };
        let admin = if rule.admin_only { " [admin]" } else { "" };
        let cooldown = match rule.cooldown_policy {
            _ if !rule.has_cooldown() => String::new(),
            CooldownPolicy::UntilMidnight => format!(" cooldown=midnight/{:?}", rule.scope),
            CooldownPolicy::Fixed => {
                format!(" cooldown={}s/{:?}", rule.cooldown_seconds, rule.scope)
            }
        };
        println!(
            "{} {} ({}){}{}{}",
            rule.id,
            keywords_label(rule),
            rule.match_mode.as_str(),
            cooldown,
            admin,
            state
        );
        for (index, response) in rule.templates().enumerate() {
            println!("    {}: {}", index, template::render_inline(response));
        }
    }
    Ok(())
}

fn keywords_label(rule: &Rule) -> String {
    rule.keywords
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn render_segments(segments: &[ResolvedSegment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            ResolvedSegment::Text(text) => text.clone(),
            ResolvedSegment::Image(url) => format!("[image:{}]", url),
            ResolvedSegment::Mention(target) => format!("[@{}]", target),
            ResolvedSegment::Face(id) => format!("[face:{}]", id),
            ResolvedSegment::Quote(id) => format!("[quote:{}]", id),
            ResolvedSegment::Voice(url) => format!("[voice:{}]", url),
            ResolvedSegment::Poke(target) => format!("[poke:{}]", target),
        })
        .collect()
}
