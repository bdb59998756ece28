//! Subcommand implementations

use crate::OutputFormat;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use parish_config::AppConfig;
use parish_logging::PiiRedactor;
use parish_sync::{
    ConnectivityMonitor, DeadLetter, DrainSummary, EntityRecord, RestRemoteStore, SqliteKeyValueStore, SyncEngine,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An engine wired to the configured SQLite store and REST remote
pub struct Session {
    engine: Arc<SyncEngine>,
    remote: Arc<RestRemoteStore>,
    network: Arc<ConnectivityMonitor>,
    store: Arc<SqliteKeyValueStore>,
    config: AppConfig,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    online: bool,
    remote: String,
    database: String,
    pending: BTreeMap<String, usize>,
    oldest_pending: Option<DateTime<Utc>>,
    dead_letters: usize,
}

impl Session {
    pub async fn open(config: AppConfig) -> Result<Self> {
        let store = Arc::new(
            SqliteKeyValueStore::open(&config.storage)
                .await
                .with_context(|| format!("Failed to open local store at {}", config.storage.db_path.display()))?,
        );
        let remote = Arc::new(RestRemoteStore::new(config.remote.clone())?);
        let network = Arc::new(ConnectivityMonitor::new(false));

        let engine = SyncEngine::new(remote.clone(), network.clone(), store.clone(), config.sync.clone()).await?;

        Ok(Self {
            engine: Arc::new(engine),
            remote,
            network,
            store,
            config,
        })
    }

    pub async fn shutdown(self) {
        self.store.pool().close().await;
    }

    async fn probe(&self) -> bool {
        let online = self.remote.probe().await;
        self.network.set_online(online);
        online
    }

    pub async fn status(&self, format: OutputFormat) -> Result<()> {
        let online = self.probe().await;
        let pending = self.engine.pending_mutations(None).await;

        let mut per_collection = BTreeMap::new();
        for entry in &pending {
            *per_collection.entry(entry.collection.clone()).or_insert(0) += 1;
        }

        let report = StatusReport {
            online,
            remote: self.config.remote.base_url.clone(),
            database: self.config.storage.db_path.display().to_string(),
            pending: per_collection,
            oldest_pending: pending.first().map(|entry| entry.enqueued_at),
            dead_letters: self.engine.dead_letters().await.len(),
        };

        if format != OutputFormat::Text {
            return emit(format, &report);
        }

        let connectivity = if report.online {
            "online".bright_green()
        } else {
            "offline".bright_red()
        };
        println!("{} {} ({})", "Remote:".bold(), report.remote, connectivity);
        println!("{} {}", "Local store:".bold(), report.database);

        if report.pending.is_empty() {
            println!("{} {}", "Queue:".bold(), "empty".bright_green());
        } else {
            println!("{} {} pending", "Queue:".bold(), pending.len().to_string().bright_yellow());
            for (collection, count) in &report.pending {
                println!("  {:<16} {}", collection, count);
            }
            if let Some(oldest) = report.oldest_pending {
                println!("  oldest queued {}", format_time(oldest).dimmed());
            }
        }

        if report.dead_letters > 0 {
            println!(
                "{} {} (see `parish dead-letters`)",
                "Dead letters:".bold(),
                report.dead_letters.to_string().bright_red()
            );
        }

        Ok(())
    }

    pub async fn list(&self, collection: &str, raw: bool, format: OutputFormat) -> Result<()> {
        let records = self.engine.list(collection).await;
        let redactor = PiiRedactor::default();

        let shown: Vec<serde_json::Value> = records
            .iter()
            .map(|record| display_value(record, raw, &redactor))
            .collect::<Result<_>>()?;

        if format != OutputFormat::Text {
            return emit(format, &shown);
        }

        if records.is_empty() {
            println!("No cached {}", collection);
            return Ok(());
        }

        for (record, value) in records.iter().zip(&shown) {
            let id = if record.is_placeholder() {
                format!("{} {}", record.id, "(not synced)".yellow())
            } else {
                record.id.bright_white().to_string()
            };
            println!("{} {}", id, value);
        }

        Ok(())
    }

    pub async fn refresh(&self, collection: &str) -> Result<()> {
        if !self.probe().await {
            bail!("Remote store at {} is unreachable", self.config.remote.base_url);
        }

        let records = self.engine.refresh(collection).await?;
        println!(
            "{} {} {} record(s) cached",
            "✓".bright_green(),
            collection,
            records.len()
        );
        Ok(())
    }

    pub async fn drain(&self, format: OutputFormat) -> Result<()> {
        if !self.probe().await {
            println!(
                "{} remote store unreachable; {} mutation(s) stay queued",
                "offline:".bright_yellow(),
                self.engine.pending_mutations(None).await.len()
            );
            return Ok(());
        }

        let summary = self.engine.drain_queue().await;

        if format != OutputFormat::Text {
            return emit(format, &summary);
        }
        print_summary(&summary);
        Ok(())
    }

    pub async fn dead_letters(&self, format: OutputFormat) -> Result<()> {
        let letters = self.engine.dead_letters().await;

        if format != OutputFormat::Text {
            return emit(format, &letters);
        }

        if letters.is_empty() {
            println!("{}", "No dead letters".bright_green());
            return Ok(());
        }

        for letter in &letters {
            print_dead_letter(letter);
        }
        Ok(())
    }

    pub async fn requeue(&self, id: u64) -> Result<()> {
        let entry = self.engine.requeue_dead_letter(id).await?;
        println!(
            "{} requeued {} on {} (run `parish drain` to retry)",
            "✓".bright_green(),
            entry.operation(),
            entry.collection
        );
        Ok(())
    }

    pub async fn discard(&self, id: u64) -> Result<()> {
        let letter = self.engine.discard_dead_letter(id).await?;
        println!(
            "{} discarded {} on {}; run `parish refresh {}` to realign the cache",
            "✓".bright_green(),
            letter.mutation.operation(),
            letter.mutation.collection,
            letter.mutation.collection
        );
        Ok(())
    }

    pub async fn watch(&self) -> Result<()> {
        let listener = self.engine.spawn_reconnect_listener();

        if self.probe().await && !self.engine.pending_mutations(None).await.is_empty() {
            print_summary(&self.engine.drain_queue().await);
        }

        println!(
            "Watching {} every {}s (Ctrl-C to stop)",
            self.config.remote.base_url,
            self.config.sync.probe_interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.config.sync.probe_interval);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    self.probe().await;
                }
            }
        }

        listener.abort();
        Ok(())
    }
}

fn display_value(record: &EntityRecord, raw: bool, redactor: &PiiRedactor) -> Result<serde_json::Value> {
    let value = serde_json::to_value(record)?;
    Ok(if raw { value } else { redactor.redact_json(&value) })
}

fn emit<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Text => {}
    }
    Ok(())
}

fn print_summary(summary: &DrainSummary) {
    println!(
        "{} synced, {} failed, {} dead-lettered, {} still queued",
        summary.succeeded.to_string().bright_green(),
        summary.failed.to_string().bright_red(),
        summary.dead_lettered.to_string().red(),
        summary.still_pending.to_string().bright_yellow()
    );
}

fn print_dead_letter(letter: &DeadLetter) {
    let entry = &letter.mutation;
    println!(
        "{} {} {}{}",
        format!("#{}", entry.id).bright_white(),
        entry.collection,
        entry.operation(),
        entry
            .target_id()
            .map(|id| format!(" {}", id))
            .unwrap_or_default()
    );
    println!(
        "    {:?} after {} attempt(s) at {}",
        letter.reason,
        entry.attempts,
        format_time(letter.dead_lettered_at)
    );
    println!("    {}", letter.error.red());
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
