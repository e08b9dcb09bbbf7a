//! CLI entry point for a durable preset store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use preset_store::storage::{CacheEngine, NullSink, RedbAdapter, StorageItem, StoreConfig};
use preset_store_core::key::DEFAULT_OPTION_PREFIX;
use preset_store_core::schema::from_record;
use preset_store_core::{
    into_record, FnSchema, ManifestSchema, PresetsManifest, Record, PRESETS_KEY, SETTINGS_KEY,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Inspect and edit a preset store database.
#[derive(Parser, Debug)]
#[command(name = "preset-store", version, about)]
struct Cli {
    /// Database file; created if missing.
    #[arg(long, env = "PRESET_STORE_DB")]
    db: PathBuf,

    /// First segment of option keys.
    #[arg(long, env = "PRESET_STORE_OPTION_PREFIX", default_value = DEFAULT_OPTION_PREFIX)]
    option_prefix: String,

    /// Log as JSON lines instead of compact text.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every record as one JSON object.
    Export {
        /// Write to this file instead of stdout.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Replace every record with the contents of an exported JSON file.
    Import { file: PathBuf },

    /// Delete every record.
    Clear,

    /// Print the record stored under a physical key.
    Get { key: String },

    /// Store a JSON object under a physical key.
    Set { key: String, json: String },

    /// Delete the record under a physical key.
    Remove { key: String },

    /// Print the settings record, or replace it with `json`.
    Settings { json: Option<String> },

    /// Delete option records of presets not listed. Defaults to the presets
    /// in the manifest.
    Cleanup { presets: Vec<String> },

    /// Manage presets.
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Subcommand, Debug)]
enum PresetAction {
    /// Print the presets manifest.
    List,

    /// Create a preset from the active one and switch to it.
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Switch to a listed preset.
    Use { key: String },

    /// Delete a preset and its option records.
    Remove { key: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    install_tracing(cli.log_json);
    tokio::runtime::Runtime::new()?.block_on(run(cli))
}

fn install_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

async fn run(cli: Cli) -> Result<()> {
    let adapter = RedbAdapter::open(&cli.db)?;
    let config = StoreConfig {
        option_prefix: cli.option_prefix,
        ..StoreConfig::default()
    };
    let engine = CacheEngine::new(config, Arc::new(adapter), Arc::new(NullSink));
    engine.when_ready().await;

    let presets = Presets::open(&engine)?;
    engine.change_preset(&presets.manifest().active)?;

    let outcome = execute(&engine, &presets, cli.cmd).await;
    engine.save().await;
    outcome
}

async fn execute(engine: &CacheEngine, presets: &Presets, cmd: Command) -> Result<()> {
    match cmd {
        Command::Export { output } => {
            let text = engine.to_json_text();
            match output {
                Some(path) => std::fs::write(&path, text)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{text}"),
            }
        }
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let report = engine.from_json_text(&text).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Clear => engine.clear(),
        Command::Get { key } => {
            let record = engine
                .get(&key)
                .with_context(|| format!("no record under `{key}`"))?;
            println!("{}", pretty(&record));
        }
        Command::Set { key, json } => engine.set(&key, parse_record(&json)?)?,
        Command::Remove { key } => {
            if !engine.remove(&key)? {
                bail!("no record under `{key}`");
            }
        }
        Command::Settings { json } => {
            let item = settings(engine)?;
            match json {
                Some(json) => item.set(parse_record(&json)?),
                None => println!("{}", pretty(&item.get())),
            }
        }
        Command::Cleanup { presets: names } => {
            let names = if names.is_empty() {
                presets.manifest().keys().into_iter().map(str::to_string).collect()
            } else {
                names
            };
            let removed = engine.cleanup_presets(&names);
            println!("removed {removed} record(s)");
        }
        Command::Preset { action } => presets.apply(engine, action)?,
    }
    Ok(())
}

/// The presets manifest kept in step with the engine's active preset.
struct Presets {
    item: StorageItem,
}

impl Presets {
    fn open(engine: &CacheEngine) -> Result<Self> {
        Ok(Self {
            item: engine.storage_item(PRESETS_KEY, ManifestSchema)?,
        })
    }

    fn manifest(&self) -> PresetsManifest {
        // The schema already repaired the record, so this only fails on a
        // manifest written concurrently by someone else.
        from_record(&self.item.get()).unwrap_or_default()
    }

    fn apply(&self, engine: &CacheEngine, action: PresetAction) -> Result<()> {
        let mut manifest = self.manifest();
        match action {
            PresetAction::List => {
                println!("{}", pretty(&manifest.to_record()));
                return Ok(());
            }
            PresetAction::Add { name, description } => {
                if name.is_empty() {
                    bail!("preset name cannot be empty");
                }
                let key = manifest.add(name, description);
                self.item.set(manifest.to_record());
                engine.add_preset(&key)?;
                println!("{key}");
            }
            PresetAction::Use { key } => {
                if !manifest.contains(&key) {
                    bail!("preset `{key}` was not found");
                }
                manifest.active.clone_from(&key);
                self.item.set(manifest.to_record());
                engine.change_preset(&key)?;
            }
            PresetAction::Remove { key } => {
                let Some(active) = manifest.remove(&key) else {
                    bail!("preset `{key}` was not found");
                };
                self.item.set(manifest.to_record());
                engine.remove_preset(&key, Some(&active))?;
            }
        }
        Ok(())
    }
}

/// The settings record under [`SETTINGS_KEY`]: any object, empty by default.
fn settings(engine: &CacheEngine) -> Result<StorageItem> {
    Ok(engine.storage_item(SETTINGS_KEY, FnSchema::accept_all(Record::new()))?)
}

fn parse_record(json: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(json).context("record is not valid JSON")?;
    into_record(value).context("record must be a JSON object")
}

fn pretty(record: &Record) -> String {
    format!("{:#}", Value::Object(record.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_set_command() {
        let cli = Cli::parse_from([
            "preset-store",
            "--db",
            "store.redb",
            "set",
            "root.settings",
            r#"{"theme":"dark"}"#,
        ]);
        assert_eq!(cli.db, PathBuf::from("store.redb"));
        assert_eq!(cli.option_prefix, "compilerOption");
        match cli.cmd {
            Command::Set { key, json } => {
                assert_eq!(key, "root.settings");
                assert_eq!(json, r#"{"theme":"dark"}"#);
            }
            _ => panic!("expected set command"),
        }
    }

    #[test]
    fn parse_settings_command() {
        let cli = Cli::parse_from(["preset-store", "--db", "x", "settings"]);
        assert!(matches!(cli.cmd, Command::Settings { json: None }));

        let cli = Cli::parse_from(["preset-store", "--db", "x", "settings", "{}"]);
        match cli.cmd {
            Command::Settings { json } => assert_eq!(json.as_deref(), Some("{}")),
            _ => panic!("expected settings command"),
        }
    }

    #[test]
    fn records_must_be_json_objects() {
        assert_eq!(
            parse_record(r#"{"theme":"dark"}"#).unwrap(),
            into_record(serde_json::json!({ "theme": "dark" })).unwrap()
        );
        assert!(parse_record("[1, 2]").is_err());
        assert!(parse_record("{ nope").is_err());
    }

    #[tokio::test]
    async fn settings_command_writes_the_settings_record() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::new(
            StoreConfig::default(),
            Arc::new(RedbAdapter::open(dir.path().join("store.redb")).unwrap()),
            Arc::new(NullSink),
        );
        engine.when_ready().await;
        let presets = Presets::open(&engine).unwrap();
        assert!(settings(&engine).unwrap().get().is_empty());

        execute(
            &engine,
            &presets,
            Command::Settings {
                json: Some(r#"{"theme":"dark"}"#.to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            engine.get(SETTINGS_KEY).as_deref(),
            Some(&into_record(serde_json::json!({ "theme": "dark" })).unwrap())
        );
    }

    #[test]
    fn parse_cleanup_command() {
        let cli = Cli::parse_from(["preset-store", "--db", "x", "cleanup", "default", "p2"]);
        match cli.cmd {
            Command::Cleanup { presets } => assert_eq!(presets, vec!["default", "p2"]),
            _ => panic!("expected cleanup command"),
        }
    }

    #[test]
    fn parse_preset_add_command() {
        let cli = Cli::parse_from([
            "preset-store",
            "--db",
            "x",
            "preset",
            "add",
            "Strict",
            "--description",
            "all checks on",
        ]);
        match cli.cmd {
            Command::Preset {
                action: PresetAction::Add { name, description },
            } => {
                assert_eq!(name, "Strict");
                assert_eq!(description, "all checks on");
            }
            _ => panic!("expected preset add command"),
        }
    }

    #[tokio::test]
    async fn preset_actions_keep_manifest_and_engine_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::new(
            StoreConfig::default(),
            Arc::new(RedbAdapter::open(dir.path().join("store.redb")).unwrap()),
            Arc::new(NullSink),
        );
        engine.when_ready().await;
        let presets = Presets::open(&engine).unwrap();
        engine
            .set(
                "compilerOption.default.strict",
                into_record(serde_json::json!({ "value": true })).unwrap(),
            )
            .unwrap();

        presets
            .apply(
                &engine,
                PresetAction::Add {
                    name: "Copy".to_string(),
                    description: String::new(),
                },
            )
            .unwrap();
        let manifest = presets.manifest();
        assert_eq!(manifest.items.len(), 2);
        assert_eq!(engine.preset(), manifest.active);
        assert!(engine
            .get(&format!("compilerOption.{}.strict", manifest.active))
            .is_some());

        let copy = manifest.active.clone();
        presets
            .apply(&engine, PresetAction::Remove { key: copy.clone() })
            .unwrap();
        assert_eq!(engine.preset(), "default");
        assert_eq!(presets.manifest().keys(), vec!["default"]);
        assert!(engine
            .get(&format!("compilerOption.{copy}.strict"))
            .is_none());

        assert!(presets
            .apply(&engine, PresetAction::Use { key: copy })
            .is_err());
    }
}
