use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use localnote::autosave;
use localnote::config::AppConfig;
use localnote::reorder::{DropTarget, MoveEngine, MoveOutcome};
use localnote::store::{SqliteStore, Store};
use localnote::transfer;
use localnote::tree::{TreeSnapshot, build_tree, flatten_tree};
use localnote::types::{ItemRef, RetentionPolicy};

#[derive(Parser)]
#[command(name = "localnote")]
#[command(about = "A local-first note-taking core", long_about = None)]
struct Cli {
    /// Data directory for the database
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Folder,
    Note,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Create a folder or note
    New {
        kind: KindArg,

        /// Folder name or note title
        name: String,

        /// Parent folder id (root level if omitted)
        #[arg(long)]
        parent: Option<i64>,
    },

    /// Print the whole tree
    List,

    /// Rename a folder or retitle a note
    Rename { kind: KindArg, id: i64, name: String },

    /// Delete a folder (with its subtree) or a note (with its history)
    Delete { kind: KindArg, id: i64 },

    /// Move a folder or note, as a drag gesture would
    Move {
        kind: KindArg,
        id: i64,

        /// Drop into this folder, appended at the end
        #[arg(long, conflicts_with_all = ["root", "near"])]
        into: Option<i64>,

        /// Drop onto the root zone
        #[arg(long, conflicts_with = "near")]
        root: bool,

        /// Drop next to this sibling, e.g. "note:3" or "folder:1"
        #[arg(long)]
        near: Option<String>,
    },

    /// Replace a note's content (a committed save with a history snapshot)
    Edit { id: i64, content: String },

    /// Show a note's version history, newest first
    History { id: i64 },

    /// Restore a history entry's content as the current version
    Restore { entry_id: i64 },

    /// Show or change the history retention policy
    Retention {
        #[command(subcommand)]
        command: RetentionCommands,
    },

    /// Write a full backup document as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Replace the entire database with a backup document
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum RetentionCommands {
    Show,
    Unlimited,
    Count { value: u32 },
    Days { value: u32 },
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    let db_path = config.db_path();
    if !db_path.exists() {
        bail!("No database at {}. Run 'localnote init' first.", db_path.display());
    }

    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    Ok(store)
}

fn parse_item(kind: KindArg, id: i64) -> ItemRef {
    match kind {
        KindArg::Folder => ItemRef::folder(id),
        KindArg::Note => ItemRef::note(id),
    }
}

fn parse_near(raw: &str) -> anyhow::Result<ItemRef> {
    let Some((kind, id)) = raw.split_once(':') else {
        bail!("Expected kind:id, e.g. note:3 or folder:1");
    };
    let id: i64 = id.parse()?;
    match kind {
        "folder" => Ok(ItemRef::folder(id)),
        "note" => Ok(ItemRef::note(id)),
        other => bail!("Unknown kind '{other}', expected 'folder' or 'note'"),
    }
}

fn print_tree(store: &SqliteStore) -> anyhow::Result<()> {
    let snapshot = TreeSnapshot::load(store)?;
    let expanded: HashSet<i64> = snapshot.folders().iter().map(|f| f.id).collect();
    let tree = build_tree(&snapshot, &expanded);

    if tree.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    for node in flatten_tree(&tree) {
        let indent = "  ".repeat(node.depth);
        let item = node.item();
        if node.is_folder() {
            println!("{indent}{}/ [folder {}]", node.name(), item.id);
        } else {
            println!("{indent}{} [note {}]", node.name(), item.id);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("localnote=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = AppConfig {
        data_dir: cli.data_dir,
        ..AppConfig::default()
    };

    match cli.command {
        Commands::Init => {
            fs::create_dir_all(&config.data_dir)?;
            let store = SqliteStore::new(config.db_path())?;
            store.initialize()?;
            println!("Initialized database at {}", config.db_path().display());
        }

        Commands::New { kind, name, parent } => {
            let store = open_store(&config)?;
            match kind {
                KindArg::Folder => {
                    let folder = store.create_folder(parent, &name)?;
                    println!("Created folder {} ({})", folder.name, folder.id);
                }
                KindArg::Note => {
                    let note = store.create_note(parent, &name)?;
                    println!("Created note {} ({})", note.title, note.id);
                }
            }
        }

        Commands::List => {
            let store = open_store(&config)?;
            print_tree(&store)?;
        }

        Commands::Rename { kind, id, name } => {
            let store = open_store(&config)?;
            match kind {
                KindArg::Folder => store.rename_folder(id, &name)?,
                KindArg::Note => store.rename_note(id, &name)?,
            }
            println!("Renamed");
        }

        Commands::Delete { kind, id } => {
            let store = open_store(&config)?;
            let deleted = match kind {
                KindArg::Folder => store.delete_folder(id)?,
                KindArg::Note => store.delete_note(id)?,
            };
            if !deleted {
                bail!("Nothing with id {id}");
            }
            println!("Deleted");
        }

        Commands::Move {
            kind,
            id,
            into,
            root,
            near,
        } => {
            let store = open_store(&config)?;
            let target = if let Some(folder_id) = into {
                DropTarget::Into(folder_id)
            } else if root {
                DropTarget::Root
            } else if let Some(raw) = near {
                DropTarget::Near(parse_near(&raw)?)
            } else {
                bail!("Choose a target: --into <FOLDER>, --root, or --near <KIND:ID>");
            };

            let engine = MoveEngine::new(&store);
            match engine.move_item(parse_item(kind, id), target)? {
                MoveOutcome::Moved => println!("Moved"),
                MoveOutcome::Ignored => println!("Ignored (would not change the tree)"),
            }
        }

        Commands::Edit { id, content } => {
            let store = open_store(&config)?;
            let entry = autosave::save_content(&store, id, &content)?;
            println!("Saved (history entry {})", entry.id);
        }

        Commands::History { id } => {
            let store = open_store(&config)?;
            let history = store.list_history(id)?;
            if history.is_empty() {
                println!("No history yet.");
            }
            for entry in history {
                let preview: String = entry.content.chars().take(60).collect();
                println!("{}  {}  {}", entry.id, entry.timestamp.to_rfc3339(), preview);
            }
        }

        Commands::Restore { entry_id } => {
            let store = open_store(&config)?;
            let entry = autosave::restore_version(&store, entry_id)?;
            println!("Restored note {} (new history entry {})", entry.note_id, entry.id);
        }

        Commands::Retention { command } => {
            let store = open_store(&config)?;
            match command {
                RetentionCommands::Show => {
                    println!("{:?}", store.retention_policy()?);
                }
                RetentionCommands::Unlimited => {
                    store.set_retention_policy(RetentionPolicy::Unlimited)?;
                    println!("Retention set to unlimited");
                }
                RetentionCommands::Count { value } => {
                    store.set_retention_policy(RetentionPolicy::Count { value })?;
                    println!("Keeping the {value} most recent versions per note");
                }
                RetentionCommands::Days { value } => {
                    store.set_retention_policy(RetentionPolicy::Days { value })?;
                    println!("Keeping versions from the last {value} days");
                }
            }
        }

        Commands::Export { out } => {
            let store = open_store(&config)?;
            let document = transfer::export_string(&store)?;
            match out {
                Some(path) => {
                    fs::write(&path, &document)?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{document}"),
            }
        }

        Commands::Import { file } => {
            let store = open_store(&config)?;
            let raw = fs::read_to_string(&file)?;
            transfer::import_str(&store, &raw)?;
            println!("Imported {}", file.display());
        }
    }

    Ok(())
}
