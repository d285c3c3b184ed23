//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::analysis::{AnalysisAggregator, DocumentInput};
use crate::catalog::RequirementCatalog;
use crate::config::{load_settings, Settings};
use crate::extract::{ContentExtractor, TesseractOcr};
use crate::ingest::Ingestor;
use crate::llm::HttpLlmClient;
use crate::models::Document;
use crate::reconcile::LoanSession;
use crate::store::{LoanStore, SqliteStore};
use crate::sync::{DriveMirror, MirrorStore, RestoreOutcome, SyncCoordinator};

#[derive(Parser)]
#[command(name = "loanfile")]
#[command(about = "Loan-file document reconciliation and classification")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Ingest documents into a loan file
    Ingest {
        /// Loan ID
        loan_id: String,
        /// Files to ingest
        paths: Vec<PathBuf>,
        /// Treat inputs as RFC822 emails and ingest their attachments
        #[arg(long)]
        mailbox: bool,
    },

    /// List documents in a loan file
    Ls {
        /// Loan ID
        loan_id: String,
        /// Include soft-deleted documents
        #[arg(short, long)]
        all: bool,
    },

    /// Show checklist status for a loan
    Status {
        /// Loan ID
        loan_id: String,
    },

    /// Assign a document to a requirement slot
    Assign {
        loan_id: String,
        requirement: String,
        document_id: String,
        /// Remove the assignment instead
        #[arg(long)]
        undo: bool,
    },

    /// Mark a requirement complete (or clear the mark with --undo)
    Complete {
        loan_id: String,
        requirement: String,
        #[arg(long)]
        undo: bool,
    },

    /// Manage loan-scoped custom requirements
    Requirement {
        #[command(subcommand)]
        command: RequirementCommands,
    },

    /// Analyze loan documents with the local LLM
    Analyze {
        /// Loan ID
        loan_id: String,
        /// Seed empty requirement slots from classified documents
        #[arg(long)]
        seed: bool,
    },

    /// Synchronize a loan with the remote mirror
    Sync {
        /// Loan ID
        loan_id: String,
        /// Also import untracked remote files
        #[arg(long)]
        import: bool,
        /// Run a duplicate sweep before pushing
        #[arg(long)]
        dedup: bool,
    },

    /// Soft-delete a document (propagates to the mirror)
    Delete {
        loan_id: String,
        document_id: String,
    },

    /// Restore a soft-deleted document
    Restore {
        loan_id: String,
        document_id: String,
    },

    /// Permanently remove soft-deleted documents and their bytes
    Purge {
        loan_id: String,
        /// Confirm the irreversible removal
        #[arg(long)]
        confirm: bool,
    },

    /// Show the requirement catalog
    Catalog {
        /// Funder ID (defaults to the configured funder)
        funder: Option<String>,
    },

    /// Check that external extraction tools are installed
    Check,
}

#[derive(Subcommand)]
enum RequirementCommands {
    /// Add a custom requirement to a loan
    Add { loan_id: String, name: String },
    /// Remove a custom requirement from a loan
    Remove { loan_id: String, name: String },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.data_dir.as_deref());

    match cli.command {
        Commands::Init => cmd_init(&settings),
        Commands::Ingest {
            loan_id,
            paths,
            mailbox,
        } => cmd_ingest(&settings, &loan_id, &paths, mailbox),
        Commands::Ls { loan_id, all } => cmd_ls(&settings, &loan_id, all),
        Commands::Status { loan_id } => cmd_status(&settings, &loan_id),
        Commands::Assign {
            loan_id,
            requirement,
            document_id,
            undo,
        } => cmd_assign(&settings, &loan_id, &requirement, &document_id, undo),
        Commands::Complete {
            loan_id,
            requirement,
            undo,
        } => cmd_complete(&settings, &loan_id, &requirement, undo),
        Commands::Requirement { command } => match command {
            RequirementCommands::Add { loan_id, name } => {
                cmd_requirement_add(&settings, &loan_id, &name)
            }
            RequirementCommands::Remove { loan_id, name } => {
                cmd_requirement_remove(&settings, &loan_id, &name)
            }
        },
        Commands::Analyze { loan_id, seed } => cmd_analyze(&settings, &loan_id, seed).await,
        Commands::Sync {
            loan_id,
            import,
            dedup,
        } => cmd_sync(&settings, &loan_id, import, dedup).await,
        Commands::Delete {
            loan_id,
            document_id,
        } => cmd_delete(&settings, &loan_id, &document_id).await,
        Commands::Restore {
            loan_id,
            document_id,
        } => cmd_restore(&settings, &loan_id, &document_id).await,
        Commands::Purge { loan_id, confirm } => cmd_purge(&settings, &loan_id, confirm).await,
        Commands::Catalog { funder } => cmd_catalog(&settings, funder.as_deref()),
        Commands::Check => cmd_check().await,
    }
}

fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn LoanStore>> {
    if !settings.database_exists() {
        anyhow::bail!("not initialized; run 'loanfile init' first");
    }
    let store = SqliteStore::open(&settings.database_path())?;
    Ok(Arc::new(store))
}

fn open_session(settings: &Settings, loan_id: &str) -> anyhow::Result<LoanSession> {
    let store = open_store(settings)?;
    let catalog = RequirementCatalog::builtin()?;
    Ok(LoanSession::open(
        loan_id,
        catalog.requirement_set(&settings.funder_id),
        store,
    )?)
}

fn mirror_from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn MirrorStore>> {
    let Some(token) = settings.mirror.access_token() else {
        anyhow::bail!(
            "no mirror credentials; set {} in the environment",
            settings.mirror.access_token_env
        );
    };
    if settings.mirror.folder_id.is_empty() {
        anyhow::bail!("no mirror folder configured; set [mirror] folder_id in the config");
    }
    let mirror = DriveMirror::new(
        &token,
        Duration::from_secs(settings.mirror.timeout_secs),
    )?;
    Ok(Arc::new(mirror))
}

fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let _store = SqliteStore::open(&settings.database_path())?;

    let catalog = RequirementCatalog::builtin()?;
    println!(
        "{} Initialized loanfile in {} ({} base requirements, funders: {})",
        style("✓").green(),
        settings.data_dir.display(),
        catalog.base_len(),
        catalog.known_funders().join(", ")
    );
    Ok(())
}

fn cmd_ingest(
    settings: &Settings,
    loan_id: &str,
    paths: &[PathBuf],
    mailbox: bool,
) -> anyhow::Result<()> {
    if paths.is_empty() {
        anyhow::bail!("no input files given");
    }
    let store = open_store(settings)?;
    let ingestor = Ingestor::new(store, settings.documents_dir.clone());

    for path in paths {
        if mailbox {
            let docs = ingestor.ingest_mailbox(loan_id, path)?;
            for doc in &docs {
                println!(
                    "  {} {} [{}] from {}",
                    style("✓").green(),
                    doc.name,
                    doc.category,
                    path.display()
                );
            }
            if docs.is_empty() {
                println!(
                    "  {} no attachments in {}",
                    style("!").yellow(),
                    path.display()
                );
            }
        } else {
            let doc = ingestor.ingest_file(loan_id, path)?;
            println!(
                "  {} {} [{}] ({})",
                style("✓").green(),
                doc.name,
                doc.category,
                format_bytes(doc.size_bytes)
            );
        }
    }
    Ok(())
}

fn cmd_ls(settings: &Settings, loan_id: &str, all: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let documents = store.list_documents(loan_id)?;

    let visible: Vec<&Document> = documents
        .iter()
        .filter(|d| all || d.is_live())
        .collect();
    if visible.is_empty() {
        println!("{} No documents for loan {}", style("!").yellow(), loan_id);
        return Ok(());
    }

    println!("\n{}", style(format!("Documents for {}", loan_id)).bold());
    println!("{}", "-".repeat(80));
    for doc in visible {
        let mut flags = Vec::new();
        if doc.deleted {
            flags.push("deleted");
        }
        if doc.is_mirrored() {
            flags.push("mirrored");
        }
        println!(
            "{:<36} {:<28} {:>10} {}",
            doc.id,
            truncate(&doc.name, 27),
            format_bytes(doc.size_bytes),
            flags.join(",")
        );
    }
    Ok(())
}

fn cmd_status(settings: &Settings, loan_id: &str) -> anyhow::Result<()> {
    let session = open_session(settings, loan_id)?;
    let summary = session.completion_summary()?;
    let missing = session.missing_requirements()?;

    println!("\n{}", style(format!("Loan {} checklist", loan_id)).bold());
    println!("{}", "-".repeat(40));
    println!(
        "{:<20} {}/{} ({}%)",
        "Satisfied:", summary.total_satisfied, summary.total_required, summary.percentage
    );

    if missing.is_empty() {
        println!("{} All required slots satisfied", style("✓").green());
    } else {
        println!("\n{}", style("Missing:").yellow());
        for def in missing {
            println!("  - {} [{}]", def.display_name, def.category.as_str());
        }
    }
    Ok(())
}

fn cmd_assign(
    settings: &Settings,
    loan_id: &str,
    requirement: &str,
    document_id: &str,
    undo: bool,
) -> anyhow::Result<()> {
    let mut session = open_session(settings, loan_id)?;
    if undo {
        session.unassign(requirement, document_id)?;
        println!(
            "{} Unassigned {} from '{}'",
            style("✓").green(),
            document_id,
            requirement
        );
    } else {
        session.assign(requirement, document_id)?;
        println!(
            "{} Assigned {} to '{}'",
            style("✓").green(),
            document_id,
            requirement
        );
    }
    Ok(())
}

fn cmd_complete(
    settings: &Settings,
    loan_id: &str,
    requirement: &str,
    undo: bool,
) -> anyhow::Result<()> {
    let mut session = open_session(settings, loan_id)?;
    if undo {
        session.unmark_complete(requirement)?;
        println!("{} Cleared completion for '{}'", style("✓").green(), requirement);
    } else {
        session.mark_complete(requirement)?;
        println!("{} Marked '{}' complete", style("✓").green(), requirement);
    }
    Ok(())
}

fn cmd_requirement_add(settings: &Settings, loan_id: &str, name: &str) -> anyhow::Result<()> {
    let mut session = open_session(settings, loan_id)?;
    session.add_custom_requirement(name)?;
    println!("{} Added custom requirement '{}'", style("✓").green(), name);
    Ok(())
}

fn cmd_requirement_remove(settings: &Settings, loan_id: &str, name: &str) -> anyhow::Result<()> {
    let mut session = open_session(settings, loan_id)?;
    session.remove_custom_requirement(name)?;
    println!("{} Removed custom requirement '{}'", style("✓").green(), name);
    Ok(())
}

async fn cmd_analyze(settings: &Settings, loan_id: &str, seed: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let documents: Vec<Document> = store
        .list_documents(loan_id)?
        .into_iter()
        .filter(|d| d.is_live())
        .collect();
    if documents.is_empty() {
        println!("{} No live documents for loan {}", style("!").yellow(), loan_id);
        return Ok(());
    }

    let client = HttpLlmClient::new(settings.llm.clone())?;
    if !client.is_available().await {
        anyhow::bail!(
            "LLM service not reachable at {}; is Ollama running?",
            settings.llm.endpoint
        );
    }

    let extractor = ContentExtractor::new(
        Arc::new(TesseractOcr::new()),
        settings.backoff.clone(),
    );

    let bar = ProgressBar::new(documents.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    bar.set_message("extracting text");

    let mut inputs = Vec::with_capacity(documents.len());
    for doc in &documents {
        let text = extractor.extract(&doc.source_path, &doc.mime_type).await;
        inputs.push(DocumentInput {
            name: doc.name.clone(),
            mime_type: doc.mime_type.clone(),
            size_bytes: doc.size_bytes,
            category: doc.category.clone(),
            text,
        });
        bar.inc(1);
    }
    bar.finish_with_message("extraction done");

    let aggregator = AnalysisAggregator::new(Arc::new(client), settings.backoff.clone())
        .with_max_doc_chars(settings.llm.max_content_chars);
    let batch = aggregator.analyze_batch(loan_id, &inputs).await?;

    println!("\n{}", style("Analysis results").bold());
    println!("{}", "-".repeat(40));
    if let Some(amount) = &batch.loan.loan_amount {
        println!("{:<20} {}", "Loan amount:", amount);
    }
    if let Some(address) = &batch.property.address {
        println!("{:<20} {}", "Property:", address);
    }
    if !batch.contacts.is_empty() {
        println!("\n{}", style("Contacts:").cyan());
        for contact in &batch.contacts {
            println!(
                "  - {} ({})",
                contact.name,
                contact.role.as_deref().unwrap_or("unknown role")
            );
        }
    }
    if !batch.tasks.is_empty() {
        println!("\n{}", style("Suggested tasks:").cyan());
        for task in &batch.tasks {
            println!("  - {}", task.title);
        }
    }
    if !batch.missing_documents.is_empty() {
        println!("\n{}", style("Likely missing documents:").yellow());
        for name in &batch.missing_documents {
            println!("  - {}", name);
        }
    }

    if seed {
        let mut session = open_session(settings, loan_id)?;
        let candidates: Vec<(String, String)> = documents
            .iter()
            .map(|d| (d.category.clone(), d.id.clone()))
            .collect();
        let filled = session.seed_assignments(&candidates)?;
        if filled.is_empty() {
            println!("\n{} No empty slots to seed", style("!").yellow());
        } else {
            println!("\n{} Seeded {} slot(s):", style("✓").green(), filled.len());
            for name in filled {
                println!("  - {}", name);
            }
        }
    }
    Ok(())
}

async fn cmd_sync(
    settings: &Settings,
    loan_id: &str,
    import: bool,
    dedup: bool,
) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let mirror = mirror_from_settings(settings)?;
    let coordinator = SyncCoordinator::new(
        store,
        mirror,
        settings.backoff.clone(),
        &settings.mirror.folder_id,
    );

    if dedup {
        let removed = coordinator.dedup_pass(loan_id).await?;
        if !removed.is_empty() {
            println!(
                "{} Soft-deleted {} duplicate(s)",
                style("✓").green(),
                removed.len()
            );
        }
    }

    let report = coordinator.push(loan_id).await?;
    println!(
        "{} Push: {} uploaded, {} failed, {} already mirrored",
        style("✓").green(),
        report.pushed,
        report.failed,
        report.already_mirrored
    );

    let propagated = coordinator.propagate_deletions(loan_id).await?;
    if propagated > 0 {
        println!(
            "{} Propagated {} deletion(s) to the mirror",
            style("✓").green(),
            propagated
        );
    }

    if import {
        let imported = coordinator
            .import_remote(loan_id, &settings.documents_dir)
            .await?;
        println!(
            "{} Imported {} remote file(s)",
            style("✓").green(),
            imported.len()
        );
        for doc in imported {
            println!("  - {} [{}]", doc.name, doc.category);
        }
    }
    Ok(())
}

async fn cmd_delete(settings: &Settings, loan_id: &str, document_id: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let mirror = mirror_from_settings(settings)?;
    let coordinator = SyncCoordinator::new(
        store,
        mirror,
        settings.backoff.clone(),
        &settings.mirror.folder_id,
    );
    coordinator.soft_delete(loan_id, document_id).await?;
    println!("{} Soft-deleted {}", style("✓").green(), document_id);
    Ok(())
}

async fn cmd_restore(settings: &Settings, loan_id: &str, document_id: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let mirror = mirror_from_settings(settings)?;
    let coordinator = SyncCoordinator::new(
        store,
        mirror,
        settings.backoff.clone(),
        &settings.mirror.folder_id,
    );
    match coordinator.restore(loan_id, document_id).await? {
        RestoreOutcome::RemoteIntact => {
            println!("{} Restored {} (remote copy intact)", style("✓").green(), document_id);
        }
        RestoreOutcome::Reuploaded { remote_id } => {
            println!(
                "{} Restored {} (re-uploaded as {})",
                style("✓").green(),
                document_id,
                remote_id
            );
        }
        RestoreOutcome::RestoredUnmirrored => {
            println!(
                "{} Restored {} locally; no remote copy (run 'loanfile sync')",
                style("!").yellow(),
                document_id
            );
        }
    }
    Ok(())
}

async fn cmd_purge(settings: &Settings, loan_id: &str, confirm: bool) -> anyhow::Result<()> {
    if !confirm {
        anyhow::bail!("purge is irreversible; re-run with --confirm");
    }
    let store = open_store(settings)?;
    let mirror = mirror_from_settings(settings)?;
    let coordinator = SyncCoordinator::new(
        store,
        mirror,
        settings.backoff.clone(),
        &settings.mirror.folder_id,
    );
    let purged = coordinator.purge_deleted(loan_id).await?;
    println!("{} Purged {} document(s)", style("✓").green(), purged);
    Ok(())
}

fn cmd_catalog(settings: &Settings, funder: Option<&str>) -> anyhow::Result<()> {
    let catalog = RequirementCatalog::builtin()?;
    let funder_id = funder.unwrap_or(&settings.funder_id);
    let set = catalog.requirement_set(funder_id);

    println!(
        "\n{}",
        style(format!("Requirements for funder '{}'", set.funder_id)).bold()
    );
    println!("{}", "-".repeat(70));
    println!("{:<35} {:<15} {:<9} Scope", "Requirement", "Category", "Required");
    println!("{}", "-".repeat(70));
    for def in &set.definitions {
        println!(
            "{:<35} {:<15} {:<9} {}",
            truncate(&def.display_name, 34),
            def.category.as_str(),
            if def.required { "yes" } else { "no" },
            if def.funder_specific { "funder" } else { "base" }
        );
    }
    Ok(())
}

async fn cmd_check() -> anyhow::Result<()> {
    println!("\n{}", style("Extraction tool status").bold());
    println!("{}", "-".repeat(40));
    let mut all_found = true;
    for (tool, available) in ContentExtractor::check_tools().await {
        let status = if available {
            style("✓ found").green()
        } else {
            all_found = false;
            style("✗ not found").red()
        };
        println!("  {:<15} {}", tool, status);
    }
    if !all_found {
        println!(
            "\n{} Some tools are missing; extraction will degrade to empty text",
            style("!").yellow()
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // Cut on a char boundary; filenames are routinely non-ASCII.
    let mut end = max.saturating_sub(3);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.2} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2_048), "2.05 KB");
        assert_eq!(format_bytes(3_500_000), "3.50 MB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-much-longer-name", 10), "a-much-...");
    }

    #[test]
    fn test_truncate_multibyte_name() {
        let name = "valuacion del inmueble única 2024.pdf";
        let cut = truncate(name, 27);
        assert!(cut.ends_with("..."));
        assert!(name.starts_with(cut.trim_end_matches("...")));
        // A cut landing inside "ú" must back up, never slice mid-char.
        assert_eq!(truncate("única.pdf", 5), "ú...");
    }
}
