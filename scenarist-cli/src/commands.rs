//! Subcommand handlers.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use scenarist_core::config::{self, PromptConfig};
use scenarist_core::{
    Chunker, ContextValidator, DocumentIngestor, Embedder, GenerationEvent, GenerationSession,
    IndexManager, MmrReranker, Namespace, OpenAiCompatibleClient, RetrievalStatus, RuntimeSettings,
    ScenarioGenerator, ScenarioHistory, ScenaristConfig, SourceDocument, TaskId, create_embedder,
    load_config,
};

use crate::{Commands, ConfigAction, HistoryAction, PromptAction};

pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Ingest {
            task,
            caption,
            files,
        } => handle_ingest(task.map(TaskId), caption, &files, workspace).await,
        Commands::Search { task, query, k } => {
            handle_search(task.map(TaskId), &query, k, workspace).await
        }
        Commands::Generate {
            task,
            name,
            criteria,
        } => handle_generate(TaskId(task), &name, &criteria, workspace).await,
        Commands::History { action } => handle_history(action, workspace),
        Commands::Prompt { action } => handle_prompt(action, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<ScenaristConfig> {
    let config = load_config(Some(workspace))
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    Ok(config.resolve_paths(workspace))
}

fn embedder(config: &ScenaristConfig) -> Arc<dyn Embedder> {
    Arc::from(create_embedder(&config.embedding))
}

async fn handle_ingest(
    task: Option<TaskId>,
    caption: Option<String>,
    files: &[std::path::PathBuf],
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let namespace = Namespace::from(task);

    let mut docs = Vec::with_capacity(files.len());
    for path in files {
        let mut doc = SourceDocument::from_path(path)?;
        if let Some(caption) = &caption {
            doc = doc.with_caption(caption.clone());
        }
        docs.push(doc);
    }

    let manager = IndexManager::new(&config.rag.vector_store_path);
    let store = manager.open(namespace)?;
    let mut history = ScenarioHistory::load(&config.history_path)?;

    // Re-ingesting a file a task already holds replaces its chunks.
    if let Some(task) = task {
        for doc in &mut docs {
            let existing = history
                .catalog()
                .documents_of(task)
                .into_iter()
                .find(|id| history.catalog().name_of(id) == Some(doc.name.as_str()))
                .cloned();
            if let Some(id) = existing {
                let removed = store.remove_document(&id).await?;
                eprintln!("  replacing {} ({removed} old chunk(s))", doc.name);
                doc.document_id = id;
            }
        }
    }

    let ingestor = DocumentIngestor::new(
        Chunker::new(config.rag.chunk_size, config.rag.chunk_overlap),
        embedder(&config),
    );

    let report = ingestor
        .ingest_batch(&store, &docs, config.rag.batch_size, |progress| {
            eprintln!(
                "  batch {} | {}/{} files | {} chunks ({:.0}%)",
                progress.batch_index + 1,
                progress.processed_files,
                progress.total_files,
                progress.cumulative_chunks,
                progress.progress_percentage
            );
        })
        .await;

    history.update_catalog(|catalog| {
        for doc in &report.ingested {
            catalog.register(doc.document_id.clone(), doc.name.clone());
            if let Some(task) = task {
                catalog.link(task, doc.document_id.clone());
            }
        }
    })?;

    let degraded: usize = report.ingested.iter().map(|d| d.degraded_embeddings).sum();
    println!(
        "Ingested {} document(s), {} chunk(s) into '{}'",
        report.ingested.len(),
        report.total_chunks(),
        namespace
    );
    for doc in report.ingested.iter().filter(|d| d.chunks == 0) {
        eprintln!("warning: {} produced no indexable text", doc.name);
    }
    if degraded > 0 {
        eprintln!("warning: {degraded} chunk(s) stored without a usable embedding");
    }
    for failed in &report.failed {
        eprintln!("error: {}: {}", failed.name, failed.error);
    }
    if !report.failed.is_empty() {
        anyhow::bail!("{} document(s) failed to ingest", report.failed.len());
    }
    Ok(())
}

async fn handle_search(
    task: Option<TaskId>,
    query: &str,
    k: usize,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let embedder = embedder(&config);
    let manager = IndexManager::new(&config.rag.vector_store_path);
    let store = manager.open(Namespace::from(task))?;

    let retrieval = store.search(embedder.as_ref(), query, k).await;
    let status = retrieval.status.clone();
    let ranked = MmrReranker::new(config.rag.diversity_lambda).rerank(
        &retrieval.query_vector,
        retrieval.hits,
        k,
    );

    for (i, hit) in ranked.iter().enumerate() {
        let snippet: String = hit.chunk.content.chars().take(120).collect();
        println!(
            "{:>2}. [{:.3}] {} | {}",
            i + 1,
            hit.score,
            hit.chunk.source().unwrap_or("unknown"),
            snippet.replace('\n', " ")
        );
    }
    match status {
        RetrievalStatus::Ok => {}
        RetrievalStatus::Empty => println!("No matching chunks."),
        RetrievalStatus::Degraded { reason } => eprintln!("warning: retrieval degraded: {reason}"),
    }
    Ok(())
}

async fn handle_generate(
    task: TaskId,
    name: &str,
    criteria: &str,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let manager = IndexManager::new(&config.rag.vector_store_path);
    let store = manager.open(Namespace::Task(task))?;
    let client = OpenAiCompatibleClient::from_config(&config.llm)?;

    let generator = ScenarioGenerator::new(
        store,
        embedder(&config),
        Arc::new(client),
        Arc::new(RuntimeSettings::from_config(&config)),
        config.llm.model.clone(),
    )
    .with_validator(ContextValidator::new(config.rag.min_context_coverage));

    let mut session = GenerationSession::new();
    let mut stream = generator.generate_stream(criteria);
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else { break };
                match &event {
                    GenerationEvent::Fragment(text) => {
                        write!(stdout, "{text}")?;
                        stdout.flush()?;
                    }
                    GenerationEvent::Statistics(stats) => println!("{stats}"),
                    GenerationEvent::Error(message) => eprintln!("\n{message}"),
                }
                session.observe(&event);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nGeneration cancelled.");
                return Ok(());
            }
        }
    }

    let mut history = ScenarioHistory::load(&config.history_path)?;
    let files = history.catalog().document_names(task);
    match session.into_record(task, name, criteria, files) {
        Some(record) => {
            history.insert(record)?;
            eprintln!("Saved scenario for task {task}.");
        }
        None => eprintln!("Scenario not saved."),
    }
    Ok(())
}

fn handle_history(action: HistoryAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let mut history = ScenarioHistory::load(&config.history_path)?;

    match action {
        HistoryAction::List => {
            let records = history.list();
            if records.is_empty() {
                println!("No saved scenarios.");
            }
            for record in records {
                println!(
                    "{:>4}  {}  {}  ({} file(s))",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.name,
                    record.uploaded_files.len()
                );
            }
        }
        HistoryAction::Show { id } => {
            let record = history
                .get(TaskId(id))
                .ok_or_else(|| anyhow::anyhow!("No scenario saved for task {id}"))?;
            println!("# {}\n", record.name);
            println!("Criteria: {}\n", record.criteria);
            println!("{}", record.scenario);
            println!("{}", record.statistics);
        }
        HistoryAction::Delete { id } => {
            let manager = IndexManager::new(&config.rag.vector_store_path);
            let orphans = history.delete_task(TaskId(id), &manager)?;
            println!(
                "Deleted task {id} and its vector storage ({} document(s) no longer referenced).",
                orphans.len()
            );
        }
        HistoryAction::Clear => {
            let manager = IndexManager::new(&config.rag.vector_store_path);
            let removed = history.clear(&manager)?;
            println!("Removed {removed} scenario(s) and their vector storage.");
        }
    }
    Ok(())
}

fn handle_prompt(action: PromptAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let settings = RuntimeSettings::from_config(&config);

    match action {
        PromptAction::Show => {
            let snapshot = settings.snapshot();
            println!("System prompt:\n{}\n", snapshot.system_prompt);
            println!("Scenario prompt:\n{}\n", snapshot.scenario_prompt);
            println!("Max tokens: {}", snapshot.max_tokens);
            return Ok(());
        }
        PromptAction::SetSystem { text } => settings.set_system_prompt(text)?,
        PromptAction::SetScenario { text } => settings.set_scenario_prompt(text)?,
        PromptAction::SetMaxTokens { n } => settings.set_max_tokens(n)?,
    }

    let snapshot = settings.snapshot();
    let prompts = PromptConfig {
        system_prompt: snapshot.system_prompt,
        scenario_prompt: snapshot.scenario_prompt,
    };
    let path = config::save_prompt_settings(workspace, &prompts, snapshot.max_tokens)?;
    println!("Prompt settings saved to {}", path.display());
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config::workspace_config_path(workspace);
            if path.exists() {
                anyhow::bail!("Config already exists at {}", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, toml::to_string_pretty(&ScenaristConfig::default())?)?;
            println!("Created {}", path.display());
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_init_then_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        handle_config(ConfigAction::Init, dir.path()).unwrap();
        assert!(config::workspace_config_path(dir.path()).exists());
        assert!(handle_config(ConfigAction::Init, dir.path()).is_err());
    }

    #[test]
    fn test_prompt_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        handle_prompt(PromptAction::SetMaxTokens { n: 2048 }, dir.path()).unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.llm.max_tokens, 2048);
    }

    #[test]
    fn test_invalid_prompt_update_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(handle_prompt(PromptAction::SetSystem { text: "  ".into() }, dir.path()).is_err());
        assert!(handle_prompt(PromptAction::SetMaxTokens { n: 0 }, dir.path()).is_err());
        assert!(!config::workspace_config_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_ingest_links_documents_to_task() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("spec.txt");
        std::fs::write(&file, "Users must verify their email before checkout.").unwrap();

        handle_ingest(Some(TaskId(2)), None, &[file], dir.path())
            .await
            .unwrap();

        let config = load(dir.path()).unwrap();
        let history = ScenarioHistory::load(&config.history_path).unwrap();
        assert_eq!(
            history.catalog().document_names(TaskId(2)),
            vec!["spec.txt".to_string()]
        );
        assert!(config.rag.vector_store_path.join("task_2").exists());
    }

    #[tokio::test]
    async fn test_reingest_replaces_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("spec.txt");
        std::fs::write(&file, "Users must verify their email before checkout.").unwrap();
        handle_ingest(Some(TaskId(5)), None, &[file.clone()], dir.path())
            .await
            .unwrap();
        std::fs::write(&file, "Guests may check out without an account.").unwrap();
        handle_ingest(Some(TaskId(5)), None, &[file], dir.path())
            .await
            .unwrap();

        let config = load(dir.path()).unwrap();
        let store = IndexManager::new(&config.rag.vector_store_path)
            .open(Namespace::Task(TaskId(5)))
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let history = ScenarioHistory::load(&config.history_path).unwrap();
        assert_eq!(history.catalog().documents_of(TaskId(5)).len(), 1);
    }

    #[tokio::test]
    async fn test_history_delete_removes_task_storage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rules.txt");
        std::fs::write(&file, "Sessions expire after thirty minutes.").unwrap();
        handle_ingest(Some(TaskId(8)), None, &[file], dir.path())
            .await
            .unwrap();

        handle_history(HistoryAction::Delete { id: 8 }, dir.path()).unwrap();

        let config = load(dir.path()).unwrap();
        assert!(!config.rag.vector_store_path.join("task_8").exists());
        let history = ScenarioHistory::load(&config.history_path).unwrap();
        assert!(history.catalog().is_empty());
    }
}
