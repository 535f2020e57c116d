use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use tea_sommelier::ingest::{draft_from_file, walker::walk_articles};
use tea_sommelier::models::ExecutionKind;
use tea_sommelier::openai::OpenAiClient;
use tea_sommelier::rag::article_store::ArticleStore;
use tea_sommelier::rag::embeddings::{content_hash, EmbeddingGenerator};
use tea_sommelier::rag::run_log::RunLog;
use tea_sommelier::rag::sync::SyncManager;

#[derive(Parser, Debug)]
#[command(name = "article-sync")]
#[command(about = "Sync markdown articles into the content store and refresh embeddings")]
struct Args {
    /// 記事ディレクトリ（.md / .mdx を再帰的に取り込む）
    #[arg(short, long)]
    dir: PathBuf,

    /// Postgres接続URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// OpenAI互換エンドポイント
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// OpenAI APIキー
    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    openai_api_key: String,

    /// 提供元ラベル（記事の provenance として保存）
    #[arg(long, default_value = "healtea-blog")]
    source: String,

    /// 鮮度ウィンドウを無視して全記事を埋め込み対象にする
    #[arg(long, default_value_t = false)]
    force: bool,

    /// 取り込みのみ行い、埋め込み生成をスキップする
    #[arg(long, default_value_t = false)]
    skip_embed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if !args.dir.exists() {
        anyhow::bail!("Directory does not exist: {}", args.dir.display());
    }

    println!("Connecting to database...");
    let store = Arc::new(ArticleStore::new(&args.database_url).await?);
    store.init_schema().await?;
    let run_log = RunLog::new(store.pool().clone());
    run_log.init_schema().await?;

    println!("Scanning directory: {}", args.dir.display());
    let files = walk_articles(&args.dir);
    println!("Found {} article files", files.len());

    if files.is_empty() {
        println!("No article files found. Exiting.");
        return Ok(());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut synced_count = 0usize;
    let mut skipped_count = 0usize;
    let mut error_count = 0usize;
    let mut failed_files: Vec<(PathBuf, String)> = Vec::new();

    for path in &files {
        pb.set_message(format!(
            "{}",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));

        match sync_file(path, &args, &store).await {
            Ok(true) => synced_count += 1,
            Ok(false) => skipped_count += 1,
            Err(e) => {
                tracing::warn!("Failed to sync {}: {}", path.display(), e);
                failed_files.push((path.clone(), format!("{}", e)));
                error_count += 1;
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("done");

    println!("\nArticle sync complete!");
    println!("  Synced:  {}", synced_count);
    println!("  Skipped: {}", skipped_count);
    println!("  Errors:  {}", error_count);

    if !failed_files.is_empty() {
        println!("\nFailed files:");
        for (path, err) in &failed_files {
            println!("  {}: {}", path.display(), err);
        }
    }

    if args.skip_embed {
        println!("\nEmbedding refresh skipped (--skip-embed).");
        return Ok(());
    }

    let openai = Arc::new(OpenAiClient::new(
        args.openai_base_url.clone(),
        args.openai_api_key.clone(),
    ));
    if !openai.is_configured() {
        println!("\nOPENAI_API_KEY is not set. Embedding refresh skipped.");
        return Ok(());
    }

    println!("\nRefreshing embeddings...");
    let sync = SyncManager::new(store, EmbeddingGenerator::new(openai), run_log);
    let report = sync.run(ExecutionKind::Manual, args.force).await?;

    println!("Embedding run {} finished:", report.run_id);
    println!("  Candidates: {}", report.total_candidates);
    println!("  Success:    {}", report.success_count);
    println!("  Errors:     {}", report.error_count);
    if !report.failed_article_ids.is_empty() {
        println!("  Failed IDs: {:?}", report.failed_article_ids);
        println!("\nFailed articles will be retried on the next run.");
    }

    Ok(())
}

/// 1ファイルを取り込む。本文のハッシュが変わっていなければスキップ。
/// 戻り値は「取り込んだか」。
async fn sync_file(path: &PathBuf, args: &Args, store: &ArticleStore) -> Result<bool> {
    let draft = draft_from_file(path, &args.source)?;

    let file_path = draft.file_path.as_deref().unwrap_or_default();
    if let Some(existing) = store.get_article_by_path(file_path).await? {
        if content_hash(&existing.content) == content_hash(&draft.content) {
            return Ok(false);
        }
    }

    store.upsert_article(&draft).await?;
    Ok(true)
}
