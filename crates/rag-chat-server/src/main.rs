use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use rag_chat_server::config::Settings;
use rag_chat_server::router::build_router;
use rag_chat_server::services::conversation::{
    AnswerComposer, ContextBuilder, ConversationCache, ConversationManager, DocumentIndex,
    FallbackPolicy, LlmProvider, QueryReformulator,
};
use rag_chat_server::services::{
    BookService, ContentService, EmbeddingService, LlmService, QdrantIndex, WebSearchService,
};
use rag_chat_server::state::AppState;
use rag_chat_server::utils::logger::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logger()?;

    info!("🚀 Starting RAG Chat Server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Session memory
    let session_cache = Arc::new(ConversationCache::from_config(&settings.session));
    session_cache.spawn_sweeper(Duration::from_secs(settings.session.sweep_interval_seconds.max(1)));
    info!(
        "✅ Session cache ready (ttl {}s, sweep every {}s)",
        settings.session.ttl_seconds, settings.session.sweep_interval_seconds
    );

    // External collaborators
    let llm: Arc<dyn LlmProvider> = Arc::new(LlmService::new(settings.llm.clone())?);
    let embedder = Arc::new(EmbeddingService::new(settings.embedding.clone())?);
    let document_index: Arc<dyn DocumentIndex> =
        Arc::new(QdrantIndex::new(settings.index.clone(), embedder.clone())?);
    let web_search = Arc::new(WebSearchService::new(settings.web_search.clone())?);
    info!(
        "✅ Providers configured (llm: {}, index: {}/{})",
        settings.llm.model, settings.index.base_url, settings.index.collection
    );

    // Orchestration
    let composer = AnswerComposer::new(
        document_index.clone(),
        llm.clone(),
        ContextBuilder::from_config(&settings.prompts, &settings.rag),
        settings.rag.retrieval_top_k,
    );
    let conversation_manager = ConversationManager::new(
        session_cache.clone(),
        QueryReformulator::new(llm.clone(), settings.prompts.reformulation_instruction.clone()),
        composer,
        FallbackPolicy::from_config(&settings.fallback),
        web_search.clone(),
    )
    .with_stream_capacity(settings.rag.stream_channel_capacity);

    let content_service = ContentService::new(
        llm.clone(),
        document_index.clone(),
        settings.rag.retrieval_top_k,
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    // Uploaded books keep their own conversations
    let settings = Arc::new(settings);
    let book_service = Arc::new(BookService::new(
        llm,
        embedder,
        web_search,
        ConversationCache::from_config(&settings.session),
        settings.clone(),
    ));
    book_service.spawn_sweeper(Duration::from_secs(settings.session.sweep_interval_seconds.max(1)));
    info!(
        "✅ Book uploads enabled (max {} bytes)",
        settings.book.max_upload_bytes
    );

    let app = build_router(AppState {
        settings,
        conversation_manager: Arc::new(conversation_manager),
        content_service: Arc::new(content_service),
        document_index,
        session_cache,
        book_service,
    });

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
