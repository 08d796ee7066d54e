use crate::embeddings::Embedder;
use crate::error::{ChatError, IndexError};
use crate::generate::{build_direct_prompt, build_grounded_prompt, TextGenerator};
use crate::ingest::chunk_uploads;
use crate::memory::SessionRegistry;
use crate::models::{
    ChatAnswer, ChunkingOptions, IndexState, IngestionReport, RetrievalOptions, RetrievedChunk,
    SourceRef, UploadedDocument,
};
use crate::traits::VectorIndex;
use tokio::sync::RwLock;

/// How much of a retrieved chunk a source attribution shows.
pub const SOURCE_PREVIEW_CHARS: usize = 200;

/// Orchestrates the load → split → embed → store → retrieve → generate
/// pipeline behind explicit state. All external collaborators sit behind
/// the [`Embedder`], [`VectorIndex`] and [`TextGenerator`] seams.
pub struct ChatEngine<E, V, G> {
    embedder: E,
    index: V,
    generator: G,
    chunking: ChunkingOptions,
    retrieval: RetrievalOptions,
    state: RwLock<IndexState>,
    sessions: SessionRegistry,
}

impl<E, V, G> ChatEngine<E, V, G>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    pub fn new(
        embedder: E,
        index: V,
        generator: G,
        chunking: ChunkingOptions,
        retrieval: RetrievalOptions,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            chunking,
            retrieval,
            state: RwLock::new(IndexState::NoIndex),
            sessions: SessionRegistry::new(),
        }
    }

    /// Recovers the index state from the backing collection, which outlives
    /// the process. A non-empty collection re-enters `Indexed`.
    pub async fn restore_state(&self) -> Result<IndexState, IndexError> {
        let state = if self.index.count().await? > 0 {
            IndexState::Indexed
        } else {
            IndexState::NoIndex
        };
        *self.state.write().await = state;
        Ok(state)
    }

    pub async fn state(&self) -> IndexState {
        *self.state.read().await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }

    /// Parses, chunks, embeds and indexes the uploads. Malformed files are
    /// reported in the returned report without failing the batch; embedding
    /// or index-write failures abort and leave the index as it was. Index
    /// mutation is serialized, so concurrent uploads cannot interleave.
    pub async fn ingest(
        &self,
        uploads: Vec<UploadedDocument>,
    ) -> Result<IngestionReport, ChatError> {
        let batch = chunk_uploads(&uploads, self.chunking)?;

        if !batch.chunks.is_empty() {
            let texts: Vec<String> = batch
                .chunks
                .iter()
                .map(|chunk| chunk.text.clone())
                .collect();

            let mut state = self.state.write().await;
            let embeddings = self.embedder.embed_batch(&texts).await?;
            self.index.upsert(&batch.chunks, &embeddings).await?;
            *state = IndexState::Indexed;
        }

        Ok(IngestionReport {
            files_indexed: batch.files_chunked,
            chunks_processed: batch.chunks.len(),
            skipped: batch.skipped,
        })
    }

    /// Answers a question within a session. Takes the retrieval path when
    /// indexed and at least one hit clears the similarity threshold, and
    /// falls back to direct generation otherwise. Both paths share the
    /// session's conversation memory.
    pub async fn chat(&self, session_id: &str, question: &str) -> Result<ChatAnswer, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let history = self.sessions.history(session_id).await;
        let state = *self.state.read().await;

        let (answer, sources) = if state == IndexState::Indexed {
            let context = self.retrieve(question).await?;
            if context.is_empty() {
                let prompt = build_direct_prompt(&history, question);
                (self.generator.generate(&prompt).await?, Vec::new())
            } else {
                let prompt = build_grounded_prompt(&history, &context, question);
                let answer = self.generator.generate(&prompt).await?;
                let sources = context.iter().map(source_ref).collect();
                (answer, sources)
            }
        } else {
            let prompt = build_direct_prompt(&history, question);
            (self.generator.generate(&prompt).await?, Vec::new())
        };

        self.sessions.record(session_id, question, &answer).await;

        Ok(ChatAnswer { answer, sources })
    }

    /// Drops every indexed chunk and returns to `NoIndex`; subsequent chats
    /// take the direct path until the next successful ingest.
    pub async fn clear_index(&self) -> Result<(), IndexError> {
        let mut state = self.state.write().await;
        self.index.clear().await?;
        *state = IndexState::NoIndex;
        Ok(())
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, ChatError> {
        let query_vector = self.embedder.embed(question).await?;
        let hits = self
            .index
            .search(&query_vector, self.retrieval.top_k)
            .await?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.score >= self.retrieval.min_score)
            .collect())
    }
}

fn source_ref(chunk: &RetrievedChunk) -> SourceRef {
    SourceRef {
        source: chunk.source.clone(),
        page: chunk.page,
        score: chunk.score,
        preview: chunk.text.chars().take(SOURCE_PREVIEW_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, IndexError};
    use crate::models::TextChunk;
    use async_trait::async_trait;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        hits: Vec<RetrievedChunk>,
        stored: AtomicU64,
        cleared: Mutex<bool>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn upsert(
            &self,
            chunks: &[TextChunk],
            _embeddings: &[Vec<f32>],
        ) -> Result<(), IndexError> {
            self.stored.fetch_add(chunks.len() as u64, Ordering::SeqCst);
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<RetrievedChunk>, IndexError> {
            Ok(self.hits.clone())
        }

        async fn clear(&self) -> Result<(), IndexError> {
            *self.cleared.lock().unwrap() = true;
            Ok(())
        }

        async fn count(&self) -> Result<u64, IndexError> {
            Ok(self.stored.load(Ordering::SeqCst))
        }
    }

    struct FakeGenerator {
        prompts: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("the answer".to_string())
        }
    }

    fn engine_with_hits(
        hits: Vec<RetrievedChunk>,
        retrieval: RetrievalOptions,
    ) -> ChatEngine<FakeEmbedder, FakeIndex, FakeGenerator> {
        ChatEngine::new(
            FakeEmbedder,
            FakeIndex {
                hits,
                ..FakeIndex::default()
            },
            FakeGenerator::new(),
            ChunkingOptions::default(),
            retrieval,
        )
    }

    fn hit(score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: "chunk-1".to_string(),
            source: "manual.pdf".to_string(),
            page: 2,
            text: "pump pressure must stay under 12 bar".to_string(),
            score,
        }
    }

    /// One-page PDF with the given text, built in memory.
    fn pdf_with_text(text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("serialize pdf");
        bytes
    }

    #[tokio::test]
    async fn chat_before_any_upload_is_direct_with_empty_sources() {
        let engine = engine_with_hits(vec![hit(0.9)], RetrievalOptions::default());

        let answer = engine.chat("s1", "hello there").await.unwrap();
        assert_eq!(answer.answer, "the answer");
        assert!(answer.sources.is_empty());
        assert_eq!(engine.state().await, IndexState::NoIndex);
    }

    #[tokio::test]
    async fn ingest_moves_the_engine_to_indexed() {
        let engine = engine_with_hits(vec![hit(0.9)], RetrievalOptions::default());
        let uploads = vec![UploadedDocument {
            filename: "manual.pdf".to_string(),
            bytes: pdf_with_text("pump pressure must stay under 12 bar at all times"),
        }];

        let report = engine.ingest(uploads).await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert!(report.chunks_processed > 0);
        assert!(report.skipped.is_empty());
        assert_eq!(engine.state().await, IndexState::Indexed);
    }

    #[tokio::test]
    async fn indexed_chat_attaches_sources_and_grounds_the_prompt() {
        let engine = engine_with_hits(vec![hit(0.9)], RetrievalOptions::default());
        let uploads = vec![UploadedDocument {
            filename: "manual.pdf".to_string(),
            bytes: pdf_with_text("pump pressure must stay under 12 bar at all times"),
        }];
        engine.ingest(uploads).await.unwrap();

        let answer = engine.chat("s1", "what is the pressure limit?").await.unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].source, "manual.pdf");
        assert!(answer.sources[0].preview.len() <= SOURCE_PREVIEW_CHARS);

        let prompts = engine.generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("pump pressure must stay under 12 bar"));
    }

    #[tokio::test]
    async fn hits_below_the_threshold_fall_back_to_direct_generation() {
        let engine = engine_with_hits(
            vec![hit(0.1)],
            RetrievalOptions {
                top_k: 3,
                min_score: 0.5,
            },
        );
        engine.ingest(vec![UploadedDocument {
            filename: "manual.pdf".to_string(),
            bytes: pdf_with_text("pump pressure must stay under 12 bar at all times"),
        }])
        .await
        .unwrap();

        let answer = engine.chat("s1", "unrelated question").await.unwrap();
        assert!(answer.sources.is_empty());

        let prompts = engine.generator.prompts.lock().unwrap();
        assert!(!prompts.last().unwrap().contains("[Context"));
    }

    #[tokio::test]
    async fn malformed_uploads_are_reported_not_fatal() {
        let engine = engine_with_hits(Vec::new(), RetrievalOptions::default());
        let uploads = vec![
            UploadedDocument {
                filename: "broken.pdf".to_string(),
                bytes: b"%PDF-1.4\n%broken".to_vec(),
            },
            UploadedDocument {
                filename: "good.pdf".to_string(),
                bytes: pdf_with_text("a perfectly readable page of documentation text"),
            },
        ];

        let report = engine.ingest(uploads).await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert!(report.chunks_processed > 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].filename, "broken.pdf");
    }

    #[tokio::test]
    async fn sessions_never_observe_each_other() {
        let engine = engine_with_hits(Vec::new(), RetrievalOptions::default());
        engine.chat("alice", "my secret plan").await.unwrap();
        engine.chat("bob", "hello").await.unwrap();

        let prompts = engine.generator.prompts.lock().unwrap();
        let bob_prompt = prompts.last().unwrap();
        assert!(!bob_prompt.contains("secret"));
        assert_eq!(engine.session_count().await, 2);
    }

    #[tokio::test]
    async fn memory_carries_across_turns_on_the_direct_path() {
        let engine = engine_with_hits(Vec::new(), RetrievalOptions::default());
        engine.chat("s1", "remember the number 42").await.unwrap();
        engine.chat("s1", "what number did I mention?").await.unwrap();

        let prompts = engine.generator.prompts.lock().unwrap();
        assert!(prompts[1].contains("remember the number 42"));
    }

    #[tokio::test]
    async fn clear_index_returns_to_no_index() {
        let engine = engine_with_hits(vec![hit(0.9)], RetrievalOptions::default());
        engine.ingest(vec![UploadedDocument {
            filename: "manual.pdf".to_string(),
            bytes: pdf_with_text("pump pressure must stay under 12 bar at all times"),
        }])
        .await
        .unwrap();
        assert_eq!(engine.state().await, IndexState::Indexed);

        engine.clear_index().await.unwrap();
        assert_eq!(engine.state().await, IndexState::NoIndex);
        assert!(*engine.index.cleared.lock().unwrap());

        let answer = engine.chat("s1", "anything left?").await.unwrap();
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn restore_state_reflects_a_persisted_collection() {
        let index = FakeIndex::default();
        index.stored.store(7, Ordering::SeqCst);
        let engine = ChatEngine::new(
            FakeEmbedder,
            index,
            FakeGenerator::new(),
            ChunkingOptions::default(),
            RetrievalOptions::default(),
        );

        assert_eq!(engine.restore_state().await.unwrap(), IndexState::Indexed);
        assert_eq!(engine.state().await, IndexState::Indexed);
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let engine = engine_with_hits(Vec::new(), RetrievalOptions::default());
        assert!(matches!(
            engine.chat("s1", "   ").await,
            Err(ChatError::EmptyQuestion)
        ));
    }
}
