//! Prompt-context accumulation.
//!
//! A generator carries a [`PromptContextStore`]: static `(role, text)`
//! entries added by the caller plus dynamic [`PromptContextProvider`]s
//! invoked once per generation. Composition order is fixed — static
//! entries first, then each provider's output in registration order,
//! then the generator's primary prompt as the final `human` entry.
//! Blank or whitespace-only content is dropped at assembly time.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chat::{ContextRole, HistoryItem};
use crate::error::LlmError;

/// One prompt-context entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    /// Who the entry is attributed to.
    pub role: ContextRole,
    /// The entry text.
    pub content: String,
}

impl PromptContext {
    /// Builds one entry.
    pub fn new(role: ContextRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Error type dynamic providers may return.
pub type ContextProviderError = Box<dyn std::error::Error + Send + Sync>;

/// A callback that contributes context at generation time.
///
/// Invoked once per `generate`, in registration order, under the
/// request's cancellation token. A failure aborts the generation with
/// [`LlmError::ContextProviderFailed`].
pub trait PromptContextProvider: Send + Sync {
    /// Produces additional context entries for this generation.
    fn generate_context<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PromptContext>, ContextProviderError>> + Send + 'a>>;
}

/// Thread-safe, append-only store of context entries and providers.
///
/// Reads (composition) and writes (appends) may race from different
/// tasks; composition works on a snapshot taken under the read lock, so
/// appends made while providers run affect only later generations.
#[derive(Default)]
pub struct PromptContextStore {
    entries: RwLock<Vec<PromptContext>>,
    providers: RwLock<Vec<Arc<dyn PromptContextProvider>>>,
}

impl PromptContextStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one static entry.
    pub fn add(&self, role: ContextRole, content: impl Into<String>) {
        let mut entries = self.entries.write().expect("context lock poisoned");
        entries.push(PromptContext::new(role, content));
        debug!(total = entries.len(), "prompt context added");
    }

    /// Registers a dynamic provider.
    pub fn add_provider(&self, provider: Arc<dyn PromptContextProvider>) {
        let mut providers = self.providers.write().expect("context lock poisoned");
        providers.push(provider);
        debug!(total = providers.len(), "prompt context provider added");
    }

    /// Number of static entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("context lock poisoned").len()
    }

    /// Whether the store has no static entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Composes the full context for one generation: the static
    /// snapshot, then each provider's output in registration order.
    pub async fn compose(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PromptContext>, LlmError> {
        let mut contexts = self
            .entries
            .read()
            .expect("context lock poisoned")
            .clone();
        let providers = self
            .providers
            .read()
            .expect("context lock poisoned")
            .clone();

        for provider in providers {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let provided = provider
                .generate_context(cancel)
                .await
                .map_err(|source| LlmError::ContextProviderFailed { source })?;
            contexts.extend(provided);
        }

        Ok(contexts)
    }
}

impl std::fmt::Debug for PromptContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptContextStore")
            .field("entries", &self.len())
            .field(
                "providers",
                &self.providers.read().expect("context lock poisoned").len(),
            )
            .finish()
    }
}

/// Assembles the initial conversation: context entries (blank ones
/// dropped) followed by the primary prompt as a `human` message.
pub fn assemble_input_items(prompt: &str, contexts: &[PromptContext]) -> Vec<HistoryItem> {
    let mut items = Vec::with_capacity(contexts.len() + 1);
    for context in contexts {
        let content = context.content.trim();
        if content.is_empty() {
            continue;
        }
        items.push(HistoryItem::Message {
            role: context.role,
            content: content.to_string(),
        });
    }
    items.push(HistoryItem::Message {
        role: ContextRole::Human,
        content: prompt.to_string(),
    });
    items
}

/// Wraps a closure as a [`PromptContextProvider`].
pub fn context_provider_fn<F, Fut>(f: F) -> Arc<dyn PromptContextProvider>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<PromptContext>, ContextProviderError>> + Send + 'static,
{
    struct FnProvider<F>(F);

    impl<F, Fut> PromptContextProvider for FnProvider<F>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<PromptContext>, ContextProviderError>> + Send + 'static,
    {
        fn generate_context<'a>(
            &'a self,
            _cancel: &'a CancellationToken,
        ) -> Pin<
            Box<dyn Future<Output = Result<Vec<PromptContext>, ContextProviderError>> + Send + 'a>,
        > {
            Box::pin((self.0)())
        }
    }

    Arc::new(FnProvider(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compose_empty_store() {
        let store = PromptContextStore::new();
        let contexts = store.compose(&CancellationToken::new()).await.unwrap();
        assert!(contexts.is_empty());
    }

    #[tokio::test]
    async fn test_static_entries_precede_provider_entries() {
        let store = PromptContextStore::new();
        store.add(ContextRole::System, "persona");
        store.add_provider(context_provider_fn(|| async {
            Ok(vec![PromptContext::new(ContextRole::Human, "rag snippet")])
        }));
        store.add(ContextRole::Assistant, "prior answer");

        let contexts = store.compose(&CancellationToken::new()).await.unwrap();
        assert_eq!(contexts.len(), 3);
        assert_eq!(contexts[0].content, "persona");
        assert_eq!(contexts[1].content, "prior answer");
        assert_eq!(contexts[2].content, "rag snippet");
    }

    #[tokio::test]
    async fn test_providers_invoked_in_registration_order() {
        let store = PromptContextStore::new();
        store.add_provider(context_provider_fn(|| async {
            Ok(vec![PromptContext::new(ContextRole::Human, "first")])
        }));
        store.add_provider(context_provider_fn(|| async {
            Ok(vec![PromptContext::new(ContextRole::Human, "second")])
        }));

        let contexts = store.compose(&CancellationToken::new()).await.unwrap();
        let texts: Vec<&str> = contexts.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_composition() {
        let store = PromptContextStore::new();
        store.add_provider(context_provider_fn(|| async {
            Err::<Vec<PromptContext>, _>("rag store unreachable".into())
        }));

        let err = store.compose(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LlmError::ContextProviderFailed { .. }));
        assert!(err.contains_message("rag store unreachable"));
    }

    #[tokio::test]
    async fn test_compose_observes_cancellation() {
        let store = PromptContextStore::new();
        store.add_provider(context_provider_fn(|| async { Ok(vec![]) }));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.compose(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_assemble_drops_blank_entries_and_appends_prompt() {
        let contexts = vec![
            PromptContext::new(ContextRole::System, "  be terse  "),
            PromptContext::new(ContextRole::Human, "   "),
            PromptContext::new(ContextRole::Assistant, ""),
        ];
        let items = assemble_input_items("What time is it?", &contexts);

        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            HistoryItem::Message {
                role: ContextRole::System,
                content: "be terse".into(),
            }
        );
        assert_eq!(
            items[1],
            HistoryItem::Message {
                role: ContextRole::Human,
                content: "What time is it?".into(),
            }
        );
    }

    #[test]
    fn test_assemble_prompt_is_always_last_and_human() {
        let contexts = vec![PromptContext::new(ContextRole::Human, "background fact")];
        let items = assemble_input_items("the prompt", &contexts);
        match items.last().unwrap() {
            HistoryItem::Message { role, content } => {
                assert_eq!(*role, ContextRole::Human);
                assert_eq!(content, "the prompt");
            }
            other => panic!("unexpected final item: {other:?}"),
        }
    }

    #[test]
    fn test_store_snapshot_isolated_from_later_writes() {
        let store = PromptContextStore::new();
        store.add(ContextRole::System, "one");
        let before = store.len();
        store.add(ContextRole::System, "two");
        assert_eq!(before, 1);
        assert_eq!(store.len(), 2);
    }
}
