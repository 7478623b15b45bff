//! Client-side cache in front of the translation endpoint.
//!
//! Serves the online path: strings the batch job never translated ahead of
//! time. Entries are keyed by a hash of the source text and then by target
//! language, and live under one versioned storage key so a format change only
//! needs a version bump. The cache is advisory: unreadable content counts as
//! empty and failed writes are logged and dropped.

pub mod endpoint;
pub mod hash;
pub mod preference;
pub mod storage;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::model::language::LanguageContext;

use self::endpoint::TranslationEndpoint;
use self::hash::content_hash;
use self::storage::CacheStorage;

pub const CACHE_KEY: &str = "translation-cache";
pub const CACHE_VERSION: &str = "v1";

pub fn storage_key() -> String {
    format!("{CACHE_KEY}-{CACHE_VERSION}")
}

/// hash -> language code -> translated text
type CacheEntries = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationState {
    pub translated_text: String,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl TranslationState {
    fn loading(text: &str) -> Self {
        Self {
            translated_text: text.to_string(),
            is_loading: true,
            error: None,
        }
    }

    fn resolved(text: String) -> Self {
        Self {
            translated_text: text,
            is_loading: false,
            error: None,
        }
    }

    fn failed(text: &str, error: String) -> Self {
        Self {
            translated_text: text.to_string(),
            is_loading: false,
            error: Some(error),
        }
    }
}

pub struct RuntimeCache {
    storage: Arc<dyn CacheStorage>,
    endpoint: Arc<dyn TranslationEndpoint>,
}

impl RuntimeCache {
    pub fn new(storage: Arc<dyn CacheStorage>, endpoint: Arc<dyn TranslationEndpoint>) -> Self {
        Self { storage, endpoint }
    }

    /// Blocking lookup. Never returns an empty result for non-empty input:
    /// every failure resolves to the original text with `error` set.
    pub fn lookup(&self, text: &str, ctx: LanguageContext) -> TranslationState {
        if ctx.is_source() || text.is_empty() {
            return TranslationState::resolved(text.to_string());
        }

        let hash = content_hash(text);
        let lang = ctx.active.code();

        if let Some(hit) = self.read_entries().get(&hash).and_then(|m| m.get(lang)) {
            debug!(hash = %hash, lang, "translation cache hit");
            return TranslationState::resolved(hit.clone());
        }

        match self.endpoint.translate(text, ctx.active) {
            Ok(reply) => {
                if reply.passthrough {
                    debug!(lang, "untranslated passthrough reply, not caching");
                } else {
                    self.remember(hash, lang, &reply.translated_text);
                }
                TranslationState::resolved(reply.translated_text)
            }
            Err(e) => {
                warn!(lang, "runtime translation failed, showing original: {e}");
                TranslationState::failed(text, e.to_string())
            }
        }
    }

    pub fn get_translation(self: &Arc<Self>, text: &str, ctx: LanguageContext) -> TranslationHandle {
        self.get_translation_with(text, ctx, |_| {})
    }

    /// Resolves on a worker thread. `on_resolve` runs once with the final
    /// state unless the handle was cancelled or dropped first; it must not
    /// call back into the handle.
    pub fn get_translation_with<F>(
        self: &Arc<Self>,
        text: &str,
        ctx: LanguageContext,
        on_resolve: F,
    ) -> TranslationHandle
    where
        F: FnOnce(&TranslationState) + Send + 'static,
    {
        if ctx.is_source() || text.is_empty() {
            let state = TranslationState::resolved(text.to_string());
            on_resolve(&state);
            return TranslationHandle::settled(state);
        }

        let mut handle = TranslationHandle::pending(text);
        let callback = Arc::new(Mutex::new(Some(on_resolve)));

        let spawned = {
            let cache = Arc::clone(self);
            let state = Arc::clone(&handle.state);
            let alive = Arc::clone(&handle.alive);
            let callback = Arc::clone(&callback);
            let text = text.to_string();

            thread::Builder::new()
                .name("translation-cache".into())
                .spawn(move || {
                    let result = cache.lookup(&text, ctx);
                    deliver(&state, &alive, result, &callback);
                })
        };

        match spawned {
            Ok(worker) => {
                handle.worker = Some(worker);
                handle
            }
            Err(e) => {
                warn!("could not spawn translation worker, resolving inline: {e}");
                let result = self.lookup(text, ctx);
                deliver(&handle.state, &handle.alive, result, &callback);
                handle
            }
        }
    }

    fn read_entries(&self) -> CacheEntries {
        let key = storage_key();
        let Some(raw) = self.storage.get_item(&key) else {
            return CacheEntries::new();
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(key = %key, "discarding unreadable translation cache: {e}");
            CacheEntries::new()
        })
    }

    // Re-read right before writing so entries added by other workers survive.
    fn remember(&self, hash: String, lang: &str, translated: &str) {
        let mut entries = self.read_entries();
        entries
            .entry(hash)
            .or_default()
            .insert(lang.to_string(), translated.to_string());

        let written = serde_json::to_string(&entries)
            .map_err(crate::error::Error::from)
            .and_then(|json| self.storage.set_item(&storage_key(), &json));

        if let Err(e) = written {
            warn!("failed to write translation cache: {e}");
        }
    }
}

fn lock(state: &Mutex<TranslationState>) -> MutexGuard<'_, TranslationState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

type Callback<F> = Mutex<Option<F>>;

fn deliver<F>(
    state: &Mutex<TranslationState>,
    alive: &AtomicBool,
    result: TranslationState,
    callback: &Callback<F>,
) where
    F: FnOnce(&TranslationState),
{
    let mut guard = lock(state);
    if !alive.load(Ordering::SeqCst) {
        debug!("translation handle gone, discarding late result");
        return;
    }

    *guard = result;

    let cb = callback.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(cb) = cb {
        cb(&*guard);
    }
}

/// Observable result of [`RuntimeCache::get_translation`].
///
/// Dropping or cancelling the handle before resolution discards the late
/// result: no state write, no callback.
pub struct TranslationHandle {
    state: Arc<Mutex<TranslationState>>,
    alive: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TranslationHandle {
    fn pending(text: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(TranslationState::loading(text))),
            alive: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    fn settled(state: TranslationState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            alive: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    pub fn state(&self) -> TranslationState {
        lock(&self.state).clone()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).is_loading
    }

    /// Blocks until the worker finishes.
    pub fn wait(mut self) -> TranslationState {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("translation worker panicked");
            }
        }
        self.state()
    }

    pub fn cancel(&self) {
        // Taking the lock orders this against an in-flight delivery.
        let _guard = lock(&self.state);
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for TranslationHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::endpoint::EndpointReply;
    use super::storage::MemoryStorage;
    use super::*;
    use crate::error::{Error, Result};
    use crate::model::language::Language;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{self, Receiver};

    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        writes: AtomicUsize,
    }

    impl CacheStorage for CountingStorage {
        fn get_item(&self, key: &str) -> Option<String> {
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_item(key, value)
        }

        fn remove_item(&self, key: &str) -> Result<()> {
            self.inner.remove_item(key)
        }
    }

    enum Behaviour {
        Translate,
        Passthrough,
        Fail,
    }

    struct FakeEndpoint {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeEndpoint {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TranslationEndpoint for FakeEndpoint {
        fn translate(&self, text: &str, target: Language) -> Result<EndpointReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Translate => Ok(EndpointReply {
                    translated_text: format!("{text}@{target}"),
                    passthrough: false,
                }),
                Behaviour::Passthrough => Ok(EndpointReply {
                    translated_text: text.to_string(),
                    passthrough: true,
                }),
                Behaviour::Fail => Err(Error::ProviderFailure {
                    status: Some(500),
                    message: "Translation failed".into(),
                }),
            }
        }
    }

    /// Blocks every call until the test releases it.
    struct GatedEndpoint {
        gate: Mutex<Receiver<()>>,
    }

    impl TranslationEndpoint for GatedEndpoint {
        fn translate(&self, text: &str, _target: Language) -> Result<EndpointReply> {
            let _ = self.gate.lock().unwrap().recv();
            Ok(EndpointReply {
                translated_text: text.to_uppercase(),
                passthrough: false,
            })
        }
    }

    fn english() -> LanguageContext {
        LanguageContext::new(Language::Ko, Language::En)
    }

    fn setup(behaviour: Behaviour) -> (Arc<CountingStorage>, Arc<FakeEndpoint>, RuntimeCache) {
        let storage = Arc::new(CountingStorage::default());
        let endpoint = Arc::new(FakeEndpoint::new(behaviour));
        let cache = RuntimeCache::new(storage.clone(), endpoint.clone());
        (storage, endpoint, cache)
    }

    #[test]
    fn same_language_is_a_no_op() {
        let (storage, endpoint, cache) = setup(Behaviour::Translate);
        let state = cache.lookup("안녕", LanguageContext::source_only(Language::Ko));

        assert_eq!(state, TranslationState::resolved("안녕".into()));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn miss_then_hit() {
        let (storage, endpoint, cache) = setup(Behaviour::Translate);

        let first = cache.lookup("안녕", english());
        assert_eq!(first.translated_text, "안녕@en");
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);

        let second = cache.lookup("안녕", english());
        assert_eq!(second, first);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

        let stored = storage.get_item("translation-cache-v1").unwrap();
        let entries: CacheEntries = serde_json::from_str(&stored).unwrap();
        assert_eq!(entries[&content_hash("안녕")]["en"], "안녕@en");
    }

    #[test]
    fn preexisting_entry_short_circuits_the_endpoint() {
        let (storage, endpoint, cache) = setup(Behaviour::Fail);
        let seeded = format!(r#"{{"{}":{{"ja":"こんにちは"}}}}"#, content_hash("안녕"));
        storage.inner.set_item(&storage_key(), &seeded).unwrap();

        let state = cache.lookup("안녕", LanguageContext::new(Language::Ko, Language::Ja));
        assert_eq!(state.translated_text, "こんにちは");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failure_falls_back_to_the_original_text() {
        let (storage, _, cache) = setup(Behaviour::Fail);
        let state = cache.lookup("안녕", english());

        assert_eq!(state.translated_text, "안녕");
        assert!(!state.is_loading);
        assert!(state.error.is_some());
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn passthrough_replies_are_not_cached() {
        let (storage, endpoint, cache) = setup(Behaviour::Passthrough);
        cache.lookup("안녕", english());
        cache.lookup("안녕", english());

        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn corrupt_storage_counts_as_empty() {
        let (storage, _, cache) = setup(Behaviour::Translate);
        storage.inner.set_item(&storage_key(), "{not json").unwrap();

        let state = cache.lookup("안녕", english());
        assert_eq!(state.translated_text, "안녕@en");
        assert!(state.error.is_none());

        let repaired = storage.get_item(&storage_key()).unwrap();
        assert!(serde_json::from_str::<CacheEntries>(&repaired).is_ok());
    }

    #[test]
    fn handle_resolves_asynchronously() {
        let (_, _, cache) = setup(Behaviour::Translate);
        let cache = Arc::new(cache);
        let (tx, rx) = mpsc::channel();

        let handle = cache.get_translation_with("안녕", english(), move |s| {
            tx.send(s.translated_text.clone()).unwrap();
        });
        let state = handle.wait();

        assert!(!state.is_loading);
        assert_eq!(state.translated_text, "안녕@en");
        assert_eq!(rx.recv().unwrap(), "안녕@en");
    }

    #[test]
    fn same_language_handle_is_already_resolved() {
        let (_, endpoint, cache) = setup(Behaviour::Translate);
        let handle = Arc::new(cache).get_translation("안녕", LanguageContext::source_only(Language::Ko));

        assert!(!handle.is_loading());
        assert_eq!(handle.state().translated_text, "안녕");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_handle_discards_late_result() {
        let (release, gate) = mpsc::channel();
        let endpoint = Arc::new(GatedEndpoint { gate: Mutex::new(gate) });
        let cache = Arc::new(RuntimeCache::new(Arc::new(MemoryStorage::new()), endpoint));
        let (tx, rx) = mpsc::channel::<TranslationState>();

        let handle = cache.get_translation_with("hello", english(), move |s| {
            let _ = tx.send(s.clone());
        });
        assert!(handle.is_loading());

        handle.cancel();
        release.send(()).unwrap();
        let state = handle.wait();

        assert!(state.is_loading);
        assert_eq!(state.translated_text, "hello");
        assert!(rx.try_recv().is_err());
    }
}
