//! Declarative caching around async functions.
//!
//! A wrapper is built once, at the place the function is defined, and called
//! in place of the function:
//!
//! ```ignore
//! #[derive(Serialize)]
//! struct ArticleArgs { id: u64 }
//!
//! let get_article = cached("article:{id}", Some(Duration::from_secs(600)))
//!     .wrap(manager.clone(), |args: ArticleArgs| async move { repo.find(args.id).await });
//!
//! let article = get_article.call(ArticleArgs { id: 7 }).await;
//! ```
//!
//! Keys come from the template, filled from the argument struct's fields, or
//! from an explicit key builder. Keys are qualified with the manager's prefix.
//! A key that cannot be built turns the call into a plain pass-through.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::KeyBuildError;
use crate::events::{CacheEventLogger, LogLevel};
use crate::key::KeyTemplate;
use crate::manager::CacheManager;

const LOGGER: CacheEventLogger = CacheEventLogger::new("decorator");

/// Derives a key from a call's arguments.
pub type KeyBuilder<A> = Arc<dyn Fn(&A) -> Result<String, KeyBuildError> + Send + Sync>;

enum KeySource<A> {
    Template(Result<KeyTemplate, KeyBuildError>),
    Custom(KeyBuilder<A>),
}

impl<A: Serialize> KeySource<A> {
    fn build(&self, manager: &CacheManager, args: &A) -> Result<String, KeyBuildError> {
        let key = match self {
            KeySource::Template(Ok(template)) => template.render_args(args)?,
            KeySource::Template(Err(e)) => return Err(e.clone()),
            KeySource::Custom(builder) => builder(args)?,
        };
        Ok(manager.qualify_pattern(&key))
    }

    fn describe(&self) -> String {
        match self {
            KeySource::Template(Ok(t)) => t.as_str().to_string(),
            KeySource::Template(Err(_)) => "<malformed>".to_string(),
            KeySource::Custom(_) => "<key_builder>".to_string(),
        }
    }
}

fn key_build_failed(operation: &str, source: &str, error: &KeyBuildError) {
    LOGGER
        .event(LogLevel::Warn, operation)
        .field("key_pattern", source)
        .success(false)
        .degraded(true)
        .error(error)
        .emit();
}

// =============================================================================
// cached
// =============================================================================

/// Starts a caching wrapper keyed by `key_pattern`.
pub fn cached<A>(key_pattern: &str, ttl: Option<Duration>) -> CachedBuilder<A> {
    CachedBuilder {
        key: KeySource::Template(KeyTemplate::parse(key_pattern)),
        ttl,
    }
}

pub struct CachedBuilder<A> {
    key: KeySource<A>,
    ttl: Option<Duration>,
}

impl<A> CachedBuilder<A> {
    /// Replaces the template with an explicit key derivation.
    pub fn key_builder<K>(mut self, builder: K) -> Self
    where
        K: Fn(&A) -> Result<String, KeyBuildError> + Send + Sync + 'static,
    {
        self.key = KeySource::Custom(Arc::new(builder));
        self
    }

    pub fn wrap<F, Fut>(self, manager: Arc<CacheManager>, f: F) -> CachedFn<A, F>
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        CachedFn {
            manager,
            key: self.key,
            ttl: self.ttl,
            f,
        }
    }
}

/// An async function whose results are cached.
pub struct CachedFn<A, F> {
    manager: Arc<CacheManager>,
    key: KeySource<A>,
    ttl: Option<Duration>,
    f: F,
}

impl<A: Serialize, F> CachedFn<A, F> {
    /// Serves the result from the cache, or calls through and caches it.
    pub async fn call<Fut, R>(&self, args: A) -> R
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = R>,
        R: Serialize + DeserializeOwned,
    {
        let Some(key) = self.resolve_key(&args) else {
            return (self.f)(args).await;
        };

        if let Some(hit) = self.manager.get_cached::<R>(&key).await {
            return hit;
        }

        let result = (self.f)(args).await;
        self.manager.set_cached(&key, &result, self.ttl).await;
        result
    }

    /// Like [`call`](Self::call) for fallible functions: only `Ok` values are
    /// cached.
    pub async fn try_call<Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        let Some(key) = self.resolve_key(&args) else {
            return (self.f)(args).await;
        };

        if let Some(hit) = self.manager.get_cached::<T>(&key).await {
            return Ok(hit);
        }

        let value = (self.f)(args).await?;
        self.manager.set_cached(&key, &value, self.ttl).await;
        Ok(value)
    }

    fn resolve_key(&self, args: &A) -> Option<String> {
        if !self.manager.is_enabled() {
            return None;
        }
        match self.key.build(&self.manager, args) {
            Ok(key) => Some(key),
            Err(e) => {
                key_build_failed("cached", &self.key.describe(), &e);
                None
            }
        }
    }
}

// =============================================================================
// cache_invalidate
// =============================================================================

/// Starts a wrapper that invalidates `key_pattern` after each call.
pub fn cache_invalidate<A>(key_pattern: &str) -> InvalidateBuilder<A> {
    InvalidateBuilder {
        key: KeySource::Template(KeyTemplate::parse(key_pattern)),
    }
}

pub struct InvalidateBuilder<A> {
    key: KeySource<A>,
}

impl<A> InvalidateBuilder<A> {
    pub fn key_builder<K>(mut self, builder: K) -> Self
    where
        K: Fn(&A) -> Result<String, KeyBuildError> + Send + Sync + 'static,
    {
        self.key = KeySource::Custom(Arc::new(builder));
        self
    }

    pub fn wrap<F, Fut>(self, manager: Arc<CacheManager>, f: F) -> InvalidatingFn<A, F>
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        InvalidatingFn {
            manager,
            key: self.key,
            f,
        }
    }
}

/// An async function that invalidates a cache entry once it has run.
pub struct InvalidatingFn<A, F> {
    manager: Arc<CacheManager>,
    key: KeySource<A>,
    f: F,
}

impl<A: Serialize, F> InvalidatingFn<A, F> {
    /// Runs the function, then invalidates the key derived from `args`.
    pub async fn call<Fut, R>(&self, args: A) -> R
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = R>,
    {
        // Derived up front: the function takes ownership of the arguments.
        let key = self.resolve_key(&args);
        let result = (self.f)(args).await;
        if let Some(key) = key {
            self.invalidate(&key).await;
        }
        result
    }

    /// Like [`call`](Self::call), but only invalidates when the function
    /// succeeded.
    pub async fn try_call<Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.resolve_key(&args);
        let value = (self.f)(args).await?;
        if let Some(key) = key {
            self.invalidate(&key).await;
        }
        Ok(value)
    }

    fn resolve_key(&self, args: &A) -> Option<String> {
        if !self.manager.is_enabled() {
            return None;
        }
        match self.key.build(&self.manager, args) {
            Ok(key) => Some(key),
            Err(e) => {
                key_build_failed("cache_invalidate", &self.key.describe(), &e);
                None
            }
        }
    }

    async fn invalidate(&self, key: &str) {
        if !self.manager.invalidate(key).await {
            LOGGER
                .event(LogLevel::Warn, "cache_invalidate")
                .key(key)
                .success(false)
                .emit();
        }
    }
}
