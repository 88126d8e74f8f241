//! Cache-aware call wrappers.
//!
//! [`Memoize`], [`EvictAfter`] and [`PutThrough`] wrap an async call site
//! `f(args)`. Each is built once with a key function and policy, then
//! invoked through `call`. An optional condition sends the call straight to
//! `f`. Cache failures are logged and never alter what `f` returned.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::backend::KvBackend;
use crate::keys::KeyGenerator;
use crate::strategy::{CacheOptions, StrategyManager};

pub type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;
pub type Condition<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// Key function rendering `args` through [`KeyGenerator::call`].
pub fn call_key<A: Display + 'static>(generator: KeyGenerator, prefix: Option<String>, function: impl Into<String>) -> KeyFn<A> {
    let function = function.into();
    Arc::new(move |args: &A| generator.call(prefix.as_deref(), &function, std::slice::from_ref(args)))
}

fn applies<A>(condition: &Option<Condition<A>>, args: &A) -> bool {
    condition.as_ref().map_or(true, |c| c(args))
}

// == Memoize ==
/// Returns the cached result for `args`, or runs `f` and caches an `Ok`.
pub struct Memoize<B: KvBackend, A> {
    manager: StrategyManager<B>,
    key: KeyFn<A>,
    condition: Option<Condition<A>>,
    options: CacheOptions,
}

impl<B: KvBackend, A> Memoize<B, A> {
    pub fn new<K>(manager: StrategyManager<B>, key: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self {
            manager,
            key: Arc::new(key),
            condition: None,
            options: CacheOptions::default(),
        }
    }

    pub fn with_key_fn(manager: StrategyManager<B>, key: KeyFn<A>) -> Self {
        Self {
            manager,
            key,
            condition: None,
            options: CacheOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Only consult the cache when `condition(args)` holds.
    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub async fn call<T, E, F, Fut>(&self, args: A, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !applies(&self.condition, &args) {
            return f(args).await;
        }

        let key = (self.key)(&args);
        if let Some(cached) = self.manager.get::<T>(&key).await {
            debug!(key = %key, "memoized result served from cache");
            return Ok(cached);
        }

        let result = f(args).await;
        if let Ok(value) = &result {
            if let Err(err) = self.manager.set(&key, value, &self.options).await {
                error!(key = %key, error = %err, "failed to cache memoized result");
            }
        }
        result
    }
}

// == Evict After ==
pub enum EvictTarget<A> {
    /// The key derived from the call's arguments
    Key(KeyFn<A>),
    /// Every entry matching a glob pattern
    Pattern(String),
}

/// Runs `f`, then invalidates its target when `f` succeeded.
pub struct EvictAfter<B: KvBackend, A> {
    manager: StrategyManager<B>,
    target: EvictTarget<A>,
    condition: Option<Condition<A>>,
}

impl<B: KvBackend, A> EvictAfter<B, A> {
    pub fn key<K>(manager: StrategyManager<B>, key: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self {
            manager,
            target: EvictTarget::Key(Arc::new(key)),
            condition: None,
        }
    }

    pub fn pattern(manager: StrategyManager<B>, pattern: impl Into<String>) -> Self {
        Self {
            manager,
            target: EvictTarget::Pattern(pattern.into()),
            condition: None,
        }
    }

    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub async fn call<T, E, F, Fut>(&self, args: A, f: F) -> Result<T, E>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !applies(&self.condition, &args) {
            return f(args).await;
        }

        let key = match &self.target {
            EvictTarget::Key(key_fn) => Some(key_fn(&args)),
            EvictTarget::Pattern(_) => None,
        };

        let result = f(args).await;
        if result.is_err() {
            return result;
        }

        match (&self.target, key) {
            (EvictTarget::Pattern(pattern), _) => match self.manager.delete_pattern(pattern).await {
                Ok(count) => debug!(pattern = %pattern, count, "cache evicted by pattern"),
                Err(err) => error!(pattern = %pattern, error = %err, "failed to evict cache by pattern"),
            },
            (EvictTarget::Key(_), Some(key)) => match self.manager.delete(&key).await {
                Ok(()) => debug!(key = %key, "cache evicted"),
                Err(err) => error!(key = %key, error = %err, "failed to evict cache"),
            },
            (EvictTarget::Key(_), None) => {}
        }
        result
    }
}

// == Put Through ==
/// Always runs `f` and stores an `Ok` result under the key for `args`.
pub struct PutThrough<B: KvBackend, A> {
    manager: StrategyManager<B>,
    key: KeyFn<A>,
    condition: Option<Condition<A>>,
    options: CacheOptions,
}

impl<B: KvBackend, A> PutThrough<B, A> {
    pub fn new<K>(manager: StrategyManager<B>, key: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self {
            manager,
            key: Arc::new(key),
            condition: None,
            options: CacheOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub async fn call<T, E, F, Fut>(&self, args: A, f: F) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !applies(&self.condition, &args) {
            return f(args).await;
        }

        let key = (self.key)(&args);
        let result = f(args).await;
        if let Ok(value) = &result {
            match self.manager.set(&key, value, &self.options).await {
                Ok(()) => debug!(key = %key, "cache updated"),
                Err(err) => error!(key = %key, error = %err, "failed to update cache"),
            }
        }
        result
    }
}
