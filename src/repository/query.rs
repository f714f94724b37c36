use std::marker::PhantomData;

/// Lazily evaluated candidate set handed to [`Query::filter`].
///
/// Filtering stays lazy; ordering buffers the remaining candidates.
pub struct Candidates<'a, E> {
    iter: Box<dyn Iterator<Item = E> + 'a>,
}

impl<'a, E: 'a> Candidates<'a, E> {
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator<Item = E>,
        I::IntoIter: 'a,
    {
        Self {
            iter: Box::new(items.into_iter()),
        }
    }

    pub fn matching<P>(self, predicate: P) -> Self
    where
        P: FnMut(&E) -> bool + 'a,
    {
        Self::new(self.iter.filter(predicate))
    }

    pub fn order_by<K, F>(self, mut key: F) -> Self
    where
        K: Ord,
        F: FnMut(&E) -> K,
    {
        let mut items: Vec<E> = self.iter.collect();
        items.sort_by_key(|item| key(item));
        Self::new(items)
    }

    pub fn order_by_desc<K, F>(self, mut key: F) -> Self
    where
        K: Ord,
        F: FnMut(&E) -> K,
    {
        let mut items: Vec<E> = self.iter.collect();
        items.sort_by_key(|item| std::cmp::Reverse(key(item)));
        Self::new(items)
    }

    pub fn skip(self, n: usize) -> Self {
        Self::new(self.iter.skip(n))
    }

    pub fn take(self, n: usize) -> Self {
        Self::new(self.iter.take(n))
    }

    pub fn into_vec(self) -> Vec<E> {
        self.iter.collect()
    }

    pub fn count(self) -> usize {
        self.iter.count()
    }

    pub fn any(mut self) -> bool {
        self.iter.next().is_some()
    }
}

impl<'a, E> IntoIterator for Candidates<'a, E> {
    type Item = E;
    type IntoIter = Box<dyn Iterator<Item = E> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter
    }
}

/// A query over entities of type `E`.
///
/// `filter` must be pure: it may be evaluated more than once and must not
/// touch the session. Eager-load paths are dotted relation names such as
/// `"bar"` or `"bar.owner"`.
pub trait Query<E>: Send + Sync {
    fn filter<'a>(&'a self, candidates: Candidates<'a, E>) -> Candidates<'a, E> {
        candidates
    }

    fn eager_load_paths(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Every entity of the table
pub struct AllQuery<E> {
    paths: Vec<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> AllQuery<E> {
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn including(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }
}

impl<E> Default for AllQuery<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Query<E> for AllQuery<E> {
    fn eager_load_paths(&self) -> Vec<String> {
        self.paths.clone()
    }
}

/// Query built from a filter closure
pub struct FnQuery<E, F> {
    filter: F,
    paths: Vec<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, F> FnQuery<E, F>
where
    F: for<'a> Fn(Candidates<'a, E>) -> Candidates<'a, E> + Send + Sync,
{
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            paths: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn with_paths<I, P>(filter: F, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            filter,
            paths: paths.into_iter().map(Into::into).collect(),
            _entity: PhantomData,
        }
    }

    pub fn including(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }
}

impl<E, F> Query<E> for FnQuery<E, F>
where
    F: for<'a> Fn(Candidates<'a, E>) -> Candidates<'a, E> + Send + Sync,
{
    fn filter<'a>(&'a self, candidates: Candidates<'a, E>) -> Candidates<'a, E> {
        (self.filter)(candidates)
    }

    fn eager_load_paths(&self) -> Vec<String> {
        self.paths.clone()
    }
}
