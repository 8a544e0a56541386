use arc_swap::ArcSwap;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// One generation of normalized domain names.
///
/// Built completely before it is installed into a [`SuffixTable`] and never
/// mutated afterwards.
#[derive(Debug, Default)]
pub struct DomainSet {
    domains: FxHashSet<Box<str>>,
}

impl DomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for DomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let domains = iter
            .into_iter()
            .map(|d| Box::from(d.as_ref()))
            .collect::<FxHashSet<Box<str>>>();
        Self { domains }
    }
}

/// Concurrency-safe handle to the current [`DomainSet`].
///
/// Readers take a snapshot of the installed generation and keep it for the
/// whole lookup; `replace` only swaps the pointer, so a reader sees either the
/// old set or the new one, never a mix.
#[derive(Debug)]
pub struct SuffixTable {
    current: ArcSwap<DomainSet>,
}

impl SuffixTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(DomainSet::new()),
        }
    }

    pub fn lookup(&self, domain: &str) -> bool {
        self.current.load().contains(domain)
    }

    /// Returns the installed generation.
    pub fn snapshot(&self) -> Arc<DomainSet> {
        self.current.load_full()
    }

    /// Installs `set` as the new generation.
    pub fn replace(&self, set: DomainSet) {
        self.current.store(Arc::new(set));
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

impl Default for SuffixTable {
    fn default() -> Self {
        Self::new()
    }
}
