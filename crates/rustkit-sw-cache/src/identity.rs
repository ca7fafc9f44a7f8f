//! Cache generation identifiers.
//!
//! Every generation of the persistent store is a named cache whose name
//! encodes the versions it belongs to:
//!
//! ```text
//! {app}_cache_v{cache}                                   current cache
//! {app}_cache_v{cache}_temp_v{worker}                    temp cache (install)
//! {app}_cache_v{cache}_refetch_checklist_v{refetch}      refetch checklist
//! {app}_cache_v{cache}_refetch_checklist_v{refetch}_temp_v{worker}
//! ```
//!
//! Names are parsed back into [`Generation`]s so that obsolete generations can
//! be found by comparing version numbers, never the strings themselves.

use std::cmp::Ordering;
use std::fmt;

const CACHE_TAG: &str = "_cache_v";
const TEMP_TAG: &str = "_temp_v";
const REFETCH_CHECKLIST_TAG: &str = "_refetch_checklist_v";

/// Kind of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationKind {
    /// Long-lived cache of the current cache version.
    Cache,
    /// Cache filled during install, merged into the current one on activate.
    TempCache,
    /// Set of resources already refetched for a refetch version.
    RefetchChecklist,
    /// Checklist filled during install.
    TempRefetchChecklist,
}

/// A parsed generation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    Cache {
        cache: u64,
    },
    TempCache {
        cache: u64,
        worker: u64,
    },
    RefetchChecklist {
        cache: u64,
        refetch: u64,
    },
    TempRefetchChecklist {
        cache: u64,
        refetch: u64,
        worker: u64,
    },
}

impl Generation {
    /// Kind of this generation.
    pub fn kind(&self) -> GenerationKind {
        match self {
            Generation::Cache { .. } => GenerationKind::Cache,
            Generation::TempCache { .. } => GenerationKind::TempCache,
            Generation::RefetchChecklist { .. } => GenerationKind::RefetchChecklist,
            Generation::TempRefetchChecklist { .. } => GenerationKind::TempRefetchChecklist,
        }
    }

    /// Render the identifier for an app.
    pub fn id(&self, app_name: &str) -> String {
        match *self {
            Generation::Cache { cache } => format!("{app_name}{CACHE_TAG}{cache}"),
            Generation::TempCache { cache, worker } => {
                format!("{app_name}{CACHE_TAG}{cache}{TEMP_TAG}{worker}")
            }
            Generation::RefetchChecklist { cache, refetch } => {
                format!("{app_name}{CACHE_TAG}{cache}{REFETCH_CHECKLIST_TAG}{refetch}")
            }
            Generation::TempRefetchChecklist {
                cache,
                refetch,
                worker,
            } => format!(
                "{app_name}{CACHE_TAG}{cache}{REFETCH_CHECKLIST_TAG}{refetch}{TEMP_TAG}{worker}"
            ),
        }
    }
}

/// Versions the worker is currently running with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveVersions {
    pub cache: u32,
    pub worker: u32,
    pub refetch: u32,
}

/// Derives and parses generation identifiers for one app.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheIdentity {
    app_name: String,
    active: ActiveVersions,
    temp_worker: u32,
}

impl CacheIdentity {
    /// Create an identity scheme.
    ///
    /// With `share_temp_data` every worker uses temp generations tagged with
    /// worker version 0, so a new worker resumes the partial install of the
    /// previous one.
    pub fn new(app_name: impl Into<String>, active: ActiveVersions, share_temp_data: bool) -> Self {
        Self {
            app_name: app_name.into(),
            active,
            temp_worker: if share_temp_data { 0 } else { active.worker },
        }
    }

    /// Current cache generation.
    pub fn cache(&self) -> Generation {
        Generation::Cache {
            cache: self.active.cache.into(),
        }
    }

    /// Temp cache generation of this worker.
    pub fn temp_cache(&self) -> Generation {
        Generation::TempCache {
            cache: self.active.cache.into(),
            worker: self.temp_worker.into(),
        }
    }

    /// Current refetch checklist generation.
    pub fn refetch_checklist(&self) -> Generation {
        Generation::RefetchChecklist {
            cache: self.active.cache.into(),
            refetch: self.active.refetch.into(),
        }
    }

    /// Temp refetch checklist generation of this worker.
    pub fn temp_refetch_checklist(&self) -> Generation {
        Generation::TempRefetchChecklist {
            cache: self.active.cache.into(),
            refetch: self.active.refetch.into(),
            worker: self.temp_worker.into(),
        }
    }

    pub fn cache_id(&self) -> String {
        self.cache().id(&self.app_name)
    }

    pub fn temp_cache_id(&self) -> String {
        self.temp_cache().id(&self.app_name)
    }

    pub fn refetch_checklist_id(&self) -> String {
        self.refetch_checklist().id(&self.app_name)
    }

    pub fn temp_refetch_checklist_id(&self) -> String {
        self.temp_refetch_checklist().id(&self.app_name)
    }

    /// Parse an identifier. Identifiers of other apps, or that do not follow
    /// the grammar exactly, are `None`.
    pub fn classify(&self, id: &str) -> Option<Generation> {
        let rest = id.strip_prefix(self.app_name.as_str())?;
        let (cache, rest) = take_version(rest, CACHE_TAG)?;
        if rest.is_empty() {
            return Some(Generation::Cache { cache });
        }

        if let Some((worker, rest)) = take_version(rest, TEMP_TAG) {
            return rest.is_empty().then_some(Generation::TempCache { cache, worker });
        }

        let (refetch, rest) = take_version(rest, REFETCH_CHECKLIST_TAG)?;
        if rest.is_empty() {
            return Some(Generation::RefetchChecklist { cache, refetch });
        }

        let (worker, rest) = take_version(rest, TEMP_TAG)?;
        rest.is_empty().then_some(Generation::TempRefetchChecklist {
            cache,
            refetch,
            worker,
        })
    }

    /// Whether a generation belongs to an older version and can be deleted.
    ///
    /// Versions are compared component-wise, coarsest first. Temp generations
    /// are also obsolete at the active worker version itself, since by the time
    /// this is asked their content has been merged into the current generation.
    pub fn is_obsolete(&self, generation: &Generation) -> bool {
        let active_cache = u64::from(self.active.cache);
        let active_worker = u64::from(self.active.worker);
        let active_refetch = u64::from(self.active.refetch);
        match *generation {
            Generation::Cache { cache } => cache < active_cache,
            Generation::TempCache { cache, worker } => {
                compare(&[cache, worker], &[active_cache, active_worker]) != Ordering::Greater
            }
            Generation::RefetchChecklist { cache, refetch } => {
                compare(&[cache, refetch], &[active_cache, active_refetch]) == Ordering::Less
            }
            Generation::TempRefetchChecklist {
                cache,
                refetch,
                worker,
            } => {
                compare(
                    &[cache, refetch, worker],
                    &[active_cache, active_refetch, active_worker],
                ) != Ordering::Greater
            }
        }
    }

    /// Classify an identifier and check if it is obsolete and of the given kind.
    pub fn should_delete(&self, id: &str, kind: GenerationKind) -> bool {
        self.classify(id)
            .is_some_and(|generation| generation.kind() == kind && self.is_obsolete(&generation))
    }
}

impl fmt::Debug for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheIdentity")
            .field("cache", &self.cache_id())
            .field("temp_cache", &self.temp_cache_id())
            .field("refetch_checklist", &self.refetch_checklist_id())
            .field("temp_refetch_checklist", &self.temp_refetch_checklist_id())
            .finish()
    }
}

fn compare(versions: &[u64], active: &[u64]) -> Ordering {
    versions.iter().cmp(active.iter())
}

/// Versions past `u64::MAX` do not parse; such identifiers are left alone.
fn take_version<'a>(text: &'a str, tag: &str) -> Option<(u64, &'a str)> {
    let rest = text.strip_prefix(tag)?;
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits == 0 {
        return None;
    }
    let version = rest[..digits].parse().ok()?;
    Some((version, &rest[digits..]))
}
