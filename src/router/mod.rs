//! # Runtime Router Manager
//!
//! The stateful core: a live route table mapping `(method, path)` to
//! installed handlers, mutated at runtime by deploy/undeploy/remove without
//! a process restart.
//!
//! ## Invariants
//! - At most one entry per `(method, path)`: installs replace, never stack
//! - The deployed flag is persisted before the table changes
//!   (persist-then-install); a crash in between is rectified at startup
//! - Undeploy swaps in a Gone stub at the same key so stale clients get 410
//!   instead of falling through to a shadowed handler
//! - The table lock is held only for map mutation or lookup, never across
//!   statement execution

pub mod pipeline;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::params::{self, ParamValidator};
use crate::store::{Mapping, MetaStore, ParamLocation, RateLimitSpec};

/// Route table key. Method is stored uppercase; path is the mapping's
/// declared pattern, `{segment}` placeholders included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: String,
    pub path: String,
}

/// A live handler's closed-over state. Query and connector are looked up by
/// id per request so a deletion after install surfaces as a consistency
/// fault instead of serving stale SQL.
#[derive(Debug)]
pub struct LiveRoute {
    pub mapping_id: String,
    pub query_id: String,
    pub connector_id: String,
    pub auth_required: bool,
    pub rate_limit: Option<RateLimitSpec>,
    pub validator: ParamValidator,
    /// Parameter names declared with `in: header`
    pub header_params: Vec<String>,
}

/// One installed route: either a live handler or the stub left behind by an
/// undeploy.
#[derive(Debug)]
pub enum RouteEntry {
    Live(LiveRoute),
    Gone { mapping_id: String },
}

/// Result of a deploy call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    Deployed,
    AlreadyDeployed,
}

/// Debug view of one installed route
#[derive(Debug, Serialize)]
pub struct RouteInfo {
    pub mapping_id: String,
    pub path: String,
    pub method: String,
    pub state: &'static str,
}

/// Owns the live route table. All mutation goes through deploy/undeploy/
/// remove/retract; nothing outside this type touches the table.
pub struct RouteManager {
    store: Arc<MetaStore>,
    table: RwLock<HashMap<RouteKey, Arc<RouteEntry>>>,
}

impl RouteManager {
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self {
            store,
            table: RwLock::new(HashMap::new()),
        }
    }

    fn key_for(mapping: &Mapping) -> RouteKey {
        RouteKey {
            method: mapping.method.clone(),
            path: mapping.path.clone(),
        }
    }

    /// Compile a mapping into a live entry. Compilation never fails for
    /// stored mappings; malformed descriptors were rejected at creation.
    fn build_live(mapping: &Mapping) -> Arc<RouteEntry> {
        let validator = params::compile(&mapping.params_json);
        let header_params = mapping
            .params_json
            .iter()
            .filter(|p| p.location == ParamLocation::Header)
            .map(|p| p.name.clone())
            .collect();
        Arc::new(RouteEntry::Live(LiveRoute {
            mapping_id: mapping.id.clone(),
            query_id: mapping.query_id.clone(),
            connector_id: mapping.connector_id.clone(),
            auth_required: mapping.auth_required,
            rate_limit: mapping.rate_limit,
            validator,
            header_params,
        }))
    }

    fn install(&self, key: RouteKey, entry: Arc<RouteEntry>) -> ApiResult<()> {
        let mut table = self
            .table
            .write()
            .map_err(|_| ApiError::Internal("route table lock poisoned".to_string()))?;
        table.insert(key, entry);
        Ok(())
    }

    /// Install a mapping's handler. Idempotent: an already-deployed mapping
    /// returns success without touching the table. Blocked while the
    /// mapping references a deleted connector or query.
    pub fn deploy(&self, mapping_id: &str) -> ApiResult<DeployOutcome> {
        let mapping = self
            .store
            .get_mapping(mapping_id)
            .ok_or_else(|| ApiError::NotFound("mapping".to_string()))?;

        if mapping.deployed {
            return Ok(DeployOutcome::AlreadyDeployed);
        }
        if !mapping.deployable() {
            return Err(ApiError::Conflict(
                "mapping references a deleted connector or query; fix or recreate it first"
                    .to_string(),
            ));
        }

        // Persist first: a crash here leaves a deployed flag with no live
        // route, which startup re-registration repairs. The reverse order
        // would leave a live route with no durable record.
        self.store.set_mapping_deployed(mapping_id, true)?;
        self.install(Self::key_for(&mapping), Self::build_live(&mapping))?;
        Ok(DeployOutcome::Deployed)
    }

    /// Retract a mapping's handler and leave a Gone stub at its key.
    pub fn undeploy(&self, mapping_id: &str) -> ApiResult<()> {
        let mapping = self
            .store
            .get_mapping(mapping_id)
            .ok_or_else(|| ApiError::NotFound("mapping".to_string()))?;

        self.store.set_mapping_deployed(mapping_id, false)?;
        self.install(
            Self::key_for(&mapping),
            Arc::new(RouteEntry::Gone {
                mapping_id: mapping.id.clone(),
            }),
        )
    }

    /// Forced retraction used when a cascade invalidated the mapping. The
    /// store has already cleared the deployed flag.
    pub fn retract(&self, mapping_id: &str) -> ApiResult<()> {
        let Some(mapping) = self.store.get_mapping(mapping_id) else {
            // already deleted; nothing to stub out
            return Ok(());
        };
        self.install(
            Self::key_for(&mapping),
            Arc::new(RouteEntry::Gone {
                mapping_id: mapping.id.clone(),
            }),
        )
    }

    /// Re-install every mapping flagged deployed in the registry. Called at
    /// startup; the persisted flag is not rewritten. Individual failures
    /// skip that mapping so one bad record cannot take down the rest.
    /// Returns (installed, skipped).
    pub fn redeploy_on_startup(&self) -> (usize, usize) {
        let mut installed = 0;
        let mut skipped = 0;
        for mapping in self.store.list_deployed() {
            if !mapping.deployable() {
                skipped += 1;
                continue;
            }
            match self.install(Self::key_for(&mapping), Self::build_live(&mapping)) {
                Ok(()) => installed += 1,
                Err(_) => skipped += 1,
            }
        }
        (installed, skipped)
    }

    /// Undeploy (if deployed) then delete the mapping from the registry.
    pub fn remove(&self, mapping_id: &str) -> ApiResult<()> {
        let mapping = self
            .store
            .get_mapping(mapping_id)
            .ok_or_else(|| ApiError::NotFound("mapping".to_string()))?;
        if mapping.deployed {
            self.undeploy(mapping_id)?;
        }
        self.store.delete_mapping(mapping_id)?;
        Ok(())
    }

    /// Match an inbound request against the table. Exact paths win over
    /// parameterized patterns; parameterized candidates are tried in
    /// lexicographic pattern order so matching is deterministic.
    ///
    /// The read guard is released before returning; callers hold only the
    /// entry `Arc` while executing.
    pub fn match_route(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(Arc<RouteEntry>, HashMap<String, String>)> {
        let table = self.table.read().ok()?;

        let exact = RouteKey {
            method: method.to_string(),
            path: path.to_string(),
        };
        if let Some(entry) = table.get(&exact) {
            return Some((entry.clone(), HashMap::new()));
        }

        let mut candidates: Vec<_> = table
            .iter()
            .filter(|(k, _)| k.method == method && k.path.contains('{'))
            .collect();
        candidates.sort_by(|a, b| a.0.path.cmp(&b.0.path));

        for (key, entry) in candidates {
            if let Some(captures) = match_pattern(&key.path, path) {
                return Some((entry.clone(), captures));
            }
        }
        None
    }

    /// Snapshot of the table for the debug endpoint
    pub fn installed_routes(&self) -> Vec<RouteInfo> {
        let Ok(table) = self.table.read() else {
            return Vec::new();
        };
        let mut out: Vec<RouteInfo> = table
            .iter()
            .map(|(key, entry)| {
                let (mapping_id, state) = match entry.as_ref() {
                    RouteEntry::Live(route) => (route.mapping_id.clone(), "live"),
                    RouteEntry::Gone { mapping_id } => (mapping_id.clone(), "gone"),
                };
                RouteInfo {
                    mapping_id,
                    path: key.path.clone(),
                    method: key.method.clone(),
                    state,
                }
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.method.cmp(&b.method)));
        out
    }

    /// Number of installed entries at a key (test hook for the
    /// at-most-one-handler invariant)
    pub fn entries_at(&self, method: &str, path: &str) -> usize {
        let Ok(table) = self.table.read() else {
            return 0;
        };
        usize::from(table.contains_key(&RouteKey {
            method: method.to_string(),
            path: path.to_string(),
        }))
    }
}

/// Match a declared pattern (`/people/{id}/posts`) against a concrete
/// request path, returning captured segments.
fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segs: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segs: Vec<&str> = path.trim_matches('/').split('/').collect();
    if pattern_segs.len() != path_segs.len() {
        return None;
    }

    let mut captures = HashMap::new();
    for (pat, seg) in pattern_segs.iter().zip(path_segs.iter()) {
        if let Some(name) = pat.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            if seg.is_empty() {
                return None;
            }
            captures.insert(name.to_string(), (*seg).to_string());
        } else if pat != seg {
            return None;
        }
    }
    Some(captures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ParamDescriptor, ParamType};

    fn manager() -> (tempfile::TempDir, Arc<MetaStore>, RouteManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path()).unwrap());
        let mgr = RouteManager::new(store.clone());
        (dir, store, mgr)
    }

    fn seed_mapping(store: &MetaStore, path: &str, method: &str) -> Mapping {
        let c = store.add_connector("db", "sqlite:///:memory:").unwrap();
        let q = store.add_query(&c.id, "q", "SELECT 1", false, None).unwrap();
        store
            .add_mapping(&q.id, &c.id, path, method, vec![], false, None)
            .unwrap()
    }

    #[test]
    fn test_deploy_installs_and_persists() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");

        assert_eq!(mgr.deploy(&m.id).unwrap(), DeployOutcome::Deployed);
        assert!(store.get_mapping(&m.id).unwrap().deployed);
        assert!(mgr.match_route("GET", "/t").is_some());
    }

    #[test]
    fn test_deploy_is_idempotent() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");

        mgr.deploy(&m.id).unwrap();
        assert_eq!(mgr.deploy(&m.id).unwrap(), DeployOutcome::AlreadyDeployed);
        assert_eq!(mgr.entries_at("GET", "/t"), 1);
        assert_eq!(mgr.installed_routes().len(), 1);
    }

    #[test]
    fn test_deploy_missing_mapping() {
        let (_dir, _store, mgr) = manager();
        assert!(matches!(mgr.deploy("nope"), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_undeploy_leaves_gone_stub() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");
        mgr.deploy(&m.id).unwrap();
        mgr.undeploy(&m.id).unwrap();

        assert!(!store.get_mapping(&m.id).unwrap().deployed);
        let (entry, _) = mgr.match_route("GET", "/t").unwrap();
        assert!(matches!(entry.as_ref(), RouteEntry::Gone { .. }));
    }

    #[test]
    fn test_inflight_entry_survives_undeploy() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");
        mgr.deploy(&m.id).unwrap();

        // a request that matched before the undeploy keeps its handler
        let (inflight, _) = mgr.match_route("GET", "/t").unwrap();
        mgr.undeploy(&m.id).unwrap();

        assert!(matches!(inflight.as_ref(), RouteEntry::Live(_)));
        let (after, _) = mgr.match_route("GET", "/t").unwrap();
        assert!(matches!(after.as_ref(), RouteEntry::Gone { .. }));
    }

    #[test]
    fn test_redeploy_after_undeploy_replaces_stub() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");
        mgr.deploy(&m.id).unwrap();
        mgr.undeploy(&m.id).unwrap();
        mgr.deploy(&m.id).unwrap();

        let (entry, _) = mgr.match_route("GET", "/t").unwrap();
        assert!(matches!(entry.as_ref(), RouteEntry::Live(_)));
        assert_eq!(mgr.entries_at("GET", "/t"), 1);
    }

    #[test]
    fn test_deploy_blocked_after_connector_deletion() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");
        mgr.deploy(&m.id).unwrap();

        let affected = store.delete_connector(&m.connector_id).unwrap();
        assert_eq!(affected, vec![m.id.clone()]);
        for id in &affected {
            mgr.retract(id).unwrap();
        }

        // live route is now a stub, and redeploy is blocked
        let (entry, _) = mgr.match_route("GET", "/t").unwrap();
        assert!(matches!(entry.as_ref(), RouteEntry::Gone { .. }));
        assert!(matches!(mgr.deploy(&m.id), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn test_redeploy_on_startup() {
        let (_dir, store, mgr) = manager();
        let m1 = seed_mapping(&store, "/a", "GET");
        let c = store.add_connector("db2", "sqlite:///:memory:").unwrap();
        let q = store.add_query(&c.id, "q2", "SELECT 2", false, None).unwrap();
        let m2 = store
            .add_mapping(&q.id, &c.id, "/b", "GET", vec![], false, None)
            .unwrap();

        store.set_mapping_deployed(&m1.id, true).unwrap();
        store.set_mapping_deployed(&m2.id, true).unwrap();
        // m2's connector disappears before restart
        store.delete_connector(&c.id).unwrap();

        let fresh = RouteManager::new(store.clone());
        let (installed, skipped) = fresh.redeploy_on_startup();
        assert_eq!(installed, 1);
        assert_eq!(skipped, 0); // m2 lost its deployed flag in the cascade
        assert!(fresh.match_route("GET", "/a").is_some());
        assert!(fresh.match_route("GET", "/b").is_none());
    }

    #[test]
    fn test_remove_undeploys_then_deletes() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");
        mgr.deploy(&m.id).unwrap();
        mgr.remove(&m.id).unwrap();

        assert!(store.get_mapping(&m.id).is_none());
        let (entry, _) = mgr.match_route("GET", "/t").unwrap();
        assert!(matches!(entry.as_ref(), RouteEntry::Gone { .. }));

        assert!(matches!(mgr.remove(&m.id), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_match_pattern_captures() {
        let caps = match_pattern("/people/{id}/posts", "/people/42/posts").unwrap();
        assert_eq!(caps.get("id").map(String::as_str), Some("42"));

        assert!(match_pattern("/people/{id}", "/people").is_none());
        assert!(match_pattern("/people/{id}", "/animals/42").is_none());
        assert!(match_pattern("/people/{id}", "/people/42/extra").is_none());
    }

    #[test]
    fn test_exact_match_wins_over_pattern() {
        let (_dir, store, mgr) = manager();
        let m1 = seed_mapping(&store, "/people/{id}", "GET");
        let c = store.get_connector(&m1.connector_id).unwrap();
        let q = store.get_query(&m1.query_id).unwrap();
        let m2 = store
            .add_mapping(&q.id, &c.id, "/people/me", "GET", vec![], false, None)
            .unwrap();
        mgr.deploy(&m1.id).unwrap();
        mgr.deploy(&m2.id).unwrap();

        let (entry, caps) = mgr.match_route("GET", "/people/me").unwrap();
        match entry.as_ref() {
            RouteEntry::Live(r) => assert_eq!(r.mapping_id, m2.id),
            RouteEntry::Gone { .. } => panic!("expected live route"),
        }
        assert!(caps.is_empty());

        let (entry, caps) = mgr.match_route("GET", "/people/42").unwrap();
        match entry.as_ref() {
            RouteEntry::Live(r) => assert_eq!(r.mapping_id, m1.id),
            RouteEntry::Gone { .. } => panic!("expected live route"),
        }
        assert_eq!(caps.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_method_isolation() {
        let (_dir, store, mgr) = manager();
        let m = seed_mapping(&store, "/t", "GET");
        mgr.deploy(&m.id).unwrap();
        assert!(mgr.match_route("POST", "/t").is_none());
    }

    #[test]
    fn test_validator_compiled_at_install() {
        let (_dir, store, mgr) = manager();
        let c = store.add_connector("db", "sqlite:///:memory:").unwrap();
        let q = store.add_query(&c.id, "q", "SELECT 1", false, None).unwrap();
        let descriptor = ParamDescriptor {
            name: "name".to_string(),
            location: ParamLocation::Query,
            param_type: ParamType::String,
            required: Some(true),
            default: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            strip: None,
        };
        let m = store
            .add_mapping(&q.id, &c.id, "/t", "GET", vec![descriptor], false, None)
            .unwrap();
        mgr.deploy(&m.id).unwrap();

        let (entry, _) = mgr.match_route("GET", "/t").unwrap();
        match entry.as_ref() {
            RouteEntry::Live(route) => {
                assert!(route.validator.field_names().contains(&"name"));
                assert!(route.validator.field_names().contains(&"limit"));
            }
            RouteEntry::Gone { .. } => panic!("expected live route"),
        }
    }
}
