use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::GameSession;

/// What an incident acts upon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetScope {
    World,
    Map,
    /// Any target kind the bridge cannot provide
    Other(String),
}

/// Opaque handle to a world or map owned by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(pub String);

/// Parameters an incident is checked and fired with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireParams {
    pub target: Target,
    /// Skip the incident's own chance and cooldown rolls
    pub forced: bool,
}

/// A game event a poll option can trigger
pub trait Incident: Send + Sync {
    fn def_name(&self) -> &str;

    fn label(&self) -> &str;

    fn scope(&self) -> TargetScope;

    /// Whether the incident could fire right now with these parameters
    fn can_fire_now(&self, params: &FireParams) -> bool;

    fn fire(&self, params: &FireParams) -> anyhow::Result<()>;
}

/// Build forced fire parameters for `incident` in the current session
///
/// `None` when the scope is unsupported or the session has no such target.
pub fn fire_params(incident: &dyn Incident, session: &dyn GameSession) -> Option<FireParams> {
    let target = match incident.scope() {
        TargetScope::World => session.world()?,
        TargetScope::Map => session.current_map()?,
        TargetScope::Other(_) => return None,
    };

    Some(FireParams {
        target,
        forced: true,
    })
}

/// Lookup key for an incident definition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncidentKey {
    pub mod_id: String,
    pub def_name: String,
}

impl IncidentKey {
    pub fn new(mod_id: impl Into<String>, def_name: impl Into<String>) -> Self {
        Self {
            mod_id: mod_id.into(),
            def_name: def_name.into(),
        }
    }
}

impl fmt::Display for IncidentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mod_id, self.def_name)
    }
}

/// Read-mostly map of the incidents the game offers
#[derive(Default, Clone)]
pub struct IncidentRegistry {
    entries: Arc<DashMap<IncidentKey, Arc<dyn Incident>>>,
}

impl IncidentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mod_id: impl Into<String>, incident: Arc<dyn Incident>) {
        let key = IncidentKey::new(mod_id, incident.def_name());
        debug!(key = %key, "Registering incident");
        self.entries.insert(key, incident);
    }

    /// Replace every entry, as done when the host reloads its definitions
    pub fn rebuild<I>(&self, incidents: I)
    where
        I: IntoIterator<Item = (String, Arc<dyn Incident>)>,
    {
        self.entries.clear();
        for (mod_id, incident) in incidents {
            self.register(mod_id, incident);
        }
    }

    pub fn resolve(&self, mod_id: &str, def_name: &str) -> Option<Arc<dyn Incident>> {
        self.entries
            .get(&IncidentKey::new(mod_id, def_name))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
