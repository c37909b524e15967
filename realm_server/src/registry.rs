//! Concurrent entity registry.
//!
//! The registry is the one piece of state shared between the tick loop and
//! every connection task. Three co-indexed views of the live player set are
//! kept behind a single lock and always mutated as one atomic group:
//!
//! - `entities`: the native map the tick loop iterates and mutates,
//! - `wire_keys`: the stringified id each entity is broadcast under,
//! - `by_conn`: reverse map from the owning connection to its entity,
//!   used to resolve "which player disconnected" on a read failure.
//!
//! Synchronization contract: the tick loop takes the write lock for its
//! combined advance+snapshot window; `add`/`remove` take the same write
//! lock, which also total-orders structural mutations against each other.
//! `apply_movement` writes a single entity's velocity in place under the
//! same lock; its critical section is O(1), so it never stalls a mutator or
//! the tick for longer than a field update. No lock is held across I/O.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use realm_shared::player::{Direction, EntityId, Player};
use tracing::{debug, warn};

use crate::connection::ConnId;

#[derive(Default)]
struct Views {
    entities: HashMap<EntityId, Player>,
    wire_keys: HashMap<EntityId, String>,
    by_conn: HashMap<ConnId, EntityId>,
}

/// The concurrent store of live players, keyed by identity.
pub struct EntityRegistry {
    views: RwLock<Views>,
    /// Monotonic id source. Independent of the registry lock so ids can be
    /// assigned while a mutation is in progress. Never rolled back: an
    /// abandoned handshake leaves a gap, which is accepted.
    next_id: AtomicU64,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            views: RwLock::new(Views::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Assigns a fresh, never-reused entity id.
    pub fn allocate_id(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts a registered player into all three views as one atomic group.
    /// Must not be called twice for the same id or connection.
    pub fn add(&self, conn: ConnId, player: Player) {
        let id = player.id();
        let mut views = self.write();
        debug_assert!(!views.entities.contains_key(&id), "duplicate add for {id}");
        views.wire_keys.insert(id, id.to_string());
        views.by_conn.insert(conn, id);
        views.entities.insert(id, player);
        debug!(%id, %conn, "Registered entity");
    }

    /// Removes the player owned by `conn` from all three views, returning
    /// its id. Unknown handles are tolerated (overlapping error paths can
    /// trigger a double removal) and yield `None`.
    pub fn remove(&self, conn: ConnId) -> Option<EntityId> {
        let mut views = self.write();
        let id = views.by_conn.remove(&conn)?;
        views.wire_keys.remove(&id);
        views.entities.remove(&id);
        debug!(%id, %conn, "Removed entity");
        Some(id)
    }

    /// Sets or clears one velocity component of the addressed entity.
    /// An absent id is not an error: the entity may have disconnected
    /// between message send and processing. Returns whether it was applied.
    pub fn apply_movement(&self, id: EntityId, dir: Direction, starting: bool) -> bool {
        let mut views = self.write();
        match views.entities.get_mut(&id) {
            Some(player) => {
                player.entity.set_moving(dir, starting);
                true
            }
            None => {
                warn!(%id, ?dir, "Movement for unknown entity, dropped");
                false
            }
        }
    }

    /// Point-in-time copy of all players, keyed by their wire key.
    pub fn snapshot(&self) -> BTreeMap<String, Player> {
        let views = self.read();
        Self::collect(&views)
    }

    /// The tick's exclusive window: integrate every entity's motion over
    /// `dt` seconds, then snapshot, under a single lock acquisition so the
    /// broadcast can never observe a torn view.
    pub fn advance_and_snapshot(&self, dt: f32) -> BTreeMap<String, Player> {
        let mut views = self.write();
        for player in views.entities.values_mut() {
            player.entity.advance(dt);
        }
        Self::collect(&views)
    }

    pub fn len(&self) -> usize {
        self.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the three views agree entry-for-entry. An id present in one
    /// view must be present in all three.
    pub fn views_consistent(&self) -> bool {
        let views = self.read();
        if views.entities.len() != views.wire_keys.len()
            || views.entities.len() != views.by_conn.len()
        {
            return false;
        }
        let keys_match = views
            .entities
            .keys()
            .all(|id| views.wire_keys.get(id).is_some_and(|k| k == &id.to_string()));
        let conns_match = views.by_conn.values().all(|id| {
            views.entities.get(id).is_some_and(|p| p.id() == *id)
        });
        keys_match && conns_match
    }

    fn collect(views: &Views) -> BTreeMap<String, Player> {
        views
            .entities
            .iter()
            .map(|(id, player)| (views.wire_keys[id].clone(), player.clone()))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Views> {
        self.views.read().expect("registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Views> {
        self.views.write().expect("registry lock poisoned")
    }
}
