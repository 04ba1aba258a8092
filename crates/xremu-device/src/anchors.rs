//! Spatial anchors and their durable persistence.
//!
//! Persistent anchors live in the key-value store under
//! `xremu-anchor:<origin>/<uuid>`, each value a JSON array of the 16
//! column-major base matrix components.

use std::collections::{BTreeMap, BTreeSet};

use glam::Mat4;
use tracing::{debug, warn};
use uuid::Uuid;
use xremu_common::KeyValueStore;
use xremu_vr::{XrError, XrResult};

use crate::session::SessionId;
use crate::space::SpaceId;

pub const ANCHOR_KEY_PREFIX: &str = "xremu-anchor:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorId(pub(crate) u32);

#[derive(Debug)]
struct Anchor {
    session: SessionId,
    base: Mat4,
    space: SpaceId,
    deleted: bool,
    uuid: Option<String>,
}

#[derive(Debug, Default)]
struct SessionAnchors {
    tracked: BTreeSet<AnchorId>,
    persistent: BTreeMap<String, AnchorId>,
}

pub struct AnchorStore {
    /// Indexed by anchor id; anchors are never removed.
    anchors: Vec<Anchor>,
    sessions: BTreeMap<SessionId, SessionAnchors>,
    store: Box<dyn KeyValueStore>,
    origin: String,
}

impl std::fmt::Debug for AnchorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorStore")
            .field("anchors", &self.anchors.len())
            .field("origin", &self.origin)
            .finish()
    }
}

fn encode(matrix: &Mat4) -> XrResult<String> {
    serde_json::to_string(&matrix.to_cols_array()).map_err(XrError::storage)
}

fn decode(value: &str) -> Option<Mat4> {
    let cols: [f32; 16] = serde_json::from_str(value).ok()?;
    Some(Mat4::from_cols_array(&cols))
}

impl AnchorStore {
    pub fn new(store: Box<dyn KeyValueStore>, origin: impl Into<String>) -> Self {
        Self {
            anchors: Vec::new(),
            sessions: BTreeMap::new(),
            store,
            origin: origin.into(),
        }
    }

    pub fn into_store(self) -> Box<dyn KeyValueStore> {
        self.store
    }

    fn prefix(&self) -> String {
        format!("{ANCHOR_KEY_PREFIX}{}/", self.origin)
    }

    fn key(&self, uuid: &str) -> String {
        format!("{}{uuid}", self.prefix())
    }

    fn anchor(&self, id: AnchorId) -> XrResult<&Anchor> {
        self.anchors
            .get(id.0 as usize)
            .ok_or_else(|| XrError::invalid_state("unknown anchor"))
    }

    fn live(&self, id: AnchorId) -> XrResult<&Anchor> {
        let anchor = self.anchor(id)?;
        if anchor.deleted {
            return Err(XrError::invalid_state("anchor has been deleted"));
        }
        let tracked = self
            .sessions
            .get(&anchor.session)
            .is_some_and(|s| s.tracked.contains(&id));
        if !tracked {
            return Err(XrError::invalid_state("anchor is not tracked by its session"));
        }
        Ok(anchor)
    }

    fn push(&mut self, session: SessionId, base: Mat4, space: SpaceId, uuid: Option<String>) -> AnchorId {
        let id = AnchorId(self.anchors.len() as u32);
        self.anchors.push(Anchor {
            session,
            base,
            space,
            deleted: false,
            uuid,
        });
        id
    }

    /// New tracked anchor at `base`, exposed through `space`.
    pub fn create(&mut self, session: SessionId, base: Mat4, space: SpaceId) -> AnchorId {
        let id = self.push(session, base, space, None);
        self.sessions.entry(session).or_default().tracked.insert(id);
        debug!(anchor = id.0, session = session.0, "anchor created");
        id
    }

    /// Stop tracking `id`. The handle stays allocated and inert.
    pub fn delete(&mut self, id: AnchorId) -> XrResult<()> {
        let session = self.anchor(id)?.session;
        if let Some(anchors) = self.sessions.get_mut(&session) {
            anchors.tracked.remove(&id);
        }
        if let Some(anchor) = self.anchors.get_mut(id.0 as usize) {
            anchor.deleted = true;
        }
        Ok(())
    }

    pub fn anchor_space(&self, id: AnchorId) -> XrResult<SpaceId> {
        self.live(id).map(|a| a.space)
    }

    pub fn base_matrix(&self, id: AnchorId) -> XrResult<Mat4> {
        self.live(id).map(|a| a.base)
    }

    pub fn session_of(&self, id: AnchorId) -> XrResult<SessionId> {
        self.anchor(id).map(|a| a.session)
    }

    pub fn is_deleted(&self, id: AnchorId) -> bool {
        self.anchor(id).map(|a| a.deleted).unwrap_or(true)
    }

    /// Persist `id`, returning its uuid. Repeated calls return the same uuid.
    pub fn request_persistent_handle(&mut self, id: AnchorId) -> XrResult<String> {
        let anchor = self.live(id)?;
        if let Some(uuid) = &anchor.uuid {
            return Ok(uuid.clone());
        }
        let (session, value) = (anchor.session, encode(&anchor.base)?);
        let uuid = Uuid::new_v4().to_string();
        let key = self.key(&uuid);
        self.store.set(&key, value).map_err(XrError::storage)?;
        if let Some(anchor) = self.anchors.get_mut(id.0 as usize) {
            anchor.uuid = Some(uuid.clone());
        }
        self.sessions
            .entry(session)
            .or_default()
            .persistent
            .insert(uuid.clone(), id);
        debug!(anchor = id.0, %uuid, "anchor persisted");
        Ok(uuid)
    }

    /// Load every stored anchor of this origin into `session`'s persistent
    /// map without tracking them. Returns how many were restored.
    pub fn restore_persistent_anchors(
        &mut self,
        session: SessionId,
        mut make_space: impl FnMut(Mat4) -> SpaceId,
    ) -> usize {
        let prefix = self.prefix();
        let mut restored = 0;
        for key in self.store.keys_with_prefix(&prefix) {
            let Some(uuid) = key.strip_prefix(&prefix).map(str::to_string) else {
                continue;
            };
            let Some(base) = self.store.get(&key).as_deref().and_then(decode) else {
                warn!(%key, "skipping malformed persistent anchor");
                continue;
            };
            let id = self.push(session, base, make_space(base), Some(uuid.clone()));
            self.sessions.entry(session).or_default().persistent.insert(uuid, id);
            restored += 1;
        }
        if restored > 0 {
            debug!(session = session.0, restored, "persistent anchors restored");
        }
        restored
    }

    /// Start tracking the persistent anchor `uuid`.
    ///
    /// A previously deleted handle is replaced by a fresh anchor rebuilt
    /// from storage.
    pub fn restore_persistent_anchor(
        &mut self,
        session: SessionId,
        uuid: &str,
        make_space: impl FnOnce(Mat4) -> SpaceId,
    ) -> XrResult<AnchorId> {
        let existing = self
            .sessions
            .get(&session)
            .and_then(|s| s.persistent.get(uuid).copied())
            .ok_or_else(|| XrError::invalid_state(format!("unknown persistent anchor {uuid}")))?;
        let id = if self.is_deleted(existing) {
            let base = self
                .store
                .get(&self.key(uuid))
                .as_deref()
                .and_then(decode)
                .ok_or_else(|| XrError::invalid_state(format!("unknown persistent anchor {uuid}")))?;
            self.push(session, base, make_space(base), Some(uuid.to_string()))
        } else {
            existing
        };
        let anchors = self.sessions.entry(session).or_default();
        anchors.tracked.insert(id);
        anchors.persistent.insert(uuid.to_string(), id);
        Ok(id)
    }

    /// Untrack the persistent anchor `uuid` and remove its durable entry.
    pub fn delete_persistent_anchor(&mut self, session: SessionId, uuid: &str) -> XrResult<()> {
        let id = self
            .sessions
            .get_mut(&session)
            .and_then(|s| s.persistent.remove(uuid))
            .ok_or_else(|| XrError::invalid_state(format!("unknown persistent anchor {uuid}")))?;
        self.delete(id)?;
        let key = self.key(uuid);
        self.store.remove(&key).map_err(XrError::storage)?;
        debug!(%uuid, "persistent anchor deleted");
        Ok(())
    }

    pub fn tracked_anchors(&self, session: SessionId) -> Vec<AnchorId> {
        self.sessions
            .get(&session)
            .map(|s| s.tracked.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn persistent_anchors(&self, session: SessionId) -> Vec<(String, AnchorId)> {
        self.sessions
            .get(&session)
            .map(|s| s.persistent.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    /// Forget a session's anchors; their handles become inert.
    pub fn end_session(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        for anchor in self.anchors.iter_mut().filter(|a| a.session == session) {
            anchor.deleted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use xremu_common::MemoryStore;

    fn space() -> impl FnMut(Mat4) -> SpaceId {
        let mut next = 100;
        move |_| {
            next += 1;
            SpaceId::Registered(next)
        }
    }

    #[test]
    fn test_deleted_anchor_is_inert() {
        let mut anchors = AnchorStore::new(Box::new(MemoryStore::new()), "https://example.test");
        let session = SessionId(1);
        let id = anchors.create(session, Mat4::IDENTITY, SpaceId::Registered(4));
        assert_eq!(anchors.tracked_anchors(session), vec![id]);
        anchors.delete(id).unwrap();
        assert!(matches!(anchors.anchor_space(id), Err(XrError::InvalidState(_))));
        assert!(anchors.tracked_anchors(session).is_empty());

        let next = anchors.create(session, Mat4::IDENTITY, SpaceId::Registered(5));
        assert_ne!(id, next);
    }

    #[test]
    fn test_untracked_restored_anchor_is_inaccessible() {
        let base = Mat4::from_translation(Vec3::new(0.0, 1.0, -1.0));
        let mut anchors = AnchorStore::new(Box::new(MemoryStore::new()), "o");
        let id = anchors.create(SessionId(1), base, SpaceId::Registered(0));
        anchors.request_persistent_handle(id).unwrap();
        anchors.end_session(SessionId(1));

        let mut anchors = AnchorStore::new(anchors.into_store(), "o");
        let session = SessionId(2);
        anchors.restore_persistent_anchors(session, space());
        let (uuid, untracked) = anchors.persistent_anchors(session)[0].clone();
        assert!(matches!(anchors.anchor_space(untracked), Err(XrError::InvalidState(_))));
        assert!(matches!(anchors.base_matrix(untracked), Err(XrError::InvalidState(_))));
        assert!(anchors.request_persistent_handle(untracked).is_err());

        let restored = anchors.restore_persistent_anchor(session, &uuid, |_| SpaceId::Registered(9)).unwrap();
        assert_eq!(restored, untracked);
        assert_eq!(anchors.anchor_space(restored).unwrap(), SpaceId::Registered(101));
        assert_eq!(anchors.base_matrix(restored).unwrap(), base);
    }

    #[test]
    fn test_persistent_handle_is_idempotent() {
        let mut anchors = AnchorStore::new(Box::new(MemoryStore::new()), "https://example.test");
        let session = SessionId(1);
        let id = anchors.create(session, Mat4::IDENTITY, SpaceId::Registered(0));
        let first = anchors.request_persistent_handle(id).unwrap();
        let second = anchors.request_persistent_handle(id).unwrap();
        assert_eq!(first, second);
        let store = anchors.into_store();
        assert_eq!(
            store.keys_with_prefix("xremu-anchor:https://example.test/"),
            vec![format!("xremu-anchor:https://example.test/{first}")]
        );
    }

    #[test]
    fn test_restore_across_sessions() {
        let base = Mat4::from_translation(Vec3::new(1.0, 0.5, -2.0));
        let mut anchors = AnchorStore::new(Box::new(MemoryStore::new()), "o");
        let id = anchors.create(SessionId(1), base, SpaceId::Registered(0));
        let uuid = anchors.request_persistent_handle(id).unwrap();
        anchors.end_session(SessionId(1));

        // a fresh store over the same storage, as after a reload
        let mut anchors = AnchorStore::new(anchors.into_store(), "o");
        let session = SessionId(2);
        assert_eq!(anchors.restore_persistent_anchors(session, space()), 1);
        assert!(anchors.tracked_anchors(session).is_empty());
        let (stored_uuid, _) = anchors.persistent_anchors(session)[0].clone();
        assert_eq!(stored_uuid, uuid);

        let restored = anchors.restore_persistent_anchor(session, &uuid, |_| SpaceId::Registered(9)).unwrap();
        assert_eq!(anchors.tracked_anchors(session), vec![restored]);
        assert_eq!(anchors.base_matrix(restored).unwrap(), base);
        assert!(anchors
            .restore_persistent_anchor(session, "missing", |_| SpaceId::Registered(9))
            .is_err());

        anchors.delete_persistent_anchor(session, &uuid).unwrap();
        assert!(anchors.tracked_anchors(session).is_empty());
        assert!(anchors.persistent_anchors(session).is_empty());
        let store = anchors.into_store();
        assert!(store.keys_with_prefix(ANCHOR_KEY_PREFIX).is_empty());
    }

    #[test]
    fn test_origins_are_isolated() {
        let mut anchors = AnchorStore::new(Box::new(MemoryStore::new()), "a");
        let id = anchors.create(SessionId(1), Mat4::IDENTITY, SpaceId::Registered(0));
        anchors.request_persistent_handle(id).unwrap();
        let mut other = AnchorStore::new(anchors.into_store(), "b");
        assert_eq!(other.restore_persistent_anchors(SessionId(2), space()), 0);
    }
}
