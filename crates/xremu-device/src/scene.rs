//! Emulated world: the room box, user placed planes and meshes, ray casts.

use std::collections::BTreeMap;

use glam::{Mat4, Vec2, Vec3};
use tracing::debug;
use xremu_common::{RoomDimension, UserObject, UserObjectKind};

use crate::math::{compose, surface_frame};

const HIT_EPSILON: f32 = 1e-6;
const EDGE_TOLERANCE: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldObjectId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneOrientation {
    Horizontal,
    Vertical,
}

struct RoomFace {
    key: &'static str,
    label: &'static str,
    orientation: PlaneOrientation,
    quaternion: [f32; 4],
}

const FRAC_1_SQRT_2: f32 = 0.707_106_8;

const ROOM_FACES: [RoomFace; 6] = [
    RoomFace {
        key: "room-floor",
        label: "floor",
        orientation: PlaneOrientation::Horizontal,
        quaternion: [0.0, 0.0, 0.0, 1.0],
    },
    RoomFace {
        key: "room-ceiling",
        label: "ceiling",
        orientation: PlaneOrientation::Horizontal,
        quaternion: [0.0, 0.0, 1.0, 0.0],
    },
    RoomFace {
        key: "room-right",
        label: "wall",
        orientation: PlaneOrientation::Vertical,
        quaternion: [0.0, 0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2],
    },
    RoomFace {
        key: "room-left",
        label: "wall",
        orientation: PlaneOrientation::Vertical,
        quaternion: [0.0, 0.0, -FRAC_1_SQRT_2, FRAC_1_SQRT_2],
    },
    RoomFace {
        key: "room-back",
        label: "wall",
        orientation: PlaneOrientation::Vertical,
        quaternion: [-FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2],
    },
    RoomFace {
        key: "room-front",
        label: "wall",
        orientation: PlaneOrientation::Vertical,
        quaternion: [FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2],
    },
];

/// Detected plane. Geometry lives in the plane's local XZ plane, normal +Y.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub id: WorldObjectId,
    pub key: String,
    pub orientation: PlaneOrientation,
    pub semantic_label: String,
    pub transform: Mat4,
    pub half_extents: Vec2,
    /// Closed outline, first point repeated last.
    pub polygon: Vec<Vec3>,
    pub last_changed_time: f64,
}

impl Plane {
    fn new(
        id: WorldObjectId,
        key: &str,
        label: &str,
        orientation: PlaneOrientation,
        transform: Mat4,
        half_extents: Vec2,
        now: f64,
    ) -> Self {
        Self {
            id,
            key: key.to_string(),
            orientation,
            semantic_label: label.to_string(),
            transform,
            half_extents,
            polygon: outline(half_extents),
            last_changed_time: now,
        }
    }

    /// Set geometry and transform, stamping the change time only on change.
    fn update(&mut self, transform: Mat4, half_extents: Vec2, now: f64) -> bool {
        if self.transform == transform && self.half_extents == half_extents {
            return false;
        }
        self.transform = transform;
        self.half_extents = half_extents;
        self.polygon = outline(half_extents);
        self.last_changed_time = now;
        true
    }

    fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<(f32, Vec3, Vec3)> {
        let inverse = self.transform.inverse();
        let local_origin = inverse.transform_point3(origin);
        let local_direction = inverse.transform_vector3(direction);
        if local_direction.y.abs() < HIT_EPSILON {
            return None;
        }
        let t = -local_origin.y / local_direction.y;
        if t <= HIT_EPSILON {
            return None;
        }
        let local_hit = local_origin + local_direction * t;
        if local_hit.x.abs() > self.half_extents.x + EDGE_TOLERANCE
            || local_hit.z.abs() > self.half_extents.y + EDGE_TOLERANCE
        {
            return None;
        }
        let normal = self.transform.transform_vector3(Vec3::Y).normalize();
        let facing = if normal.dot(direction) > 0.0 { -normal } else { normal };
        Some((t, self.transform.transform_point3(local_hit), facing))
    }
}

fn outline(half: Vec2) -> Vec<Vec3> {
    vec![
        Vec3::new(half.x, 0.0, half.y),
        Vec3::new(half.x, 0.0, -half.y),
        Vec3::new(-half.x, 0.0, -half.y),
        Vec3::new(-half.x, 0.0, half.y),
        Vec3::new(half.x, 0.0, half.y),
    ]
}

/// Detected box mesh centered on its transform.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshObject {
    pub id: WorldObjectId,
    pub key: String,
    pub semantic_label: String,
    pub transform: Mat4,
    pub half_extents: Vec3,
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub last_changed_time: f64,
}

const BOX_INDICES: [u32; 36] = [
    0, 1, 2, 0, 2, 3, // -z
    4, 6, 5, 4, 7, 6, // +z
    0, 4, 5, 0, 5, 1, // -y
    3, 2, 6, 3, 6, 7, // +y
    0, 3, 7, 0, 7, 4, // -x
    1, 5, 6, 1, 6, 2, // +x
];

fn box_vertices(half: Vec3) -> Vec<Vec3> {
    vec![
        Vec3::new(-half.x, -half.y, -half.z),
        Vec3::new(half.x, -half.y, -half.z),
        Vec3::new(half.x, half.y, -half.z),
        Vec3::new(-half.x, half.y, -half.z),
        Vec3::new(-half.x, -half.y, half.z),
        Vec3::new(half.x, -half.y, half.z),
        Vec3::new(half.x, half.y, half.z),
        Vec3::new(-half.x, half.y, half.z),
    ]
}

impl MeshObject {
    fn new(id: WorldObjectId, key: &str, label: &str, transform: Mat4, half: Vec3, now: f64) -> Self {
        Self {
            id,
            key: key.to_string(),
            semantic_label: label.to_string(),
            transform,
            half_extents: half,
            vertices: box_vertices(half),
            indices: BOX_INDICES.to_vec(),
            last_changed_time: now,
        }
    }

    fn update(&mut self, transform: Mat4, half: Vec3, now: f64) -> bool {
        if self.transform == transform && self.half_extents == half {
            return false;
        }
        self.transform = transform;
        self.half_extents = half;
        self.vertices = box_vertices(half);
        self.last_changed_time = now;
        true
    }

    /// Slab test against the outside of the box.
    fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<(f32, Vec3, Vec3)> {
        let inverse = self.transform.inverse();
        let o = inverse.transform_point3(origin);
        let d = inverse.transform_vector3(direction);
        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;
        let mut near_axis = 0;
        for axis in 0..3 {
            let (oa, da, ha) = (o[axis], d[axis], self.half_extents[axis]);
            if da.abs() < HIT_EPSILON {
                if oa.abs() > ha {
                    return None;
                }
                continue;
            }
            let (mut t0, mut t1) = ((-ha - oa) / da, (ha - oa) / da);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            if t0 > t_near {
                t_near = t0;
                near_axis = axis;
            }
            t_far = t_far.min(t1);
            if t_near > t_far {
                return None;
            }
        }
        if t_near <= HIT_EPSILON {
            return None;
        }
        let mut local_normal = Vec3::ZERO;
        local_normal[near_axis] = -d[near_axis].signum();
        let point = self.transform.transform_point3(o + d * t_near);
        let normal = self.transform.transform_vector3(local_normal).normalize();
        Some((t_near, point, normal))
    }
}

#[derive(Debug)]
pub struct World {
    room: RoomDimension,
    room_planes: Vec<Plane>,
    user_planes: BTreeMap<String, Plane>,
    user_meshes: BTreeMap<String, MeshObject>,
    staged_room: Option<RoomDimension>,
    staged_objects: Option<BTreeMap<String, UserObject>>,
    next_id: u32,
}

impl World {
    pub fn new(room: RoomDimension, objects: &BTreeMap<String, UserObject>, now: f64) -> Self {
        let mut world = Self {
            room,
            room_planes: Vec::new(),
            user_planes: BTreeMap::new(),
            user_meshes: BTreeMap::new(),
            staged_room: None,
            staged_objects: None,
            next_id: 0,
        };
        world.build_room(now);
        world.apply_user_objects(objects, now);
        world
    }

    fn allocate(&mut self) -> WorldObjectId {
        self.next_id += 1;
        WorldObjectId(self.next_id)
    }

    pub fn room(&self) -> RoomDimension {
        self.room
    }

    pub fn stage_room_dimension(&mut self, room: RoomDimension) {
        self.staged_room = Some(room);
    }

    pub fn stage_user_objects(&mut self, objects: BTreeMap<String, UserObject>) {
        self.staged_objects = Some(objects);
    }

    /// Apply staged changes with `now` as the change time.
    ///
    /// Returns whether any object changed.
    pub fn apply_staged(&mut self, now: f64) -> bool {
        let mut changed = false;
        if let Some(room) = self.staged_room.take() {
            if room != self.room {
                self.room = room;
                changed |= self.build_room(now);
            }
        }
        if let Some(objects) = self.staged_objects.take() {
            changed |= self.apply_user_objects(&objects, now);
        }
        if changed {
            debug!(now, "world changed");
        }
        changed
    }

    fn build_room(&mut self, now: f64) -> bool {
        let RoomDimension { x, y, z } = self.room;
        let layout = [
            ([0.0, 0.0, 0.0], Vec2::new(x / 2.0, z / 2.0)),
            ([0.0, y, 0.0], Vec2::new(x / 2.0, z / 2.0)),
            ([x / 2.0, y / 2.0, 0.0], Vec2::new(y / 2.0, z / 2.0)),
            ([-x / 2.0, y / 2.0, 0.0], Vec2::new(y / 2.0, z / 2.0)),
            ([0.0, y / 2.0, z / 2.0], Vec2::new(x / 2.0, y / 2.0)),
            ([0.0, y / 2.0, -z / 2.0], Vec2::new(x / 2.0, y / 2.0)),
        ];
        if self.room_planes.len() == ROOM_FACES.len() {
            let mut changed = false;
            for (plane, ((position, half), face)) in
                self.room_planes.iter_mut().zip(layout.into_iter().zip(&ROOM_FACES))
            {
                let transform = compose(position, face.quaternion, Vec3::ONE);
                changed |= plane.update(transform, half, now);
            }
            return changed;
        }
        let mut planes = Vec::with_capacity(ROOM_FACES.len());
        for ((position, half), face) in layout.into_iter().zip(&ROOM_FACES) {
            let transform = compose(position, face.quaternion, Vec3::ONE);
            let id = self.allocate();
            planes.push(Plane::new(id, face.key, face.label, face.orientation, transform, half, now));
        }
        self.room_planes = planes;
        true
    }

    fn apply_user_objects(&mut self, objects: &BTreeMap<String, UserObject>, now: f64) -> bool {
        let mut changed = false;
        let live: BTreeMap<&String, &UserObject> =
            objects.iter().filter(|(_, object)| object.active).collect();

        let before = self.user_planes.len() + self.user_meshes.len();
        self.user_planes
            .retain(|key, _| live.get(key).is_some_and(|o| o.kind == UserObjectKind::Plane));
        self.user_meshes
            .retain(|key, _| live.get(key).is_some_and(|o| o.kind == UserObjectKind::Mesh));
        changed |= self.user_planes.len() + self.user_meshes.len() != before;

        for (key, object) in live {
            let transform = compose(object.position, object.quaternion, Vec3::ONE);
            match object.kind {
                UserObjectKind::Plane => {
                    let half = Vec2::new(object.width / 2.0, object.height / 2.0);
                    if let Some(plane) = self.user_planes.get_mut(key) {
                        changed |= plane.update(transform, half, now);
                    } else {
                        let orientation = if object.is_vertical {
                            PlaneOrientation::Vertical
                        } else {
                            PlaneOrientation::Horizontal
                        };
                        let id = self.allocate();
                        let plane = Plane::new(
                            id,
                            key,
                            &object.semantic_label,
                            orientation,
                            transform,
                            half,
                            now,
                        );
                        self.user_planes.insert(key.clone(), plane);
                        changed = true;
                    }
                }
                UserObjectKind::Mesh => {
                    let half = Vec3::new(object.width, object.height, object.depth) / 2.0;
                    if let Some(mesh) = self.user_meshes.get_mut(key) {
                        changed |= mesh.update(transform, half, now);
                    } else {
                        let id = self.allocate();
                        let mesh =
                            MeshObject::new(id, key, &object.semantic_label, transform, half, now);
                        self.user_meshes.insert(key.clone(), mesh);
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    /// Room planes first, then user planes.
    pub fn planes(&self) -> impl Iterator<Item = &Plane> + '_ {
        self.room_planes.iter().chain(self.user_planes.values())
    }

    pub fn meshes(&self) -> impl Iterator<Item = &MeshObject> + '_ {
        self.user_meshes.values()
    }

    pub fn plane(&self, id: WorldObjectId) -> Option<&Plane> {
        self.planes().find(|p| p.id == id)
    }

    pub fn mesh(&self, id: WorldObjectId) -> Option<&MeshObject> {
        self.meshes().find(|m| m.id == id)
    }

    pub fn object_matrix(&self, id: WorldObjectId) -> Option<Mat4> {
        self.plane(id)
            .map(|p| p.transform)
            .or_else(|| self.mesh(id).map(|m| m.transform))
    }

    /// Cast a world-space ray; results are reticle frames, nearest first.
    ///
    /// Room faces and user planes are double sided, meshes only report the
    /// face the ray enters through. Each frame's +Y axis is the surface
    /// normal facing the ray origin.
    pub fn hit_test(&self, origin: Vec3, direction: Vec3) -> Vec<Mat4> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return Vec::new();
        }
        let mut hits: Vec<(f32, Vec3, Vec3)> = self
            .planes()
            .filter_map(|plane| plane.intersect(origin, direction))
            .chain(self.meshes().filter_map(|mesh| mesh.intersect(origin, direction)))
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter()
            .map(|(_, point, normal)| surface_frame(point, normal))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_object(kind: UserObjectKind, position: [f32; 3]) -> UserObject {
        UserObject {
            kind,
            width: 1.0,
            height: 0.5,
            depth: 1.0,
            is_vertical: false,
            semantic_label: "table".to_string(),
            position,
            quaternion: [0.0, 0.0, 0.0, 1.0],
            active: true,
        }
    }

    #[test]
    fn test_room_has_six_planes() {
        let world = World::new(RoomDimension::default(), &BTreeMap::new(), 0.0);
        let planes: Vec<_> = world.planes().collect();
        assert_eq!(planes.len(), 6);
        assert_eq!(planes[0].semantic_label, "floor");
        assert_eq!(planes[1].semantic_label, "ceiling");
        assert!(planes[2..].iter().all(|p| p.orientation == PlaneOrientation::Vertical));
        assert_eq!(planes[0].polygon.len(), 5);
        assert_eq!(planes[0].polygon[0], planes[0].polygon[4]);
    }

    #[test]
    fn test_room_faces_point_inward() {
        let world = World::new(RoomDimension::default(), &BTreeMap::new(), 0.0);
        let center = Vec3::new(0.0, 1.5, 0.0);
        for plane in world.planes() {
            let normal = plane.transform.transform_vector3(Vec3::Y);
            let to_center = center - plane.transform.w_axis.truncate();
            assert!(normal.dot(to_center) > 0.0, "{} faces outward", plane.key);
        }
    }

    #[test]
    fn test_floor_hit_from_above() {
        let world = World::new(RoomDimension::default(), &BTreeMap::new(), 0.0);
        let hits = world.hit_test(Vec3::new(0.5, 1.6, -0.5), Vec3::NEG_Y);
        assert_eq!(hits.len(), 1);
        let hit = hits[0];
        assert!((hit.w_axis.truncate() - Vec3::new(0.5, 0.0, -0.5)).length() < 1e-5);
        assert!((hit.y_axis.truncate() - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_mesh_hit_is_nearest_first() {
        let mut objects = BTreeMap::new();
        objects.insert("box".to_string(), user_object(UserObjectKind::Mesh, [0.0, 0.25, -2.0]));
        let world = World::new(RoomDimension::default(), &objects, 0.0);
        let hits = world.hit_test(Vec3::new(0.0, 0.25, 0.0), Vec3::NEG_Z);
        assert_eq!(hits.len(), 2);
        assert!((hits[0].w_axis.z - -1.5).abs() < 1e-5);
        assert!((hits[0].y_axis.truncate() - Vec3::Z).length() < 1e-5);
        assert!((hits[1].w_axis.z - -3.0).abs() < 1e-5);
    }

    #[test]
    fn test_ray_inside_mesh_ignores_back_faces() {
        let mut objects = BTreeMap::new();
        objects.insert("box".to_string(), user_object(UserObjectKind::Mesh, [0.0, 0.25, 0.0]));
        let world = World::new(RoomDimension::default(), &objects, 0.0);
        let hits = world.hit_test(Vec3::new(0.0, 0.25, 0.0), Vec3::NEG_Z);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_staged_changes_apply_on_tick() {
        let mut world = World::new(RoomDimension::default(), &BTreeMap::new(), 0.0);
        let mut objects = BTreeMap::new();
        objects.insert("desk".to_string(), user_object(UserObjectKind::Plane, [0.0, 0.7, -1.0]));
        world.stage_user_objects(objects.clone());
        assert_eq!(world.planes().count(), 6);
        assert!(world.apply_staged(16.0));
        let desk = world.planes().find(|p| p.key == "desk").unwrap();
        assert_eq!(desk.last_changed_time, 16.0);
        let id = desk.id;

        world.stage_user_objects(objects.clone());
        assert!(!world.apply_staged(32.0));
        assert_eq!(world.plane(id).unwrap().last_changed_time, 16.0);

        objects.get_mut("desk").unwrap().position = [0.0, 0.8, -1.0];
        world.stage_user_objects(objects.clone());
        assert!(world.apply_staged(48.0));
        assert_eq!(world.plane(id).unwrap().last_changed_time, 48.0);

        objects.get_mut("desk").unwrap().active = false;
        world.stage_user_objects(objects);
        assert!(world.apply_staged(64.0));
        assert!(world.plane(id).is_none());
    }

    #[test]
    fn test_room_resize_keeps_ids() {
        let mut world = World::new(RoomDimension::default(), &BTreeMap::new(), 0.0);
        let ids: Vec<_> = world.planes().map(|p| p.id).collect();
        world.stage_room_dimension(RoomDimension { x: 4.0, y: 2.5, z: 5.0 });
        assert!(world.apply_staged(10.0));
        let after: Vec<_> = world.planes().map(|p| p.id).collect();
        assert_eq!(ids, after);
        let ceiling = world.planes().nth(1).unwrap();
        assert!((ceiling.transform.w_axis.y - 2.5).abs() < 1e-6);
        assert_eq!(ceiling.last_changed_time, 10.0);
    }
}
