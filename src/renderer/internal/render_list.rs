use std::cmp::Ordering;

use glam::Mat4;
use hecs::Entity;

use crate::asset::{Assets, Handle};
use crate::renderer::geometry::{Geometry, GeometryGroup};
use crate::renderer::lights::CollectedLight;
use crate::renderer::material::Material;
use crate::scene::{Camera, Drawable, Frustum, LightComponent, MaterialSlot, Scene, Sphere};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bucket {
    Opaque,
    Transmissive,
    Transparent,
}

/// One draw of the frame: an object, or one group of a multi-material object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderItem {
    /// Traversal index, the last sort tie-breaker.
    pub(crate) id: u32,
    pub(crate) entity: Entity,
    pub(crate) world: Mat4,
    pub(crate) geometry: Handle<Geometry>,
    pub(crate) material: Handle<Material>,
    pub(crate) group: Option<GeometryGroup>,
    pub(crate) z: f32,
    pub(crate) group_order: i32,
    pub(crate) render_order: i32,
    pub(crate) material_id: u64,
}

/// The frame's draws split into buckets, plus the lights and shadow casters found on
/// the same walk.
///
/// Items live in a pool that keeps its allocation between frames; the buckets hold
/// indices into it.
#[derive(Default)]
pub(crate) struct RenderList {
    pool: Vec<RenderItem>,
    used: usize,
    opaque: Vec<usize>,
    transmissive: Vec<usize>,
    transparent: Vec<usize>,
    pub(crate) lights: Vec<CollectedLight>,
    /// Shadow casters are kept unculled; each shadow camera culls them itself.
    pub(crate) casters: Vec<RenderItem>,
}

impl RenderList {
    pub(crate) fn init(&mut self) {
        self.used = 0;
        self.opaque.clear();
        self.transmissive.clear();
        self.transparent.clear();
        self.lights.clear();
        self.casters.clear();
    }

    pub(crate) fn push(&mut self, bucket: Bucket, item: RenderItem) {
        if self.used < self.pool.len() {
            self.pool[self.used] = item;
        } else {
            self.pool.push(item);
        }
        let index = self.used;
        self.used += 1;
        match bucket {
            Bucket::Opaque => self.opaque.push(index),
            Bucket::Transmissive => self.transmissive.push(index),
            Bucket::Transparent => self.transparent.push(index),
        }
    }

    pub(crate) fn sort(&mut self) {
        let pool = &self.pool;
        self.opaque
            .sort_by(|a, b| painter_sort_stable(&pool[*a], &pool[*b]));
        self.transmissive
            .sort_by(|a, b| reverse_painter_sort_stable(&pool[*a], &pool[*b]));
        self.transparent
            .sort_by(|a, b| reverse_painter_sort_stable(&pool[*a], &pool[*b]));
    }

    /// Drops pooled items past the ones used this frame.
    pub(crate) fn finish(&mut self) {
        self.pool.truncate(self.used);
    }

    pub(crate) fn bucket(&self, bucket: Bucket) -> Vec<RenderItem> {
        let indices = match bucket {
            Bucket::Opaque => &self.opaque,
            Bucket::Transmissive => &self.transmissive,
            Bucket::Transparent => &self.transparent,
        };
        indices.iter().map(|i| self.pool[*i]).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.used
    }

    pub(crate) fn has_transmissive(&self) -> bool {
        !self.transmissive.is_empty()
    }

    /// Walks the visible scene once for `camera`: culls drawables into buckets and
    /// collects lights and shadow casters.
    pub(crate) fn build(&mut self, scene: &Scene, camera: &Camera, sort_objects: bool) {
        self.init();
        let frustum = camera.frustum();
        let camera_position = camera.position();
        let forward = camera.forward();
        let assets = &scene.assets;
        let mut next_id = 0u32;

        scene.traverse_visible(|entity, node| {
            if !camera.layers.test(&node.layers) {
                return;
            }
            if let Ok(light) = scene.world.get::<&LightComponent>(entity) {
                self.lights.push(CollectedLight {
                    entity,
                    light: light.0,
                    world: node.world_matrix,
                    shadow_map: None,
                });
            }
            let Ok(drawable) = scene.world.get::<&Drawable>(entity) else {
                return;
            };
            let Some(geometry) = assets.geometries.get(drawable.geometry) else {
                log::trace!("Skipping {:?}: geometry handle is stale", entity);
                return;
            };
            let id = next_id;
            next_id += 1;

            let bounds = world_bounds(geometry, &drawable, &node.world_matrix);
            let z = if sort_objects {
                let center = if bounds.is_empty() {
                    node.world_matrix.w_axis.truncate()
                } else {
                    bounds.center
                };
                (center - camera_position).dot(forward)
            } else {
                0.0
            };

            let mut draws = Vec::with_capacity(1);
            collect_draws(assets, geometry, &drawable.material, scene.override_material, &mut draws);

            for (material_handle, group) in draws {
                let Some(material) = assets.materials.get(material_handle) else {
                    continue;
                };
                let item = RenderItem {
                    id,
                    entity,
                    world: node.world_matrix,
                    geometry: drawable.geometry,
                    material: material_handle,
                    group,
                    z,
                    group_order: node.group_order,
                    render_order: drawable.render_order,
                    material_id: material.id(),
                };
                if drawable.cast_shadow {
                    self.casters.push(item);
                }
                if !material.visible {
                    continue;
                }
                if drawable.frustum_culled && !is_visible(&frustum, &bounds) {
                    continue;
                }
                let bucket = if material.transmission() > 0.0 {
                    Bucket::Transmissive
                } else if material.transparent {
                    Bucket::Transparent
                } else {
                    Bucket::Opaque
                };
                self.push(bucket, item);
            }
        });

        if sort_objects {
            self.sort();
        }
        self.finish();
        log::trace!(
            "Render list: {} opaque, {} transmissive, {} transparent, {} lights, {} casters",
            self.opaque.len(),
            self.transmissive.len(),
            self.transparent.len(),
            self.lights.len(),
            self.casters.len()
        );
    }
}

/// Material per draw. A multi-material slot draws one item per geometry group; an
/// override material replaces every slot.
fn collect_draws(
    assets: &Assets,
    geometry: &Geometry,
    slot: &MaterialSlot,
    override_material: Option<Handle<Material>>,
    out: &mut Vec<(Handle<Material>, Option<GeometryGroup>)>,
) {
    if let Some(material) = override_material {
        out.push((material, None));
        return;
    }
    match slot {
        MaterialSlot::Single(material) => out.push((*material, None)),
        MaterialSlot::Multi(_) => {
            for group in &geometry.groups {
                if let Some(material) = slot.get(group.material_index) {
                    if assets.materials.contains(material) {
                        out.push((material, Some(*group)));
                    }
                }
            }
        }
    }
}

/// World-space bounding sphere of a drawable, covering every instance.
pub(crate) fn world_bounds(geometry: &Geometry, drawable: &Drawable, world: &Mat4) -> Sphere {
    let local = geometry.bounding_sphere();
    if local.is_empty() {
        return local;
    }
    match &drawable.instancing {
        Some(instancing) => (0..instancing.count)
            .filter_map(|i| instancing.matrix(i))
            .map(|m| local.transformed(&(*world * m)))
            .fold(Sphere::default(), |acc, s| acc.union(&s)),
        None => local.transformed(world),
    }
}

/// Empty bounds cannot be tested and are always drawn.
pub(crate) fn is_visible(frustum: &Frustum, bounds: &Sphere) -> bool {
    bounds.is_empty() || frustum.intersects_sphere(bounds)
}

fn painter_sort_stable(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(a.material_id.cmp(&b.material_id))
        .then(a.z.partial_cmp(&b.z).unwrap_or(Ordering::Equal))
        .then(a.id.cmp(&b.id))
}

fn reverse_painter_sort_stable(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(b.z.partial_cmp(&a.z).unwrap_or(Ordering::Equal))
        .then(a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::primitives::plane_geometry;
    use crate::scene::{Layers, Transform, TransformComponent};
    use glam::Vec3;

    fn scene_with(materials: &[(f32, Material)]) -> Scene {
        let mut scene = Scene::new();
        let geometry = scene.assets.geometries.insert(plane_geometry(1.0, 1.0, 1, 1));
        for (distance, material) in materials {
            let material = scene.assets.materials.insert(material.clone());
            scene.add((
                TransformComponent(Transform::from_translation(Vec3::new(0.0, 0.0, -distance))),
                Drawable::mesh(geometry, material),
            ));
        }
        scene.update_world_transforms();
        scene
    }

    fn camera() -> Camera {
        Camera::perspective(60.0, 1.0, 0.1, 100.0)
    }

    #[test]
    fn transparent_items_sort_back_to_front() {
        let glass = Material::basic(Vec3::ONE).with_opacity(0.5);
        let scene = scene_with(&[(5.0, glass.clone()), (10.0, glass.clone()), (2.0, glass)]);
        let mut list = RenderList::default();
        list.build(&scene, &camera(), true);

        let depths: Vec<f32> = list.bucket(Bucket::Transparent).iter().map(|item| item.z.round()).collect();
        assert_eq!(depths, vec![10.0, 5.0, 2.0]);
        assert_eq!(list.bucket(Bucket::Opaque).len(), 0);
    }

    #[test]
    fn opaque_items_sort_by_material_then_front_to_back() {
        let red = Material::basic(Vec3::X);
        let scene = scene_with(&[(8.0, red.clone()), (3.0, red)]);
        let mut list = RenderList::default();
        list.build(&scene, &camera(), true);

        let depths: Vec<f32> = list.bucket(Bucket::Opaque).iter().map(|item| item.z.round()).collect();
        assert_eq!(depths, vec![3.0, 8.0]);
    }

    #[test]
    fn render_order_wins_over_depth() {
        let mut scene = scene_with(&[]);
        let geometry = scene.assets.geometries.insert(plane_geometry(1.0, 1.0, 1, 1));
        let material = scene
            .assets
            .materials
            .insert(Material::basic(Vec3::ONE).with_opacity(0.5));
        let near = scene.add((
            TransformComponent(Transform::from_translation(Vec3::new(0.0, 0.0, -2.0))),
            Drawable::mesh(geometry, material).with_render_order(-1),
        ));
        scene.add((
            TransformComponent(Transform::from_translation(Vec3::new(0.0, 0.0, -9.0))),
            Drawable::mesh(geometry, material),
        ));
        scene.update_world_transforms();

        let mut list = RenderList::default();
        list.build(&scene, &camera(), true);
        assert_eq!(list.bucket(Bucket::Transparent).first().map(|item| item.entity), Some(near));
    }

    #[test]
    fn culled_and_masked_objects_are_skipped_but_still_cast() {
        let mut scene = scene_with(&[]);
        let geometry = scene.assets.geometries.insert(plane_geometry(1.0, 1.0, 1, 1));
        let material = scene.assets.materials.insert(Material::basic(Vec3::ONE));
        scene.add((
            TransformComponent(Transform::from_translation(Vec3::new(0.0, 0.0, 50.0))),
            Drawable::mesh(geometry, material).casting_shadow(),
        ));
        scene.add((
            TransformComponent(Transform::from_translation(Vec3::new(0.0, 0.0, -5.0))),
            Drawable::mesh(geometry, material),
            Layers::only(3),
        ));
        scene.update_world_transforms();

        let mut list = RenderList::default();
        list.build(&scene, &camera(), true);
        assert_eq!(list.len(), 0);
        assert_eq!(list.casters.len(), 1);
    }

    #[test]
    fn multi_material_objects_draw_per_group() {
        let mut scene = Scene::new();
        let mut geometry = plane_geometry(1.0, 1.0, 1, 1);
        geometry.add_group(0, 3, 0);
        geometry.add_group(3, 3, 1);
        let geometry = scene.assets.geometries.insert(geometry);
        let a = scene.assets.materials.insert(Material::basic(Vec3::X));
        let b = scene
            .assets
            .materials
            .insert(Material::basic(Vec3::Y).with_opacity(0.3));
        scene.add((
            TransformComponent(Transform::from_translation(Vec3::new(0.0, 0.0, -4.0))),
            Drawable::multi(geometry, vec![a, b]),
        ));
        scene.update_world_transforms();

        let mut list = RenderList::default();
        list.build(&scene, &camera(), true);
        assert_eq!(list.bucket(Bucket::Opaque).len(), 1);
        assert_eq!(list.bucket(Bucket::Transparent).len(), 1);
        assert_eq!(list.bucket(Bucket::Transparent).first().and_then(|i| i.group).map(|g| g.start), Some(3));
    }

    #[test]
    fn pool_is_reused_across_frames() {
        let glass = Material::basic(Vec3::ONE).with_opacity(0.5);
        let scene = scene_with(&[(5.0, glass.clone()), (6.0, glass)]);
        let mut list = RenderList::default();
        list.build(&scene, &camera(), true);
        list.build(&scene, &camera(), true);
        assert_eq!(list.len(), 2);
        assert_eq!(list.bucket(Bucket::Transparent).len(), 2);
    }
}
