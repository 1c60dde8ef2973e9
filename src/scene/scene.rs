use super::components::{Children, Parent};
use super::internal::{animations, transforms};
use crate::asset::{Assets, Handle};
use crate::renderer::{Material, Texture};
use glam::{Mat4, Vec3};
use hecs::{DynamicBundle, Entity, World};

pub use super::internal::transforms::NodeView;

/// What fills the drawing buffer before the opaque pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Background {
    Color(Vec3),
    /// A 2D texture stretched over the screen.
    Texture(Handle<Texture>),
    /// A cube (or cube-UV) texture drawn as an infinitely far box.
    Cube(Handle<Texture>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fog {
    Linear { color: Vec3, near: f32, far: f32 },
    Exp2 { color: Vec3, density: f32 },
}

impl Fog {
    pub fn color(&self) -> Vec3 {
        match self {
            Fog::Linear { color, .. } | Fog::Exp2 { color, .. } => *color,
        }
    }
}

pub struct Scene {
    pub world: World,
    pub assets: Assets,
    pub background: Option<Background>,
    /// Default environment map for standard and physical materials without their own.
    pub environment: Option<Handle<Texture>>,
    pub fog: Option<Fog>,
    /// Replaces the material of every drawable while set.
    pub override_material: Option<Handle<Material>>,
    roots: Vec<Entity>,
    time: f64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            assets: Assets::default(),
            background: None,
            environment: None,
            fog: None,
            override_material: None,
            roots: Vec::new(),
            time: 0.0,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn roots(&self) -> &[Entity] {
        &self.roots
    }

    /// Spawns a top-level entity.
    pub fn add(&mut self, components: impl DynamicBundle) -> Entity {
        let entity = self.world.spawn(components);
        self.roots.push(entity);
        entity
    }

    /// Spawns an entity under `parent`. Falls back to a root when `parent` is gone.
    pub fn add_child(&mut self, parent: Entity, components: impl DynamicBundle) -> Entity {
        if !self.world.contains(parent) {
            log::warn!("Parent {:?} does not exist; adding child as root", parent);
            return self.add(components);
        }
        let child = self.world.spawn(components);
        if let Err(e) = self.world.insert_one(child, Parent(parent)) {
            log::error!("Failed to attach {:?} to {:?}: {:?}", child, parent, e);
        }
        let appended = match self.world.get::<&mut Children>(parent) {
            Ok(mut children) => {
                children.0.push(child);
                true
            }
            Err(_) => false,
        };
        if !appended {
            if let Err(e) = self.world.insert_one(parent, Children(vec![child])) {
                log::error!("Failed to add children to {:?}: {:?}", parent, e);
            }
        }
        child
    }

    /// Despawns `entity` and its whole subtree.
    pub fn remove(&mut self, entity: Entity) {
        if let Ok(parent) = self.world.get::<&Parent>(entity).map(|p| p.0) {
            if let Ok(mut children) = self.world.get::<&mut Children>(parent) {
                children.0.retain(|&c| c != entity);
            }
        }
        self.roots.retain(|&r| r != entity);

        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            if let Ok(children) = self.world.get::<&Children>(current) {
                stack.extend(children.0.iter().copied());
            }
            if self.world.despawn(current).is_err() {
                log::warn!("Entity {:?} was already despawned", current);
            }
        }
    }

    /// Visits every visible entity depth-first in insertion order with its world matrix.
    pub fn traverse_visible<F>(&self, visit: F)
    where
        F: FnMut(Entity, &NodeView),
    {
        transforms::visit_visible(&self.world, &self.roots, visit);
    }

    pub fn world_matrix(&self, entity: Entity) -> Option<Mat4> {
        transforms::world_matrix(&self.world, entity)
    }

    pub fn update_world_transforms(&mut self) {
        transforms::propagate_transforms(&mut self.world, &self.roots);
    }

    /// Advances the clock, runs rotate/orbit animations and refreshes world transforms.
    pub fn update(&mut self, dt: f64) {
        self.time += dt;
        animations::update_rotate_animations(&mut self.world, dt);
        animations::update_orbit_animations(&mut self.world, self.time);
        self.update_world_transforms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::components::{Name, TransformComponent, Visible};
    use crate::scene::Transform;

    #[test]
    fn remove_despawns_subtree_and_unlinks() {
        let mut scene = Scene::new();
        let root = scene.add((Name::new("root"), TransformComponent(Transform::IDENTITY)));
        let child = scene.add_child(root, (Name::new("child"),));
        let grandchild = scene.add_child(child, (Name::new("grandchild"),));

        scene.remove(child);
        assert!(!scene.world.contains(child));
        assert!(!scene.world.contains(grandchild));
        assert!(scene.world.get::<&Children>(root).unwrap().0.is_empty());
    }

    #[test]
    fn traversal_follows_insertion_order() {
        let mut scene = Scene::new();
        let a = scene.add((Name::new("a"),));
        let b = scene.add((Name::new("b"),));
        let a1 = scene.add_child(a, (Name::new("a1"),));
        let hidden = scene.add((Visible(false),));
        scene.add_child(hidden, (Name::new("under hidden"),));

        let mut order = Vec::new();
        scene.traverse_visible(|entity, _| order.push(entity));
        assert_eq!(order, vec![a, a1, b]);
    }

    #[test]
    fn child_world_matrix_composes() {
        let mut scene = Scene::new();
        let root = scene.add((TransformComponent(Transform::from_translation(Vec3::X)),));
        let child = scene.add_child(
            root,
            (TransformComponent(Transform::from_translation(Vec3::Y)),),
        );
        let m = scene.world_matrix(child).unwrap();
        assert!(m.w_axis.truncate().abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-6));
    }
}
