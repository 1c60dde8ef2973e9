use crate::scene::components::{
    Children, GroupOrder, Layers, Parent, TransformComponent, Visible, WorldTransform,
};
use glam::Mat4;
use hecs::{Entity, World};

/// What the traversal reports for each visible entity.
#[derive(Debug, Clone, Copy)]
pub struct NodeView {
    pub world_matrix: Mat4,
    /// Group order inherited from the nearest `GroupOrder` ancestor (or the entity itself).
    pub group_order: i32,
    pub layers: Layers,
}

fn local_matrix(world: &World, entity: Entity) -> Mat4 {
    world
        .get::<&TransformComponent>(entity)
        .map(|t| t.0.matrix())
        .unwrap_or(Mat4::IDENTITY)
}

fn is_visible(world: &World, entity: Entity) -> bool {
    world.get::<&Visible>(entity).map(|v| v.0).unwrap_or(true)
}

/// Depth-first walk from `roots` composing world matrices on the way down. Invisible
/// entities are skipped together with their subtrees.
pub(crate) fn visit_visible<F>(world: &World, roots: &[Entity], mut visit: F)
where
    F: FnMut(Entity, &NodeView),
{
    let mut stack: Vec<(Entity, Mat4, i32)> = roots
        .iter()
        .rev()
        .map(|&root| (root, Mat4::IDENTITY, 0))
        .collect();

    while let Some((entity, parent_world, parent_group)) = stack.pop() {
        if !world.contains(entity) || !is_visible(world, entity) {
            continue;
        }

        let world_matrix = parent_world * local_matrix(world, entity);
        let group_order = world
            .get::<&GroupOrder>(entity)
            .map(|g| g.0)
            .unwrap_or(parent_group);
        let layers = world
            .get::<&Layers>(entity)
            .map(|l| *l)
            .unwrap_or_default();

        visit(
            entity,
            &NodeView {
                world_matrix,
                group_order,
                layers,
            },
        );

        if let Ok(children) = world.get::<&Children>(entity) {
            for &child in children.0.iter().rev() {
                stack.push((child, world_matrix, group_order));
            }
        }
    }
}

/// World matrix of one entity, walking up its parents.
pub(crate) fn world_matrix(world: &World, entity: Entity) -> Option<Mat4> {
    if !world.contains(entity) {
        return None;
    }
    let mut matrix = local_matrix(world, entity);
    let mut current = entity;
    while let Ok(parent) = world.get::<&Parent>(current).map(|p| p.0) {
        matrix = local_matrix(world, parent) * matrix;
        current = parent;
    }
    Some(matrix)
}

/// Writes `WorldTransform` for every entity reachable from `roots`, visible or not.
pub(crate) fn propagate_transforms(world: &mut World, roots: &[Entity]) {
    log::trace!("Propagating transforms from {} root entities", roots.len());

    let mut stack: Vec<(Entity, Mat4)> = roots.iter().map(|&r| (r, Mat4::IDENTITY)).collect();
    let mut updates: Vec<(Entity, Mat4)> = Vec::new();

    while let Some((entity, parent_world)) = stack.pop() {
        if !world.contains(entity) {
            continue;
        }
        let world_matrix = parent_world * local_matrix(world, entity);
        updates.push((entity, world_matrix));

        if let Ok(children) = world.get::<&Children>(entity) {
            for &child in children.0.iter().rev() {
                stack.push((child, world_matrix));
            }
        }
    }

    for (entity, matrix) in updates {
        if let Ok(mut wt) = world.get::<&mut WorldTransform>(entity) {
            wt.0 = matrix;
            continue;
        }
        if let Err(e) = world.insert_one(entity, WorldTransform(matrix)) {
            log::error!(
                "Failed to insert WorldTransform for entity {:?}: {:?}",
                entity,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::components::Name;
    use crate::scene::transform::Transform;
    use glam::{Quat, Vec3};

    fn parent_child(world: &mut World, parent_t: Transform, child_t: Transform) -> (Entity, Entity) {
        let parent = world.spawn((Name::new("Parent"), TransformComponent(parent_t)));
        let child = world.spawn((
            Name::new("Child"),
            TransformComponent(child_t),
            Parent(parent),
        ));
        world.insert_one(parent, Children(vec![child])).ok();
        (parent, child)
    }

    #[test]
    fn test_transform_propagation_simple() {
        let mut world = World::new();
        let (parent, child) = parent_child(
            &mut world,
            Transform::from_translation(Vec3::new(5.0, 0.0, 0.0)),
            Transform::from_translation(Vec3::new(2.0, 0.0, 0.0)),
        );

        propagate_transforms(&mut world, &[parent]);

        let parent_world = world.get::<&WorldTransform>(parent).unwrap();
        assert_eq!(parent_world.0.w_axis.truncate(), Vec3::new(5.0, 0.0, 0.0));

        let child_world = world.get::<&WorldTransform>(child).unwrap();
        assert_eq!(child_world.0.w_axis.truncate(), Vec3::new(7.0, 0.0, 0.0));
    }

    #[test]
    fn test_transform_propagation_rotation() {
        let mut world = World::new();
        let (parent, child) = parent_child(
            &mut world,
            Transform::IDENTITY.with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)),
            Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)),
        );

        propagate_transforms(&mut world, &[parent]);

        let child_world = world.get::<&WorldTransform>(child).unwrap();
        assert!(child_world
            .0
            .w_axis
            .truncate()
            .abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));
        assert!(world_matrix(&world, child)
            .unwrap()
            .abs_diff_eq(child_world.0, 1e-5));
    }

    #[test]
    fn hidden_parent_hides_subtree() {
        let mut world = World::new();
        let (parent, _child) = parent_child(
            &mut world,
            Transform::IDENTITY,
            Transform::from_translation(Vec3::X),
        );
        world.insert_one(parent, Visible(false)).ok();

        let mut visited = 0;
        visit_visible(&world, &[parent], |_, _| visited += 1);
        assert_eq!(visited, 0);
    }

    #[test]
    fn group_order_is_inherited() {
        let mut world = World::new();
        let (parent, child) = parent_child(
            &mut world,
            Transform::IDENTITY,
            Transform::from_translation(Vec3::X),
        );
        world.insert_one(parent, GroupOrder(3)).ok();

        let mut seen = Vec::new();
        visit_visible(&world, &[parent], |entity, node| {
            seen.push((entity, node.group_order))
        });
        assert_eq!(seen, vec![(parent, 3), (child, 3)]);
    }
}
