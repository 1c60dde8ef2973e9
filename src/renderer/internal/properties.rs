use std::collections::HashMap;

use crate::renderer::backend::{Backend, ProgramId};

use super::parameters::ProgramInputs;
use super::programs::ProgramCache;

/// Program state the renderer keeps for one material.
#[derive(Debug, Default)]
pub(crate) struct MaterialState {
    material_version: u64,
    lights_version: u64,
    /// Variants in use with this material, e.g. instanced and non-instanced draws.
    programs: Vec<(ProgramInputs, ProgramId)>,
    /// Last variant returned, checked first.
    current: Option<usize>,
}

impl MaterialState {
    /// Whether the draw described by the arguments needs a different program than the
    /// ones this material already holds.
    pub(crate) fn needs_program_change(
        &self,
        material_version: u64,
        lights_version: u64,
        inputs: &ProgramInputs,
    ) -> bool {
        self.lookup(material_version, lights_version, inputs).is_none()
    }

    fn lookup(&self, material_version: u64, lights_version: u64, inputs: &ProgramInputs) -> Option<usize> {
        if self.programs.is_empty()
            || self.material_version != material_version
            || self.lights_version != lights_version
        {
            return None;
        }
        if let Some(index) = self.current {
            if self.programs.get(index).is_some_and(|(i, _)| i == inputs) {
                return Some(index);
            }
        }
        self.programs.iter().position(|(i, _)| i == inputs)
    }

    pub(crate) fn programs(&self) -> impl Iterator<Item = ProgramId> + '_ {
        self.programs.iter().map(|(_, id)| *id)
    }
}

/// Per-material program bookkeeping, keyed by material id.
#[derive(Debug, Default)]
pub(crate) struct MaterialProperties {
    materials: HashMap<u64, MaterialState>,
}

impl MaterialProperties {
    pub(crate) fn get(&self, material: u64) -> Option<&MaterialState> {
        self.materials.get(&material)
    }

    /// Program already selected for these inputs, if still valid.
    pub(crate) fn cached_program(
        &mut self,
        material: u64,
        material_version: u64,
        lights_version: u64,
        inputs: &ProgramInputs,
    ) -> Option<ProgramId> {
        let state = self.materials.get_mut(&material)?;
        let index = state.lookup(material_version, lights_version, inputs)?;
        state.current = Some(index);
        state.programs.get(index).map(|(_, id)| *id)
    }

    /// Records a freshly acquired program. A material or light-state version change
    /// releases every variant held for the old versions first.
    pub(crate) fn insert(
        &mut self,
        backend: &mut dyn Backend,
        programs: &mut ProgramCache,
        material: u64,
        material_version: u64,
        lights_version: u64,
        inputs: ProgramInputs,
        program: ProgramId,
    ) {
        let state = self.materials.entry(material).or_default();
        if state.material_version != material_version || state.lights_version != lights_version {
            for (_, old) in state.programs.drain(..) {
                programs.release(backend, old);
            }
            state.material_version = material_version;
            state.lights_version = lights_version;
        }
        if let Some(existing) = state.programs.iter().position(|(i, _)| *i == inputs) {
            let (_, old) = std::mem::replace(&mut state.programs[existing], (inputs, program));
            programs.release(backend, old);
            state.current = Some(existing);
        } else {
            state.programs.push((inputs, program));
            state.current = Some(state.programs.len() - 1);
        }
    }

    /// Releases the programs of `material`. Returns how many references were dropped.
    pub(crate) fn dispose(
        &mut self,
        backend: &mut dyn Backend,
        programs: &mut ProgramCache,
        material: u64,
    ) -> usize {
        let Some(state) = self.materials.remove(&material) else {
            return 0;
        };
        let count = state.programs.len();
        for (_, program) in state.programs {
            programs.release(backend, program);
        }
        count
    }

    pub(crate) fn clear(&mut self) {
        self.materials.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::RecordingBackend;
    use crate::renderer::internal::parameters::ProgramParameters;
    use crate::renderer::material::Material;
    use glam::Vec3;

    #[test]
    fn variants_are_kept_per_inputs() {
        let mut backend = RecordingBackend::default();
        let mut programs = ProgramCache::default();
        let mut properties = MaterialProperties::default();
        let material = Material::basic(Vec3::ONE);

        let plain = ProgramInputs::default();
        let instanced = ProgramInputs {
            instancing: true,
            ..Default::default()
        };
        for inputs in [&plain, &instanced] {
            let params = ProgramParameters::new(&material, inputs);
            let id = programs.acquire(&mut backend, &params).unwrap();
            properties.insert(&mut backend, &mut programs, material.id(), 0, 0, inputs.clone(), id);
        }

        assert!(properties.cached_program(material.id(), 0, 0, &plain).is_some());
        assert!(properties.cached_program(material.id(), 0, 0, &instanced).is_some());
        assert!(properties
            .get(material.id())
            .unwrap()
            .needs_program_change(1, 0, &plain));
        assert_eq!(programs.len(), 2);

        assert_eq!(properties.dispose(&mut backend, &mut programs, material.id()), 2);
        assert_eq!(programs.len(), 0);
    }

    #[test]
    fn version_change_releases_old_variants() {
        let mut backend = RecordingBackend::default();
        let mut programs = ProgramCache::default();
        let mut properties = MaterialProperties::default();
        let material = Material::basic(Vec3::ONE);
        let inputs = ProgramInputs::default();

        let params = ProgramParameters::new(&material, &inputs);
        let first = programs.acquire(&mut backend, &params).unwrap();
        properties.insert(&mut backend, &mut programs, material.id(), 0, 0, inputs.clone(), first);

        let mut lit = inputs.clone();
        lit.fog = Some(super::super::parameters::FogKind::Linear);
        let params = ProgramParameters::new(&material, &lit);
        let second = programs.acquire(&mut backend, &params).unwrap();
        properties.insert(&mut backend, &mut programs, material.id(), 0, 1, lit, second);

        assert!(programs.get(first).is_none());
        assert!(programs.get(second).is_some());
    }
}
