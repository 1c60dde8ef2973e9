use std::collections::HashMap;

use crate::error::{RenderError, ShaderDiagnostic, ShaderStage};
use crate::renderer::backend::{Backend, GlslType, ProgramId, ShaderId, ShaderKind};
use crate::renderer::geometry::AttributeName;

use super::parameters::ProgramParameters;
use super::shader_lib;
use super::uniforms::UniformTable;

const MAX_INCLUDE_DEPTH: usize = 16;

/// Where the data for an active attribute comes from, resolved once at link time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttributeSource {
    InstanceMatrix,
    InstanceColor,
    MorphTarget(usize),
    MorphNormal(usize),
    Geometry(AttributeName),
}

impl AttributeSource {
    fn from_glsl(name: &str) -> Self {
        let morph = |prefix: &str| name.strip_prefix(prefix).and_then(|i| i.parse::<usize>().ok());
        match name {
            "instanceMatrix" => Self::InstanceMatrix,
            "instanceColor" => Self::InstanceColor,
            _ => {
                if let Some(index) = morph("morphTarget") {
                    Self::MorphTarget(index)
                } else if let Some(index) = morph("morphNormal") {
                    Self::MorphNormal(index)
                } else {
                    Self::Geometry(AttributeName::from_glsl(name))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ProgramAttribute {
    pub(crate) name: String,
    pub(crate) location: u32,
    pub(crate) ty: GlslType,
    pub(crate) source: AttributeSource,
}

/// A linked program variant and its reflected interface.
#[derive(Debug)]
pub(crate) struct ProgramInfo {
    pub(crate) id: ProgramId,
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) uniforms: UniformTable,
    /// Sorted by location so binding order is stable.
    pub(crate) attributes: Vec<ProgramAttribute>,
    used_times: usize,
}

/// Compiles each distinct variant once and shares it between materials.
///
/// Failed variants are remembered so a broken material does not recompile every frame.
#[derive(Default)]
pub(crate) struct ProgramCache {
    programs: HashMap<String, ProgramInfo>,
    keys: HashMap<ProgramId, String>,
    failed: HashMap<String, ShaderDiagnostic>,
}

impl ProgramCache {
    pub(crate) fn len(&self) -> usize {
        self.programs.len()
    }

    /// Returns the program for `params`, compiling it on first use. Every successful
    /// call takes one reference that [`ProgramCache::release`] gives back.
    pub(crate) fn acquire(
        &mut self,
        backend: &mut dyn Backend,
        params: &ProgramParameters,
    ) -> Result<ProgramId, RenderError> {
        let key = params.cache_key();
        if let Some(program) = self.programs.get_mut(&key) {
            program.used_times += 1;
            return Ok(program.id);
        }
        if let Some(diagnostic) = self.failed.get(&key) {
            return Err(RenderError::Compile(diagnostic.clone()));
        }

        match compile(backend, params, &key) {
            Ok(program) => {
                log::debug!(
                    "Compiled program '{}' ({} uniforms, {} attributes)",
                    program.name,
                    program.uniforms.len(),
                    program.attributes.len()
                );
                let id = program.id;
                self.keys.insert(id, key.clone());
                self.programs.insert(key, program);
                Ok(id)
            }
            Err(RenderError::Compile(diagnostic)) => {
                log::error!("{}", diagnostic);
                self.failed.insert(key, diagnostic.clone());
                Err(RenderError::Compile(diagnostic))
            }
            Err(other) => Err(other),
        }
    }

    /// Drops one reference; the program is deleted when none remain.
    pub(crate) fn release(&mut self, backend: &mut dyn Backend, id: ProgramId) -> bool {
        let Some(key) = self.keys.get(&id) else {
            return false;
        };
        let Some(program) = self.programs.get_mut(key) else {
            return false;
        };
        program.used_times = program.used_times.saturating_sub(1);
        if program.used_times > 0 {
            return false;
        }
        let key = key.clone();
        self.keys.remove(&id);
        if let Some(program) = self.programs.remove(&key) {
            log::debug!("Deleted program '{}'", program.name);
        }
        backend.delete_program(id);
        true
    }

    pub(crate) fn get(&self, id: ProgramId) -> Option<&ProgramInfo> {
        self.keys.get(&id).and_then(|key| self.programs.get(key))
    }

    pub(crate) fn get_mut(&mut self, id: ProgramId) -> Option<&mut ProgramInfo> {
        let key = self.keys.get(&id)?;
        self.programs.get_mut(key)
    }

    pub(crate) fn diagnostic(&self, params: &ProgramParameters) -> Option<&ShaderDiagnostic> {
        self.failed.get(&params.cache_key())
    }

    /// Forgets every program without touching the backend (context loss).
    pub(crate) fn forget_all(&mut self) {
        self.programs.clear();
        self.keys.clear();
        self.failed.clear();
    }

    pub(crate) fn dispose_all(&mut self, backend: &mut dyn Backend) {
        for (_, program) in self.programs.drain() {
            backend.delete_program(program.id);
        }
        self.keys.clear();
        self.failed.clear();
    }
}

fn compile(
    backend: &mut dyn Backend,
    params: &ProgramParameters,
    key: &str,
) -> Result<ProgramInfo, RenderError> {
    let vertex = assemble(&params.vertex_prefix(), &params.vertex_source, params, ShaderStage::Vertex, key)?;
    let fragment = assemble(
        &params.fragment_prefix(),
        &params.fragment_source,
        params,
        ShaderStage::Fragment,
        key,
    )?;

    let vs = compile_stage(backend, ShaderKind::Vertex, &vertex, &params.shader_name)?;
    let fs = match compile_stage(backend, ShaderKind::Fragment, &fragment, &params.shader_name) {
        Ok(fs) => fs,
        Err(err) => {
            backend.delete_shader(vs);
            return Err(err);
        }
    };

    let linked = backend.create_program(vs, fs);
    backend.delete_shader(vs);
    backend.delete_shader(fs);
    let id = linked?;
    if !backend.program_link_status(id) {
        let log = backend.program_info_log(id);
        backend.delete_program(id);
        return Err(RenderError::Compile(ShaderDiagnostic::new(
            ShaderStage::Link,
            &params.shader_name,
            &log,
            "",
        )));
    }

    let active_uniforms = backend.active_uniforms(id);
    let uniforms = UniformTable::new(backend, id, &active_uniforms);
    let mut attributes: Vec<ProgramAttribute> = backend
        .active_attributes(id)
        .into_iter()
        .filter_map(|attribute| {
            let location = backend.attrib_location(id, &attribute.name)?;
            Some(ProgramAttribute {
                source: AttributeSource::from_glsl(&attribute.name),
                name: attribute.name,
                location,
                ty: attribute.ty,
            })
        })
        .collect();
    attributes.sort_by_key(|attribute| attribute.location);

    Ok(ProgramInfo {
        id,
        key: key.to_string(),
        name: params.shader_name.clone(),
        uniforms,
        attributes,
        used_times: 1,
    })
}

fn compile_stage(
    backend: &mut dyn Backend,
    kind: ShaderKind,
    source: &str,
    name: &str,
) -> Result<ShaderId, RenderError> {
    let shader = backend.create_shader(kind, source)?;
    if backend.shader_compile_status(shader) {
        return Ok(shader);
    }
    let log = backend.shader_info_log(shader);
    backend.delete_shader(shader);
    let stage = match kind {
        ShaderKind::Vertex => ShaderStage::Vertex,
        ShaderKind::Fragment => ShaderStage::Fragment,
    };
    Err(RenderError::Compile(ShaderDiagnostic::new(stage, name, &log, source)))
}

/// Prefix, resolved includes, substituted counts and unrolled loops.
pub(crate) fn assemble(
    prefix: &str,
    body: &str,
    params: &ProgramParameters,
    stage: ShaderStage,
    variant: &str,
) -> Result<String, RenderError> {
    let mut source = String::with_capacity(prefix.len() + body.len() * 4);
    source.push_str(prefix);
    resolve_includes(body, &mut source, 0).map_err(|log| {
        RenderError::Compile(ShaderDiagnostic::new(stage, variant, &log, ""))
    })?;

    for (token, count) in params.replacements() {
        source = replace_token(&source, token, &count.to_string());
    }
    Ok(unroll_loops(&source, &params.defines))
}

fn resolve_includes(source: &str, out: &mut String, depth: usize) -> Result<(), String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err("include depth limit exceeded".to_string());
    }
    for line in source.lines() {
        let trimmed = line.trim();
        match trimmed.strip_prefix("#include") {
            Some(rest) => {
                let name = rest.trim().trim_start_matches('<').trim_end_matches('>').trim();
                let chunk = shader_lib::chunk(name)
                    .ok_or_else(|| format!("unknown include <{name}>"))?;
                resolve_includes(chunk, out, depth + 1)?;
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    Ok(())
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replaces whole-identifier occurrences of `token`.
fn replace_token(source: &str, token: &str, value: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(pos) = rest.find(token) {
        out.push_str(&rest[..pos]);
        // `out` also holds a kept occurrence right before this one.
        let before = out.chars().next_back();
        let after = rest[pos + token.len()..].chars().next();
        if before.is_some_and(is_ident) || after.is_some_and(is_ident) {
            out.push_str(token);
        } else {
            out.push_str(value);
        }
        rest = &rest[pos + token.len()..];
    }
    out.push_str(rest);
    out
}

const UNROLL_START: &str = "#pragma unroll_loop_start";
const UNROLL_END: &str = "#pragma unroll_loop_end";

/// Expands `for ( int i = A; i < B; i ++ ) { ... }` blocks between unroll pragmas,
/// substituting `[ i ]` and `UNROLLED_LOOP_INDEX` with the iteration number.
fn unroll_loops(source: &str, defines: &[(String, String)]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find(UNROLL_START) {
        out.push_str(&rest[..start]);
        let after_start = &rest[start + UNROLL_START.len()..];
        let Some(end) = after_start.find(UNROLL_END) else {
            rest = after_start;
            break;
        };
        let block = &after_start[..end];
        match expand_loop(block, defines) {
            Some(expanded) => out.push_str(&expanded),
            None => {
                log::warn!("Could not unroll loop: {}", block.trim());
                out.push_str(block);
            }
        }
        rest = &after_start[end + UNROLL_END.len()..];
    }
    out.push_str(rest);
    out
}

fn expand_loop(block: &str, defines: &[(String, String)]) -> Option<String> {
    let header_start = block.find("for")?;
    let open = header_start + block[header_start..].find('(')?;
    let close = open + block[open..].find(')')?;
    let header = &block[open + 1..close];
    let mut parts = header.split(';');
    let init = parts.next()?;
    let condition = parts.next()?;

    let start = resolve_bound(init.split('=').nth(1)?, defines)?;
    let end = resolve_bound(condition.split('<').nth(1)?, defines)?;

    let body_open = close + block[close..].find('{')?;
    let body_close = block.rfind('}')?;
    if body_close <= body_open {
        return None;
    }
    let body = &block[body_open + 1..body_close];

    let mut out = String::new();
    for i in start..end.max(start) {
        let index = i.to_string();
        let iteration = body
            .replace("[ i ]", &format!("[ {index} ]"))
            .replace("UNROLLED_LOOP_INDEX", &index);
        out.push_str("{\n");
        out.push_str(&iteration);
        out.push_str("\n}\n");
    }
    Some(out)
}

fn resolve_bound(expr: &str, defines: &[(String, String)]) -> Option<i64> {
    let expr = expr.trim();
    if let Ok(value) = expr.parse() {
        return Some(value);
    }
    defines
        .iter()
        .find(|(name, _)| name == expr)
        .and_then(|(_, value)| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Call, RecordingBackend};
    use crate::renderer::internal::parameters::ProgramInputs;
    use crate::renderer::material::{Material, ShaderMaterial};
    use glam::Vec3;

    fn params(material: &Material, inputs: &ProgramInputs) -> ProgramParameters {
        ProgramParameters::new(material, inputs)
    }

    #[test]
    fn identical_variants_compile_once() {
        let mut backend = RecordingBackend::default();
        let mut cache = ProgramCache::default();
        let inputs = ProgramInputs::default();
        let a = cache
            .acquire(&mut backend, &params(&Material::basic(Vec3::ONE), &inputs))
            .unwrap();
        let b = cache
            .acquire(&mut backend, &params(&Material::basic(Vec3::X), &inputs))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::LinkProgram(_))), 1);
    }

    #[test]
    fn release_deletes_unused_programs() {
        let mut backend = RecordingBackend::default();
        let mut cache = ProgramCache::default();
        let p = params(&Material::basic(Vec3::ONE), &ProgramInputs::default());
        let id = cache.acquire(&mut backend, &p).unwrap();
        cache.acquire(&mut backend, &p).unwrap();

        assert!(!cache.release(&mut backend, id));
        assert_eq!(backend.live_program_count(), 1);
        assert!(cache.release(&mut backend, id));
        assert_eq!(backend.live_program_count(), 0);
        assert!(cache.get(id).is_none());
    }

    #[test]
    fn built_in_sources_resolve_and_unroll() {
        let mut backend = RecordingBackend::default();
        let mut cache = ProgramCache::default();
        let mut inputs = ProgramInputs::default();
        inputs.lights.directional = 2;
        inputs.lights.point = 1;
        let id = cache
            .acquire(&mut backend, &params(&Material::standard(Vec3::ONE, 0.5, 0.0), &inputs))
            .unwrap();
        let (vertex, fragment) = backend.program_sources(id).unwrap();
        assert!(!vertex.contains("#include"));
        assert!(!fragment.contains("#include"));
        assert!(!fragment.contains("unroll_loop"));
        assert!(fragment.contains("directionalLights[ 1 ]"));

        let info = cache.get(id).unwrap();
        assert!(info.uniforms.has("directionalLights[1].direction"));
        assert!(info.uniforms.has("pointLights[0].decay"));
        assert!(info.attributes.iter().any(|a| a.name == "position"));
        assert!(info.attributes.windows(2).all(|w| w[0].location < w[1].location));
    }

    #[test]
    fn failed_variants_are_remembered() {
        let mut backend = RecordingBackend::default();
        backend.fail_compile_containing("BROKEN_MARKER");
        let mut cache = ProgramCache::default();
        let broken = Material::shader(ShaderMaterial::new(
            "void main() { gl_Position = vec4(0.0); }",
            "void main() { BROKEN_MARKER; }",
        ));
        let p = params(&broken, &ProgramInputs::default());

        let err = cache.acquire(&mut backend, &p).unwrap_err();
        match err {
            RenderError::Compile(diagnostic) => assert_eq!(diagnostic.stage, ShaderStage::Fragment),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(cache.acquire(&mut backend, &p).is_err());
        assert!(cache.diagnostic(&p).is_some());
        assert_eq!(backend.count(|c| matches!(c, Call::CompileShader(_, ShaderKind::Fragment))), 1);
    }

    #[test]
    fn unknown_include_is_a_compile_error() {
        let mut backend = RecordingBackend::default();
        let mut cache = ProgramCache::default();
        let material = Material::shader(ShaderMaterial::new(
            "#include <no_such_chunk>\nvoid main() {}",
            "void main() {}",
        ));
        let err = cache
            .acquire(&mut backend, &params(&material, &ProgramInputs::default()))
            .unwrap_err();
        assert!(matches!(err, RenderError::Compile(d) if d.log.contains("no_such_chunk")));
    }

    #[test]
    fn token_replacement_respects_identifiers() {
        let replaced = replace_token("NUM_DIR_LIGHTS NUM_DIR_LIGHTSX xNUM_DIR_LIGHTS", "NUM_DIR_LIGHTS", "3");
        assert_eq!(replaced, "3 NUM_DIR_LIGHTSX xNUM_DIR_LIGHTS");
    }

    #[test]
    fn adjacent_occurrences_stay_one_identifier() {
        assert_eq!(replace_token("ii i(ii)", "i", "7"), "ii 7(ii)");
        assert_eq!(replace_token("a[ i ] + iii", "i", "0"), "a[ 0 ] + iii");
    }

    #[test]
    fn loops_unroll_from_macro_bounds() {
        let source = "#pragma unroll_loop_start\nfor ( int i = START; i < 3; i ++ ) {\n\tv += a[ i ] * float( UNROLLED_LOOP_INDEX );\n}\n#pragma unroll_loop_end\n";
        let defines = vec![("START".to_string(), "1".to_string())];
        let out = unroll_loops(source, &defines);
        assert!(out.contains("a[ 1 ] * float( 1 )"));
        assert!(out.contains("a[ 2 ] * float( 2 )"));
        assert!(!out.contains("a[ 0 ]"));
        assert!(!out.contains("for ("));
    }
}
