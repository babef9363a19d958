//! Content-addressed registry of shader build products.
//!
//! Every arena is append-only with value-identity deduplication: adding an
//! entry equal to an existing one returns the existing ID. ID groups compare
//! by ordered equality.

use std::cell::RefCell;
use std::hash::BuildHasherDefault;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use indexmap::IndexSet;
use rustc_hash::FxHasher;

use crate::data::{
    ConstBufDef, ConstDef, EffectDef, IOElementDef, ResourceDef, ShaderDef, ShaderRegistryDef,
    StringId,
};
use crate::strings::StringRegistry;

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

type BufferPool<T> = Rc<RefCell<Vec<Vec<T>>>>;

/// Scratch ID buffer borrowed from the registry pool. Returns itself, cleared,
/// on every exit path.
pub struct TmpBuffer<T> {
    pool: BufferPool<T>,
    buf: Vec<T>,
}

impl<T> Deref for TmpBuffer<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.buf
    }
}

impl<T> DerefMut for TmpBuffer<T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.buf
    }
}

impl<T> Drop for TmpBuffer<T> {
    fn drop(&mut self) {
        self.buf.clear();
        self.pool.borrow_mut().push(std::mem::take(&mut self.buf));
    }
}

fn acquire<T>(pool: &BufferPool<T>) -> TmpBuffer<T> {
    let buf = pool.borrow_mut().pop().unwrap_or_default();
    TmpBuffer {
        pool: pool.clone(),
        buf,
    }
}

/// Append-only, deduplicating store populated during a library build.
#[derive(Default)]
pub struct ShaderRegistryBuilder {
    strings: StringRegistry,
    constants: FxIndexSet<ConstDef>,
    const_bufs: FxIndexSet<ConstBufDef>,
    io_elements: FxIndexSet<IOElementDef>,
    resources: FxIndexSet<ResourceDef>,
    id_groups: FxIndexSet<Vec<u32>>,
    byte_code: FxIndexSet<Vec<u8>>,
    shaders: FxIndexSet<ShaderDef>,
    effects: FxIndexSet<EffectDef>,
    id_pool: BufferPool<u32>,
    byte_pool: BufferPool<u8>,
}

impl ShaderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strings(&self) -> &StringRegistry {
        &self.strings
    }

    pub fn get_or_add_string(&mut self, value: &str) -> StringId {
        self.strings.intern(value)
    }

    pub fn get_or_add_constant(&mut self, def: ConstDef) -> u32 {
        self.constants.insert_full(def).0 as u32
    }

    pub fn get_or_add_const_buf(&mut self, def: ConstBufDef) -> u32 {
        self.const_bufs.insert_full(def).0 as u32
    }

    pub fn get_or_add_io_element(&mut self, def: IOElementDef) -> u32 {
        self.io_elements.insert_full(def).0 as u32
    }

    pub fn get_or_add_resource(&mut self, def: ResourceDef) -> u32 {
        self.resources.insert_full(def).0 as u32
    }

    pub fn get_or_add_id_group(&mut self, ids: &[u32]) -> u32 {
        if let Some(index) = self.id_groups.get_index_of(ids) {
            return index as u32;
        }
        self.id_groups.insert_full(ids.to_vec()).0 as u32
    }

    pub fn get_or_add_byte_code(&mut self, bytes: &[u8]) -> u32 {
        if let Some(index) = self.byte_code.get_index_of(bytes) {
            return index as u32;
        }
        self.byte_code.insert_full(bytes.to_vec()).0 as u32
    }

    pub fn get_or_add_shader(&mut self, def: ShaderDef) -> u32 {
        self.shaders.insert_full(def).0 as u32
    }

    pub fn get_or_add_effect(&mut self, def: EffectDef) -> u32 {
        self.effects.insert_full(def).0 as u32
    }

    pub fn shader(&self, id: u32) -> &ShaderDef {
        self.shaders.get_index(id as usize).expect("shader ID out of range")
    }

    pub fn effect(&self, id: u32) -> &EffectDef {
        self.effects.get_index(id as usize).expect("effect ID out of range")
    }

    pub fn byte_code(&self, id: u32) -> &[u8] {
        self.byte_code.get_index(id as usize).expect("bytecode ID out of range")
    }

    pub fn shader_count(&self) -> u32 {
        self.shaders.len() as u32
    }

    pub fn effect_count(&self) -> u32 {
        self.effects.len() as u32
    }

    pub fn resource_count(&self) -> u32 {
        self.resources.len() as u32
    }

    /// Total distinct entries across all arenas. Used to detect configs that
    /// contributed nothing new.
    pub fn unique_entry_count(&self) -> usize {
        self.constants.len()
            + self.const_bufs.len()
            + self.io_elements.len()
            + self.resources.len()
            + self.id_groups.len()
            + self.byte_code.len()
            + self.shaders.len()
            + self.effects.len()
    }

    /// Acquires a reusable ID scratch buffer from the pool.
    pub fn tmp_id_buffer(&self) -> TmpBuffer<u32> {
        acquire(&self.id_pool)
    }

    /// Acquires a reusable byte scratch buffer from the pool.
    pub fn tmp_byte_buffer(&self) -> TmpBuffer<u8> {
        acquire(&self.byte_pool)
    }

    /// Snapshot of the registry contents in arena order.
    pub fn get_definition(&self) -> ShaderRegistryDef {
        ShaderRegistryDef {
            constants: self.constants.iter().copied().collect(),
            const_bufs: self.const_bufs.iter().copied().collect(),
            io_elements: self.io_elements.iter().copied().collect(),
            resources: self.resources.iter().copied().collect(),
            id_groups: self.id_groups.iter().cloned().collect(),
            byte_code: self.byte_code.iter().cloned().collect(),
            shaders: self.shaders.iter().copied().collect(),
            effects: self.effects.iter().copied().collect(),
        }
    }

    pub fn string_table(&self) -> Vec<String> {
        self.strings.to_table()
    }

    pub fn clear(&mut self) {
        *self = ShaderRegistryBuilder {
            id_pool: std::mem::take(&mut self.id_pool),
            byte_pool: std::mem::take(&mut self.byte_pool),
            ..Default::default()
        };
    }
}

/// Immutable view over a deserialized registry, shared by the runtime map and
/// the typed handles.
#[derive(Debug, Clone)]
pub struct ShaderRegistryMap {
    def: ShaderRegistryDef,
    strings: StringRegistry,
}

impl ShaderRegistryMap {
    pub fn new(def: ShaderRegistryDef, strings: Vec<String>) -> Self {
        ShaderRegistryMap {
            def,
            strings: StringRegistry::from_table(strings),
        }
    }

    pub fn strings(&self) -> &StringRegistry {
        &self.strings
    }

    pub fn string(&self, id: StringId) -> &str {
        self.strings.lookup(id)
    }

    pub fn try_string_id(&self, value: &str) -> Option<StringId> {
        self.strings.try_lookup(value)
    }

    pub fn definition(&self) -> &ShaderRegistryDef {
        &self.def
    }

    pub fn shader(&self, id: u32) -> &ShaderDef {
        &self.def.shaders[id as usize]
    }

    pub fn effect(&self, id: u32) -> &EffectDef {
        &self.def.effects[id as usize]
    }

    pub fn constant(&self, id: u32) -> &ConstDef {
        &self.def.constants[id as usize]
    }

    pub fn const_buf(&self, id: u32) -> &ConstBufDef {
        &self.def.const_bufs[id as usize]
    }

    pub fn io_element(&self, id: u32) -> &IOElementDef {
        &self.def.io_elements[id as usize]
    }

    pub fn resource(&self, id: u32) -> &ResourceDef {
        &self.def.resources[id as usize]
    }

    pub fn id_group(&self, id: u32) -> &[u32] {
        &self.def.id_groups[id as usize]
    }

    pub fn byte_code(&self, id: u32) -> &[u8] {
        &self.def.byte_code[id as usize]
    }

    pub fn shader_count(&self) -> u32 {
        self.def.shaders.len() as u32
    }

    pub fn effect_count(&self) -> u32 {
        self.def.effects.len() as u32
    }
}

/// Read accessor for one shader definition. Handles never own storage.
#[derive(Clone, Copy)]
pub struct ShaderDefHandle<'a> {
    map: &'a ShaderRegistryMap,
    def: &'a ShaderDef,
}

impl<'a> ShaderDefHandle<'a> {
    pub fn new(map: &'a ShaderRegistryMap, shader_id: u32) -> Self {
        ShaderDefHandle {
            map,
            def: map.shader(shader_id),
        }
    }

    pub fn definition(&self) -> &'a ShaderDef {
        self.def
    }

    pub fn name_id(&self) -> StringId {
        self.def.name_id
    }

    pub fn name(&self) -> &'a str {
        self.map.string(self.def.name_id)
    }

    pub fn file_path(&self) -> &'a str {
        self.map.string(self.def.file_id)
    }

    pub fn stage(&self) -> crate::data::ShadeStage {
        self.def.stage
    }

    pub fn thread_group_size(&self) -> (u32, u32, u32) {
        self.def.thread_group_size
    }

    pub fn byte_code(&self) -> &'a [u8] {
        self.map.byte_code(self.def.byte_code_id)
    }

    pub fn in_layout(&self) -> Option<IOLayoutHandle<'a>> {
        self.def.in_layout_id.map(|id| IOLayoutHandle::new(self.map, id))
    }

    pub fn out_layout(&self) -> Option<IOLayoutHandle<'a>> {
        self.def.out_layout_id.map(|id| IOLayoutHandle::new(self.map, id))
    }

    pub fn resources(&self) -> Option<ResourceGroupHandle<'a>> {
        self.def.res_layout_id.map(|id| ResourceGroupHandle::new(self.map, id))
    }

    pub fn const_bufs(&self) -> Option<ConstBufGroupHandle<'a>> {
        self.def.cbuf_group_id.map(|id| ConstBufGroupHandle::new(self.map, id))
    }
}

/// Read accessor for one effect and its pass groups.
#[derive(Clone, Copy)]
pub struct EffectDefHandle<'a> {
    map: &'a ShaderRegistryMap,
    def: &'a EffectDef,
    passes: &'a [u32],
}

impl<'a> EffectDefHandle<'a> {
    pub fn new(map: &'a ShaderRegistryMap, effect_id: u32) -> Self {
        let def = map.effect(effect_id);
        EffectDefHandle {
            map,
            def,
            passes: map.id_group(def.pass_group_id),
        }
    }

    pub fn definition(&self) -> &'a EffectDef {
        self.def
    }

    pub fn name_id(&self) -> StringId {
        self.def.name_id
    }

    pub fn name(&self) -> &'a str {
        self.map.string(self.def.name_id)
    }

    pub fn pass_count(&self) -> u32 {
        self.passes.len() as u32
    }

    /// Shader IDs of the given pass, in author order.
    pub fn pass(&self, pass: u32) -> &'a [u32] {
        self.map.id_group(self.passes[pass as usize])
    }

    pub fn shader_count(&self, pass: u32) -> u32 {
        self.pass(pass).len() as u32
    }

    pub fn shader(&self, pass: u32, shader: u32) -> ShaderDefHandle<'a> {
        ShaderDefHandle::new(self.map, self.pass(pass)[shader as usize])
    }
}

/// Read accessor for a shader IO signature.
#[derive(Clone, Copy)]
pub struct IOLayoutHandle<'a> {
    map: &'a ShaderRegistryMap,
    layout: &'a [u32],
}

impl<'a> IOLayoutHandle<'a> {
    pub fn new(map: &'a ShaderRegistryMap, layout_id: u32) -> Self {
        IOLayoutHandle {
            map,
            layout: map.id_group(layout_id),
        }
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn get(&self, index: usize) -> &'a IOElementDef {
        self.map.io_element(self.layout[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a IOElementDef> + '_ {
        self.layout.iter().map(|&id| self.map.io_element(id))
    }
}

/// Read accessor for a shader's bound resource list.
#[derive(Clone, Copy)]
pub struct ResourceGroupHandle<'a> {
    map: &'a ShaderRegistryMap,
    layout: &'a [u32],
}

impl<'a> ResourceGroupHandle<'a> {
    pub fn new(map: &'a ShaderRegistryMap, layout_id: u32) -> Self {
        ResourceGroupHandle {
            map,
            layout: map.id_group(layout_id),
        }
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn get(&self, index: usize) -> &'a ResourceDef {
        self.map.resource(self.layout[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a ResourceDef> + '_ {
        self.layout.iter().map(|&id| self.map.resource(id))
    }
}

/// Read accessor for one constant buffer layout.
#[derive(Clone, Copy)]
pub struct ConstBufDefHandle<'a> {
    map: &'a ShaderRegistryMap,
    def: &'a ConstBufDef,
}

impl<'a> ConstBufDefHandle<'a> {
    pub fn new(map: &'a ShaderRegistryMap, buf_id: u32) -> Self {
        ConstBufDefHandle {
            map,
            def: map.const_buf(buf_id),
        }
    }

    pub fn name_id(&self) -> StringId {
        self.def.string_id
    }

    pub fn name(&self) -> &'a str {
        self.map.string(self.def.string_id)
    }

    pub fn size(&self) -> u32 {
        self.def.size
    }

    pub fn len(&self) -> usize {
        self.map.id_group(self.def.layout_id).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> &'a ConstDef {
        self.map.constant(self.map.id_group(self.def.layout_id)[index])
    }
}

/// Read accessor for a shader's group of constant buffers.
#[derive(Clone, Copy)]
pub struct ConstBufGroupHandle<'a> {
    map: &'a ShaderRegistryMap,
    layout: &'a [u32],
}

impl<'a> ConstBufGroupHandle<'a> {
    pub fn new(map: &'a ShaderRegistryMap, group_id: u32) -> Self {
        ConstBufGroupHandle {
            map,
            layout: map.id_group(group_id),
        }
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn get(&self, index: usize) -> ConstBufDefHandle<'a> {
        ConstBufDefHandle::new(self.map, self.layout[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ShadeStage;

    #[test]
    fn arenas_deduplicate_by_value() {
        let mut reg = ShaderRegistryBuilder::new();

        let c = ConstDef { string_id: 0, offset: 0, size: 16 };
        assert_eq!(reg.get_or_add_constant(c), 0);
        assert_eq!(reg.get_or_add_constant(c), 0);
        assert_eq!(
            reg.get_or_add_constant(ConstDef { string_id: 0, offset: 16, size: 16 }),
            1
        );

        assert_eq!(reg.get_or_add_id_group(&[1, 2, 3]), 0);
        assert_eq!(reg.get_or_add_id_group(&[1, 2, 3]), 0);
        // ordered equality: permutations are distinct
        assert_eq!(reg.get_or_add_id_group(&[3, 2, 1]), 1);

        assert_eq!(reg.get_or_add_byte_code(b"DXBC0"), 0);
        assert_eq!(reg.get_or_add_byte_code(b"DXBC0"), 0);
        assert_eq!(reg.get_or_add_byte_code(b"DXBC1"), 1);
    }

    #[test]
    fn shader_ids_stable_within_build() {
        let mut reg = ShaderRegistryBuilder::new();
        let name_id = reg.get_or_add_string("VS_Main");
        let file_id = reg.get_or_add_string("fx/test.wfx");
        let code_id = reg.get_or_add_byte_code(b"code");

        let def = ShaderDef {
            file_id,
            byte_code_id: code_id,
            name_id,
            stage: ShadeStage::Vertex,
            thread_group_size: (0, 0, 0),
            in_layout_id: None,
            out_layout_id: None,
            res_layout_id: None,
            cbuf_group_id: None,
        };

        let id = reg.get_or_add_shader(def);
        assert_eq!(reg.get_or_add_shader(def), id);
        assert_eq!(reg.shader(id).name_id, name_id);
        assert_eq!(reg.shader_count(), 1);
    }

    #[test]
    fn tmp_buffers_recycle() {
        let reg = ShaderRegistryBuilder::new();
        {
            let mut buf = reg.tmp_id_buffer();
            buf.push(42);
            assert_eq!(buf.len(), 1);
        }
        // returned cleared
        let buf = reg.tmp_id_buffer();
        assert!(buf.is_empty());
    }

    #[test]
    fn handles_resolve_groups() {
        let mut reg = ShaderRegistryBuilder::new();
        let name = reg.get_or_add_string("Blur");
        let s0 = {
            let file = reg.get_or_add_string("a.wfx");
            let code = reg.get_or_add_byte_code(b"x");
            reg.get_or_add_shader(ShaderDef {
                file_id: file,
                byte_code_id: code,
                name_id: name,
                stage: ShadeStage::Pixel,
                thread_group_size: (0, 0, 0),
                in_layout_id: None,
                out_layout_id: None,
                res_layout_id: None,
                cbuf_group_id: None,
            })
        };
        let pass = reg.get_or_add_id_group(&[s0]);
        let passes = reg.get_or_add_id_group(&[pass]);
        let effect = reg.get_or_add_effect(EffectDef { name_id: name, pass_group_id: passes });

        let map = ShaderRegistryMap::new(reg.get_definition(), reg.string_table());
        let handle = EffectDefHandle::new(&map, effect);
        assert_eq!(handle.pass_count(), 1);
        assert_eq!(handle.shader_count(0), 1);
        assert_eq!(handle.shader(0, 0).name(), "Blur");
    }
}
