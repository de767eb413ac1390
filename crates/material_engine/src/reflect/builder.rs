//! Word-level SPIR-V assembler for tests
//!
//! Emits just enough of a module (entry point, names, decorations, types,
//! global variables) for the reflector to see a resource interface. Function
//! bodies are never emitted.

use super::spirv::{decoration, execution_model, op, storage_class, DIM_BUFFER, SPIRV_MAGIC};

/// Ids of a block variable and its struct type
#[derive(Debug, Clone, Copy)]
pub struct BlockVar {
    pub variable: u32,
    pub block: u32,
}

#[derive(Debug, Default)]
pub struct SpirvBuilder {
    next_id: u32,
    entry_point: Vec<u32>,
    body: Vec<u32>,
}

fn encode_string(words: &mut Vec<u32>, s: &str) {
    let mut word = 0u32;
    for (i, &b) in s.as_bytes().iter().enumerate() {
        word |= u32::from(b) << ((i % 4) * 8);
        if i % 4 == 3 {
            words.push(word);
            word = 0;
        }
    }
    words.push(word);
}

impl SpirvBuilder {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn with_model(model: u32, name: &str) -> Self {
        Self::new().with_entry(model, name)
    }

    pub fn vertex(self, name: &str) -> Self {
        self.with_entry(execution_model::VERTEX, name)
    }

    pub fn fragment(self, name: &str) -> Self {
        self.with_entry(execution_model::FRAGMENT, name)
    }

    pub fn compute(self, name: &str) -> Self {
        self.with_entry(execution_model::GL_COMPUTE, name)
    }

    fn with_entry(mut self, model: u32, name: &str) -> Self {
        let function = self.id();
        let mut operands = vec![model, function];
        encode_string(&mut operands, name);
        self.entry_point = Self::encode(op::ENTRY_POINT, &operands);
        self
    }

    pub fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn encode(opcode: u16, operands: &[u32]) -> Vec<u32> {
        let word_count = u32::try_from(operands.len() + 1).unwrap();
        let mut words = vec![(word_count << 16) | u32::from(opcode)];
        words.extend_from_slice(operands);
        words
    }

    pub fn instruction(&mut self, opcode: u16, operands: &[u32]) {
        self.body.extend(Self::encode(opcode, operands));
    }

    pub fn name(&mut self, target: u32, name: &str) {
        if name.is_empty() {
            return;
        }
        let mut operands = vec![target];
        encode_string(&mut operands, name);
        self.instruction(op::NAME, &operands);
    }

    pub fn decorate(&mut self, target: u32, kind: u32) {
        self.instruction(op::DECORATE, &[target, kind]);
    }

    pub fn decorate_value(&mut self, target: u32, kind: u32, value: u32) {
        self.instruction(op::DECORATE, &[target, kind, value]);
    }

    pub fn member_decorate_value(&mut self, target: u32, member: u32, kind: u32, value: u32) {
        self.instruction(op::MEMBER_DECORATE, &[target, member, kind, value]);
    }

    pub fn type_float(&mut self, width: u32) -> u32 {
        let id = self.id();
        self.instruction(op::TYPE_FLOAT, &[id, width]);
        id
    }

    pub fn type_int(&mut self, width: u32, signed: bool) -> u32 {
        let id = self.id();
        self.instruction(op::TYPE_INT, &[id, width, u32::from(signed)]);
        id
    }

    pub fn type_vector(&mut self, component: u32, count: u32) -> u32 {
        let id = self.id();
        self.instruction(op::TYPE_VECTOR, &[id, component, count]);
        id
    }

    pub fn type_matrix(&mut self, column: u32, columns: u32) -> u32 {
        let id = self.id();
        self.instruction(op::TYPE_MATRIX, &[id, column, columns]);
        id
    }

    pub fn type_array(&mut self, element: u32, length: u32) -> u32 {
        let id = self.id();
        self.instruction(op::TYPE_ARRAY, &[id, element, length]);
        id
    }

    pub fn type_struct(&mut self, members: &[u32]) -> u32 {
        let id = self.id();
        let mut operands = vec![id];
        operands.extend_from_slice(members);
        self.instruction(op::TYPE_STRUCT, &operands);
        id
    }

    pub fn type_pointer(&mut self, class: u32, pointee: u32) -> u32 {
        let id = self.id();
        self.instruction(op::TYPE_POINTER, &[id, class, pointee]);
        id
    }

    pub fn constant_u32(&mut self, ty: u32, value: u32) -> u32 {
        let id = self.id();
        self.instruction(op::CONSTANT, &[ty, id, value]);
        id
    }

    pub fn variable(&mut self, pointee: u32, class: u32) -> u32 {
        let pointer = self.type_pointer(class, pointee);
        let id = self.id();
        self.instruction(op::VARIABLE, &[pointer, id, class]);
        id
    }

    fn image_type(&mut self, dim: u32, sampled: u32) -> u32 {
        let float = self.type_float(32);
        let id = self.id();
        // sampled type, dim, depth, arrayed, ms, sampled, format
        self.instruction(op::TYPE_IMAGE, &[id, float, dim, 0, 0, 0, sampled, 0]);
        id
    }

    fn sampled_image_type(&mut self) -> u32 {
        // Dim2D
        let image = self.image_type(1, 1);
        let id = self.id();
        self.instruction(op::TYPE_SAMPLED_IMAGE, &[id, image]);
        id
    }

    fn bind(&mut self, variable: u32, set: u32, binding: u32) {
        self.decorate_value(variable, decoration::DESCRIPTOR_SET, set);
        self.decorate_value(variable, decoration::BINDING, binding);
    }

    fn resource(&mut self, ty: u32, set: u32, binding: u32, name: &str) -> u32 {
        let variable = self.variable(ty, storage_class::UNIFORM_CONSTANT);
        self.name(variable, name);
        self.bind(variable, set, binding);
        variable
    }

    fn block(&mut self, kind: u32, members: &[(u32, u32)]) -> u32 {
        let types: Vec<u32> = members.iter().map(|&(ty, _)| ty).collect();
        let block = self.type_struct(&types);
        self.decorate(block, kind);
        for (index, &(_, offset)) in members.iter().enumerate() {
            self.member_decorate_value(block, u32::try_from(index).unwrap(), decoration::OFFSET, offset);
        }
        block
    }

    pub fn sampler(&mut self, set: u32, binding: u32, name: &str) -> u32 {
        let id = self.id();
        self.instruction(op::TYPE_SAMPLER, &[id]);
        self.resource(id, set, binding, name)
    }

    pub fn combined_image_sampler(&mut self, set: u32, binding: u32, name: &str) -> u32 {
        let ty = self.sampled_image_type();
        self.resource(ty, set, binding, name)
    }

    pub fn combined_image_sampler_array(&mut self, set: u32, binding: u32, name: &str, length: u32) -> u32 {
        let element = self.sampled_image_type();
        let array = self.type_array(element, length);
        self.resource(array, set, binding, name)
    }

    pub fn combined_image_sampler_unset(&mut self, binding: u32, name: &str) -> u32 {
        let ty = self.sampled_image_type();
        let variable = self.variable(ty, storage_class::UNIFORM_CONSTANT);
        self.name(variable, name);
        self.decorate_value(variable, decoration::BINDING, binding);
        variable
    }

    pub fn runtime_sampler_array(&mut self, set: u32, binding: u32) -> u32 {
        let element = self.sampled_image_type();
        let array = self.id();
        self.instruction(op::TYPE_RUNTIME_ARRAY, &[array, element]);
        self.resource(array, set, binding, "")
    }

    pub fn undecorated_sampler(&mut self) -> u32 {
        let ty = self.id();
        self.instruction(op::TYPE_SAMPLER, &[ty]);
        self.variable(ty, storage_class::UNIFORM_CONSTANT)
    }

    pub fn sampled_image(&mut self, set: u32, binding: u32, name: &str) -> u32 {
        let ty = self.image_type(1, 1);
        self.resource(ty, set, binding, name)
    }

    pub fn storage_image(&mut self, set: u32, binding: u32, name: &str) -> u32 {
        let ty = self.image_type(1, 2);
        self.resource(ty, set, binding, name)
    }

    pub fn texel_buffer(&mut self, set: u32, binding: u32, storage: bool) -> u32 {
        let ty = self.image_type(DIM_BUFFER, if storage { 2 } else { 1 });
        self.resource(ty, set, binding, "")
    }

    pub fn uniform_block(
        &mut self,
        set: u32,
        binding: u32,
        name: &str,
        block_name: &str,
        members: &[(u32, u32)],
    ) -> BlockVar {
        let block = self.block(decoration::BLOCK, members);
        self.name(block, block_name);
        let variable = self.variable(block, storage_class::UNIFORM);
        self.name(variable, name);
        self.bind(variable, set, binding);
        BlockVar { variable, block }
    }

    /// Uniform block of `size` bytes made of floats
    pub fn uniform_floats(&mut self, set: u32, binding: u32, name: &str, size: u32) -> BlockVar {
        let float = self.type_float(32);
        let members: Vec<(u32, u32)> = (0..size / 4).map(|i| (float, i * 4)).collect();
        self.uniform_block(set, binding, name, "", &members)
    }

    pub fn legacy_buffer_block(&mut self, set: u32, binding: u32, members: &[(u32, u32)]) -> BlockVar {
        let block = self.block(decoration::BUFFER_BLOCK, members);
        let variable = self.variable(block, storage_class::UNIFORM);
        self.bind(variable, set, binding);
        BlockVar { variable, block }
    }

    pub fn storage_buffer(&mut self, set: u32, binding: u32, name: &str, members: &[(u32, u32)]) -> BlockVar {
        let block = self.block(decoration::BLOCK, members);
        let variable = self.variable(block, storage_class::STORAGE_BUFFER);
        self.name(variable, name);
        self.bind(variable, set, binding);
        BlockVar { variable, block }
    }

    pub fn push_constant_block(&mut self, members: &[(u32, u32)]) -> BlockVar {
        let block = self.block(decoration::BLOCK, members);
        let variable = self.variable(block, storage_class::PUSH_CONSTANT);
        BlockVar { variable, block }
    }

    /// Header plus every emitted instruction, entry point first
    pub fn finish(self) -> Vec<u32> {
        let mut words = vec![SPIRV_MAGIC, 0x0001_0000, 0, self.next_id, 0];
        words.extend(self.entry_point);
        words.extend(self.body);
        words
    }
}
