// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Graphics and compute pipelines, as the command buffer sees them.
//!
//! A pipeline bundles the shader variants of every stage with the state that was fixed when it
//! was created. Most of that state is turned into register writes ahead of time: binding the
//! pipeline copies a pre-baked register stream. The rest is what the command buffer needs to make
//! decisions at draw time, such as which dynamic states the pipeline actually reads or how the
//! primitive grouping registers should be programmed.

use crate::{
    command_buffer::state::{DirtyState, DynamicState},
    cs::CommandStream,
    descriptor_set::PipelineLayout,
    device::{ChipClass, ChipFamily, Device},
    macros::vulkan_enum,
    registers::*,
    shader::{ShaderStage, ShaderStages, ShaderVariant, UserDataSlot},
    ValidationError,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum number of vertex buffer bindings.
pub const MAX_VBS: usize = 32;

/// Maximum number of transform feedback buffers.
pub const MAX_SO_BUFFERS: usize = 4;

/// The bind point of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics = 0,
    Compute = 1,
}

impl PipelineBindPoint {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// What the descriptor flushing code needs to know about a bound pipeline.
pub trait Pipeline {
    fn bind_point(&self) -> PipelineBindPoint;

    fn layout(&self) -> &Arc<PipelineLayout>;

    /// Returns the shader of a stage, if the pipeline has one.
    fn shader(&self, stage: ShaderStage) -> Option<&Arc<ShaderVariant>>;

    /// Returns the first user data register of the hardware stage a logical stage runs on.
    fn user_data_0(&self, stage: ShaderStage) -> u32;

    /// Whether the shaders find descriptor sets through a table instead of one SGPR per set.
    fn need_indirect_descriptor_sets(&self) -> bool;

    /// Iterates over the stages that have a shader.
    fn active_stages(&self) -> ShaderStages {
        ShaderStage::ALL
            .into_iter()
            .filter(|&stage| self.shader(stage).is_some())
            .fold(ShaderStages::empty(), |stages, stage| stages | stage.flag())
    }
}

vulkan_enum! {
    /// How vertices are assembled into primitives.
    PrimitiveTopology = PrimitiveTopology(i32);

    PointList = POINT_LIST,
    LineList = LINE_LIST,
    LineStrip = LINE_STRIP,
    TriangleList = TRIANGLE_LIST,
    TriangleStrip = TRIANGLE_STRIP,
    TriangleFan = TRIANGLE_FAN,
    LineListWithAdjacency = LINE_LIST_WITH_ADJACENCY,
    LineStripWithAdjacency = LINE_STRIP_WITH_ADJACENCY,
    TriangleListWithAdjacency = TRIANGLE_LIST_WITH_ADJACENCY,
    TriangleStripWithAdjacency = TRIANGLE_STRIP_WITH_ADJACENCY,
    PatchList = PATCH_LIST,
}

impl PrimitiveTopology {
    /// Returns the value of VGT_PRIMITIVE_TYPE.
    pub fn hw_prim(self) -> u32 {
        match self {
            Self::PointList => V_008958_DI_PT_POINTLIST,
            Self::LineList => V_008958_DI_PT_LINELIST,
            Self::LineStrip => V_008958_DI_PT_LINESTRIP,
            Self::TriangleList => V_008958_DI_PT_TRILIST,
            Self::TriangleStrip => V_008958_DI_PT_TRISTRIP,
            Self::TriangleFan => V_008958_DI_PT_TRIFAN,
            Self::LineListWithAdjacency => V_008958_DI_PT_LINELIST_ADJ,
            Self::LineStripWithAdjacency => V_008958_DI_PT_LINESTRIP_ADJ,
            Self::TriangleListWithAdjacency => V_008958_DI_PT_TRILIST_ADJ,
            Self::TriangleStripWithAdjacency => V_008958_DI_PT_TRISTRIP_ADJ,
            Self::PatchList => V_008958_DI_PT_PATCH,
        }
    }

    /// Returns how many vertices make the first primitive, and how many more each next one.
    pub fn vertex_count(self, patch_control_points: u32) -> PrimVertexCount {
        let (min, incr) = match self {
            Self::PointList => (1, 1),
            Self::LineList => (2, 2),
            Self::LineStrip => (2, 1),
            Self::TriangleList => (3, 3),
            Self::TriangleStrip | Self::TriangleFan => (3, 1),
            Self::LineListWithAdjacency => (4, 4),
            Self::LineStripWithAdjacency => (4, 1),
            Self::TriangleListWithAdjacency => (6, 6),
            Self::TriangleStripWithAdjacency => (6, 2),
            Self::PatchList => (patch_control_points, patch_control_points),
        };

        PrimVertexCount { min, incr }
    }
}

/// See [`PrimitiveTopology::vertex_count`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrimVertexCount {
    pub min: u32,
    pub incr: u32,
}

impl PrimVertexCount {
    /// Returns the number of complete primitives made of `num_vertices` vertices.
    pub fn prims_for_vertices(self, num_vertices: u32) -> u32 {
        if num_vertices == 0 || self.incr == 0 || num_vertices < self.min {
            return 0;
        }

        1 + (num_vertices - self.min) / self.incr
    }
}

/// Pipeline-constant inputs to IA_MULTI_VGT_PARAM. The draw-dependent fields are added when
/// drawing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IaMultiVgtParam {
    pub primgroup_size: u32,
    pub partial_es_wave: bool,
    pub partial_vs_wave: bool,
    pub ia_switch_on_eoi: bool,
    pub ia_switch_on_eop: bool,
    pub wd_switch_on_eop: bool,
    pub base: u32,
}

/// A vertex attribute, as it is fetched from its binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexElement {
    pub binding: u32,
    /// Offset of the attribute within a vertex.
    pub offset: u32,
    /// Size of the attribute format, in bytes.
    pub format_size: u32,
    /// Last dword of the buffer descriptor, which encodes the format.
    pub rsrc_word3: u32,
}

/// Parameters to create a new `GraphicsPipeline`.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineCreateInfo {
    pub layout: Arc<PipelineLayout>,
    /// One variant per logical stage. Must contain a vertex shader.
    pub shaders: Vec<Arc<ShaderVariant>>,
    pub topology: PrimitiveTopology,
    pub primitive_restart_enable: bool,
    pub patch_control_points: u32,
    /// Number of patches per thread group, for tessellation.
    pub tess_patches_per_group: u32,
    /// Whether a shader reads the primitive ID.
    pub prim_id_used: bool,
    pub rasterizer_discard_enable: bool,
    pub depth_bias_enable: bool,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    /// `Some` if discard rectangles are enabled, with their number.
    pub discard_rectangle_count: Option<u32>,
    /// States whose value is set with commands instead of being taken from `static_state`.
    pub dynamic_states: DirtyState,
    pub static_state: DynamicState,
    /// Stride of every vertex binding, indexed by binding number.
    pub vertex_binding_strides: Vec<u32>,
    pub vertex_elements: Vec<VertexElement>,
    /// Stride of every transform feedback buffer, in bytes. Zero if the buffer is not written.
    pub streamout_strides: [u32; MAX_SO_BUFFERS],
    pub esgs_ring_size: u32,
    pub gsvs_ring_size: u32,
    pub rasterization_samples: u32,
    /// Whether the guard band can be used, which is the case for non-point primitives.
    pub can_use_guardband: bool,
    /// Context registers to write when the pipeline is bound.
    pub context_registers: Vec<(u32, u32)>,
    /// SH registers to write when the pipeline is bound.
    pub sh_registers: Vec<(u32, u32)>,
}

impl GraphicsPipelineCreateInfo {
    /// Returns a `GraphicsPipelineCreateInfo` with the given layout and shaders, and default
    /// values for everything else.
    pub fn new(layout: Arc<PipelineLayout>, shaders: Vec<Arc<ShaderVariant>>) -> Self {
        GraphicsPipelineCreateInfo {
            layout,
            shaders,
            topology: PrimitiveTopology::TriangleList,
            primitive_restart_enable: false,
            patch_control_points: 0,
            tess_patches_per_group: 0,
            prim_id_used: false,
            rasterizer_discard_enable: false,
            depth_bias_enable: false,
            depth_bounds_test_enable: false,
            stencil_test_enable: false,
            discard_rectangle_count: None,
            dynamic_states: DirtyState::VIEWPORT | DirtyState::SCISSOR,
            static_state: DynamicState::default(),
            vertex_binding_strides: Vec::new(),
            vertex_elements: Vec::new(),
            streamout_strides: [0; MAX_SO_BUFFERS],
            esgs_ring_size: 0,
            gsvs_ring_size: 0,
            rasterization_samples: 1,
            can_use_guardband: true,
            context_registers: Vec::new(),
            sh_registers: Vec::new(),
        }
    }
}

/// A graphics pipeline.
#[derive(Debug)]
pub struct GraphicsPipeline {
    layout: Arc<PipelineLayout>,
    shaders: [Option<Arc<ShaderVariant>>; ShaderStage::COUNT],
    user_data_0: [u32; ShaderStage::COUNT],
    need_indirect_descriptor_sets: bool,

    topology: PrimitiveTopology,
    prim_vertex_count: PrimVertexCount,
    primitive_restart_enable: bool,
    ia_multi_vgt_param: IaMultiVgtParam,
    can_use_guardband: bool,
    rasterization_samples: u32,

    dynamic_states: DirtyState,
    static_state: DynamicState,
    needed_dynamic_state: DirtyState,

    vertex_binding_strides: [u32; MAX_VBS],
    vertex_elements: SmallVec<[VertexElement; 8]>,
    streamout_strides: [u32; MAX_SO_BUFFERS],

    esgs_ring_size: u32,
    gsvs_ring_size: u32,
    scratch_bytes_per_wave: u32,
    max_waves: u32,

    registers: Vec<u32>,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<Device>,
        create_info: GraphicsPipelineCreateInfo,
    ) -> Result<Arc<GraphicsPipeline>, Box<ValidationError>> {
        Self::validate_new(&create_info)?;

        let GraphicsPipelineCreateInfo {
            layout,
            shaders: shader_list,
            topology,
            primitive_restart_enable,
            patch_control_points,
            tess_patches_per_group,
            prim_id_used,
            rasterizer_discard_enable,
            depth_bias_enable,
            depth_bounds_test_enable,
            stencil_test_enable,
            discard_rectangle_count,
            dynamic_states,
            static_state,
            vertex_binding_strides: strides,
            vertex_elements,
            streamout_strides,
            esgs_ring_size,
            gsvs_ring_size,
            rasterization_samples,
            can_use_guardband,
            context_registers,
            sh_registers,
        } = create_info;

        let mut shaders: [Option<Arc<ShaderVariant>>; ShaderStage::COUNT] = Default::default();
        for shader in shader_list {
            let stage = shader.stage();
            shaders[stage.index()] = Some(shader);
        }

        let has_gs = shaders[ShaderStage::Geometry.index()].is_some();
        let has_tess = shaders[ShaderStage::TessellationControl.index()].is_some();
        let chip_class = device.chip_class();

        let mut user_data_0 = [0; ShaderStage::COUNT];
        for stage in ShaderStage::ALL {
            user_data_0[stage.index()] = user_data_0_for_stage(stage, chip_class, has_gs, has_tess);
        }

        let needed_dynamic_state = needed_dynamic_state(
            rasterizer_discard_enable,
            depth_bias_enable,
            depth_bounds_test_enable,
            stencil_test_enable,
            discard_rectangle_count.is_some(),
        );

        let mut static_state = static_state;
        if let Some(count) = discard_rectangle_count {
            static_state.discard_rectangle_count = count;
        }

        let ia_multi_vgt_param = compute_ia_multi_vgt_param(
            device,
            topology,
            primitive_restart_enable,
            prim_id_used,
            has_gs,
            has_tess,
            tess_patches_per_group,
        );

        let (scratch_bytes_per_wave, max_waves) = scratch_requirements(&shaders);

        let mut vertex_binding_strides = [0; MAX_VBS];
        vertex_binding_strides[..strides.len()].copy_from_slice(&strides);

        let need_indirect_descriptor_sets = shaders.iter().flatten().any(|shader| {
            shader
                .user_sgprs()
                .get(UserDataSlot::IndirectDescriptorSets)
                .is_some()
        });

        // Pre-bake the registers written on every bind.
        let mut cs = CommandStream::new();
        for &(reg, value) in &sh_registers {
            cs.set_sh_reg(reg, value);
        }
        for &(reg, value) in &context_registers {
            cs.set_context_reg(reg, value);
        }
        device.layout().vgt_primitive_type.emit(&mut cs, topology.hw_prim());

        Ok(Arc::new(GraphicsPipeline {
            layout,
            shaders,
            user_data_0,
            need_indirect_descriptor_sets,
            topology,
            prim_vertex_count: topology.vertex_count(patch_control_points),
            primitive_restart_enable,
            ia_multi_vgt_param,
            can_use_guardband,
            rasterization_samples,
            dynamic_states,
            static_state,
            needed_dynamic_state,
            vertex_binding_strides,
            vertex_elements: vertex_elements.into_iter().collect(),
            streamout_strides,
            esgs_ring_size,
            gsvs_ring_size,
            scratch_bytes_per_wave,
            max_waves,
            registers: cs.words().to_vec(),
        }))
    }

    fn validate_new(create_info: &GraphicsPipelineCreateInfo) -> Result<(), Box<ValidationError>> {
        let mut seen = ShaderStages::empty();

        for (index, shader) in create_info.shaders.iter().enumerate() {
            let flag = shader.stage().flag();

            if flag == ShaderStages::COMPUTE {
                return Err(ValidationError::new(
                    format!("create_info.shaders[{}]", index),
                    "is a compute shader",
                ));
            }

            if seen.intersects(flag) {
                return Err(ValidationError::new(
                    format!("create_info.shaders[{}]", index),
                    "has the same stage as another element",
                ));
            }

            seen |= flag;
        }

        if !seen.intersects(ShaderStages::VERTEX) {
            return Err(ValidationError::new(
                "create_info.shaders",
                "does not contain a vertex shader",
            ));
        }

        let tess = ShaderStages::TESSELLATION_CONTROL | ShaderStages::TESSELLATION_EVALUATION;
        if seen.intersects(tess) && !seen.contains(tess) {
            return Err(ValidationError::new(
                "create_info.shaders",
                "contains only one of the two tessellation stages",
            ));
        }

        if seen.contains(tess) != (create_info.topology == PrimitiveTopology::PatchList) {
            return Err(ValidationError::new(
                "create_info.topology",
                "must be `PatchList` exactly when tessellation shaders are present",
            ));
        }

        if create_info.vertex_binding_strides.len() > MAX_VBS {
            return Err(ValidationError::new(
                "create_info.vertex_binding_strides",
                "has more elements than the maximum number of vertex bindings",
            ));
        }

        if create_info
            .vertex_elements
            .iter()
            .any(|element| element.binding as usize >= create_info.vertex_binding_strides.len())
        {
            return Err(ValidationError::new(
                "create_info.vertex_elements",
                "reference a binding without a stride",
            ));
        }

        if !create_info.dynamic_states.difference(DirtyState::DYNAMIC_ALL).is_empty() {
            return Err(ValidationError::new(
                "create_info.dynamic_states",
                "contains a bit that is not a dynamic state",
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    #[inline]
    pub fn prim_vertex_count(&self) -> PrimVertexCount {
        self.prim_vertex_count
    }

    #[inline]
    pub fn primitive_restart_enable(&self) -> bool {
        self.primitive_restart_enable
    }

    #[inline]
    pub fn ia_multi_vgt_param(&self) -> &IaMultiVgtParam {
        &self.ia_multi_vgt_param
    }

    #[inline]
    pub fn can_use_guardband(&self) -> bool {
        self.can_use_guardband
    }

    #[inline]
    pub fn rasterization_samples(&self) -> u32 {
        self.rasterization_samples
    }

    /// Returns the states set with commands.
    #[inline]
    pub fn dynamic_states(&self) -> DirtyState {
        self.dynamic_states
    }

    /// Returns the values of the states that are not dynamic.
    #[inline]
    pub fn static_state(&self) -> &DynamicState {
        &self.static_state
    }

    /// Returns the dynamic states that this pipeline actually reads.
    #[inline]
    pub fn needed_dynamic_state(&self) -> DirtyState {
        self.needed_dynamic_state
    }

    #[inline]
    pub fn vertex_binding_strides(&self) -> &[u32; MAX_VBS] {
        &self.vertex_binding_strides
    }

    #[inline]
    pub fn vertex_elements(&self) -> &[VertexElement] {
        &self.vertex_elements
    }

    #[inline]
    pub fn streamout_strides(&self) -> &[u32; MAX_SO_BUFFERS] {
        &self.streamout_strides
    }

    /// Returns the mask of transform feedback buffers written by the pipeline.
    pub fn streamout_enabled_mask(&self) -> u32 {
        self.streamout_strides
            .iter()
            .enumerate()
            .filter(|&(_, &stride)| stride != 0)
            .fold(0, |mask, (i, _)| mask | 1 << i)
    }

    #[inline]
    pub fn has_gs(&self) -> bool {
        self.shaders[ShaderStage::Geometry.index()].is_some()
    }

    #[inline]
    pub fn has_tess(&self) -> bool {
        self.shaders[ShaderStage::TessellationControl.index()].is_some()
    }

    /// Returns the shader that runs last before rasterization, which writes transform feedback.
    pub fn last_vertex_stage(&self) -> ShaderStage {
        if self.has_gs() {
            ShaderStage::Geometry
        } else if self.has_tess() {
            ShaderStage::TessellationEvaluation
        } else {
            ShaderStage::Vertex
        }
    }

    #[inline]
    pub fn esgs_ring_size(&self) -> u32 {
        self.esgs_ring_size
    }

    #[inline]
    pub fn gsvs_ring_size(&self) -> u32 {
        self.gsvs_ring_size
    }

    /// Returns the scratch memory needed by the pipeline, in bytes.
    #[inline]
    pub fn scratch_size(&self) -> u32 {
        self.scratch_bytes_per_wave * self.max_waves
    }

    /// Returns the register writes performed when the pipeline is bound.
    #[inline]
    pub fn registers(&self) -> &[u32] {
        &self.registers
    }
}

impl Pipeline for GraphicsPipeline {
    #[inline]
    fn bind_point(&self) -> PipelineBindPoint {
        PipelineBindPoint::Graphics
    }

    #[inline]
    fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    #[inline]
    fn shader(&self, stage: ShaderStage) -> Option<&Arc<ShaderVariant>> {
        self.shaders[stage.index()].as_ref()
    }

    #[inline]
    fn user_data_0(&self, stage: ShaderStage) -> u32 {
        self.user_data_0[stage.index()]
    }

    #[inline]
    fn need_indirect_descriptor_sets(&self) -> bool {
        self.need_indirect_descriptor_sets
    }
}

/// Parameters to create a new `ComputePipeline`.
#[derive(Clone, Debug)]
pub struct ComputePipelineCreateInfo {
    pub layout: Arc<PipelineLayout>,
    pub shader: Arc<ShaderVariant>,
    /// SH registers to write when the pipeline is bound.
    pub sh_registers: Vec<(u32, u32)>,
}

/// A compute pipeline.
#[derive(Debug)]
pub struct ComputePipeline {
    layout: Arc<PipelineLayout>,
    shader: Arc<ShaderVariant>,
    need_indirect_descriptor_sets: bool,
    registers: Vec<u32>,
}

impl ComputePipeline {
    pub fn new(
        create_info: ComputePipelineCreateInfo,
    ) -> Result<Arc<ComputePipeline>, Box<ValidationError>> {
        let ComputePipelineCreateInfo {
            layout,
            shader,
            sh_registers,
        } = create_info;

        if shader.stage() != ShaderStage::Compute {
            return Err(ValidationError::new(
                "create_info.shader",
                "is not a compute shader",
            ));
        }

        let mut cs = CommandStream::new();
        for &(reg, value) in &sh_registers {
            cs.set_sh_reg(reg, value);
        }

        Ok(Arc::new(ComputePipeline {
            need_indirect_descriptor_sets: shader
                .user_sgprs()
                .get(UserDataSlot::IndirectDescriptorSets)
                .is_some(),
            layout,
            shader,
            registers: cs.words().to_vec(),
        }))
    }

    #[inline]
    pub fn compute_shader(&self) -> &Arc<ShaderVariant> {
        &self.shader
    }

    /// Returns the scratch memory needed by the pipeline, in bytes.
    #[inline]
    pub fn scratch_size(&self) -> u32 {
        self.shader.scratch_bytes_per_wave() * self.shader.max_scratch_waves()
    }

    #[inline]
    pub fn registers(&self) -> &[u32] {
        &self.registers
    }
}

impl Pipeline for ComputePipeline {
    #[inline]
    fn bind_point(&self) -> PipelineBindPoint {
        PipelineBindPoint::Compute
    }

    #[inline]
    fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    #[inline]
    fn shader(&self, stage: ShaderStage) -> Option<&Arc<ShaderVariant>> {
        (stage == ShaderStage::Compute).then_some(&self.shader)
    }

    #[inline]
    fn user_data_0(&self, _stage: ShaderStage) -> u32 {
        R_00B900_COMPUTE_USER_DATA_0
    }

    #[inline]
    fn need_indirect_descriptor_sets(&self) -> bool {
        self.need_indirect_descriptor_sets
    }
}

/// Returns the first user data register of the hardware stage that `stage` runs on. On GFX9 the
/// vertex and tessellation control stages are merged, as are the evaluation and geometry stages.
pub fn user_data_0_for_stage(
    stage: ShaderStage,
    chip_class: ChipClass,
    has_gs: bool,
    has_tess: bool,
) -> u32 {
    let gfx9 = chip_class >= ChipClass::Gfx9;

    match stage {
        ShaderStage::Fragment => R_00B030_SPI_SHADER_USER_DATA_PS_0,
        ShaderStage::Vertex => {
            if has_tess {
                if gfx9 {
                    R_00B430_SPI_SHADER_USER_DATA_LS_0_GFX9
                } else {
                    R_00B530_SPI_SHADER_USER_DATA_LS_0
                }
            } else if has_gs {
                R_00B330_SPI_SHADER_USER_DATA_ES_0
            } else {
                R_00B130_SPI_SHADER_USER_DATA_VS_0
            }
        }
        ShaderStage::Geometry => {
            if gfx9 {
                R_00B330_SPI_SHADER_USER_DATA_ES_0
            } else {
                R_00B230_SPI_SHADER_USER_DATA_GS_0
            }
        }
        ShaderStage::TessellationControl => {
            if gfx9 {
                R_00B430_SPI_SHADER_USER_DATA_LS_0_GFX9
            } else {
                R_00B430_SPI_SHADER_USER_DATA_HS_0
            }
        }
        ShaderStage::TessellationEvaluation => {
            if has_gs {
                R_00B330_SPI_SHADER_USER_DATA_ES_0
            } else {
                R_00B130_SPI_SHADER_USER_DATA_VS_0
            }
        }
        ShaderStage::Compute => R_00B900_COMPUTE_USER_DATA_0,
    }
}

fn needed_dynamic_state(
    rasterizer_discard_enable: bool,
    depth_bias_enable: bool,
    depth_bounds_test_enable: bool,
    stencil_test_enable: bool,
    has_discard_rectangles: bool,
) -> DirtyState {
    // Every dynamic state is a rasterization state.
    if rasterizer_discard_enable {
        return DirtyState::empty();
    }

    let mut states = DirtyState::DYNAMIC_ALL;

    if !depth_bias_enable {
        states -= DirtyState::DEPTH_BIAS;
    }

    if !depth_bounds_test_enable {
        states -= DirtyState::DEPTH_BOUNDS;
    }

    if !stencil_test_enable {
        states -= DirtyState::STENCIL_ALL;
    }

    if !has_discard_rectangles {
        states -= DirtyState::DISCARD_RECTANGLE;
    }

    states
}

fn compute_ia_multi_vgt_param(
    device: &Device,
    topology: PrimitiveTopology,
    primitive_restart_enable: bool,
    prim_id_used: bool,
    has_gs: bool,
    has_tess: bool,
    tess_patches_per_group: u32,
) -> IaMultiVgtParam {
    let properties = device.properties();
    let family = properties.family;
    let chip_class = properties.chip_class;

    let primgroup_size = if has_tess {
        tess_patches_per_group.max(1)
    } else if has_gs {
        64
    } else {
        128
    };

    let ia_switch_on_eoi = prim_id_used;
    let mut partial_vs_wave = false;
    let mut partial_es_wave = false;

    if has_tess {
        // Bug with tessellation and GS on Bonaire and older 2 SE chips.
        if has_gs
            && matches!(
                family,
                ChipFamily::Tahiti | ChipFamily::Pitcairn | ChipFamily::Bonaire
            )
        {
            partial_vs_wave = true;
        }

        // Distributed tessellation.
        if chip_class >= ChipClass::Vi && properties.max_se >= 2 {
            if has_gs {
                if chip_class <= ChipClass::Vi {
                    partial_es_wave = true;
                }
            } else {
                partial_vs_wave = true;
            }
        }
    }

    // These chips can hang with a GS if PARTIAL_VS_WAVE is not set.
    if has_gs
        && matches!(
            family,
            ChipFamily::Bonaire
                | ChipFamily::Hawaii
                | ChipFamily::Tonga
                | ChipFamily::Fiji
                | ChipFamily::Polaris10
                | ChipFamily::Polaris11
                | ChipFamily::Polaris12
                | ChipFamily::VegaM
        )
    {
        partial_vs_wave = true;
    }

    let prim = topology.hw_prim();
    let switch_required = properties.max_se < 4
        || prim == V_008958_DI_PT_TRIFAN
        || prim == V_008958_DI_PT_TRISTRIP_ADJ
        || (primitive_restart_enable
            && (family < ChipFamily::Polaris10
                || !matches!(
                    prim,
                    V_008958_DI_PT_POINTLIST | V_008958_DI_PT_LINESTRIP | V_008958_DI_PT_TRISTRIP
                )))
        || prim_id_used;

    // SI has no WD, and switches in the IA instead.
    let (wd_switch_on_eop, ia_switch_on_eop) = if chip_class >= ChipClass::Cik {
        (switch_required, false)
    } else {
        (false, switch_required && properties.max_se > 2)
    };

    let gfx9 = chip_class >= ChipClass::Gfx9;
    let mut base = s_028aa8_primgroup_size(primgroup_size - 1)
        | s_028aa8_max_primgrp_in_wave(if chip_class == ChipClass::Vi { 2 } else { 0 });

    if gfx9 {
        base |= S_030960_EN_INST_OPT_BASIC | S_030960_EN_INST_OPT_ADV;
    }

    IaMultiVgtParam {
        primgroup_size,
        partial_es_wave,
        partial_vs_wave,
        ia_switch_on_eoi,
        ia_switch_on_eop,
        wd_switch_on_eop,
        base,
    }
}

fn scratch_requirements(shaders: &[Option<Arc<ShaderVariant>>]) -> (u32, u32) {
    shaders
        .iter()
        .flatten()
        .fold((0, 0), |(bytes_per_wave, max_waves), shader| {
            (
                bytes_per_wave.max(shader.scratch_bytes_per_wave()),
                max_waves.max(shader.max_scratch_waves()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{graphics_pipeline, shader};

    #[test]
    fn prims_for_vertices() {
        let tris = PrimitiveTopology::TriangleList.vertex_count(0);
        assert_eq!(tris.prims_for_vertices(0), 0);
        assert_eq!(tris.prims_for_vertices(2), 0);
        assert_eq!(tris.prims_for_vertices(3), 1);
        assert_eq!(tris.prims_for_vertices(8), 2);

        let strip = PrimitiveTopology::TriangleStrip.vertex_count(0);
        assert_eq!(strip.prims_for_vertices(5), 3);

        let patches = PrimitiveTopology::PatchList.vertex_count(0);
        assert_eq!(patches.prims_for_vertices(16), 0);
    }

    #[test]
    fn user_data_registers() {
        use ShaderStage::*;

        assert_eq!(
            user_data_0_for_stage(Vertex, ChipClass::Vi, false, false),
            R_00B130_SPI_SHADER_USER_DATA_VS_0,
        );
        assert_eq!(
            user_data_0_for_stage(Vertex, ChipClass::Vi, true, false),
            R_00B330_SPI_SHADER_USER_DATA_ES_0,
        );
        assert_eq!(
            user_data_0_for_stage(Vertex, ChipClass::Vi, false, true),
            R_00B530_SPI_SHADER_USER_DATA_LS_0,
        );
        assert_eq!(
            user_data_0_for_stage(Geometry, ChipClass::Gfx9, true, false),
            R_00B330_SPI_SHADER_USER_DATA_ES_0,
        );
        assert_eq!(
            user_data_0_for_stage(Geometry, ChipClass::Si, true, false),
            R_00B230_SPI_SHADER_USER_DATA_GS_0,
        );
    }

    #[test]
    fn needed_states() {
        let (device, _) = gfx_device!();
        let pipeline = graphics_pipeline(&device, |_| ());
        assert_eq!(
            pipeline.needed_dynamic_state(),
            DirtyState::VIEWPORT
                | DirtyState::SCISSOR
                | DirtyState::LINE_WIDTH
                | DirtyState::BLEND_CONSTANTS,
        );

        let pipeline = graphics_pipeline(&device, |info| {
            info.stencil_test_enable = true;
            info.discard_rectangle_count = Some(2);
        });
        assert!(pipeline.needed_dynamic_state().contains(DirtyState::STENCIL_ALL));
        assert!(pipeline.needed_dynamic_state().contains(DirtyState::DISCARD_RECTANGLE));
        assert_eq!(pipeline.static_state().discard_rectangle_count, 2);

        let pipeline = graphics_pipeline(&device, |info| info.rasterizer_discard_enable = true);
        assert!(pipeline.needed_dynamic_state().is_empty());
    }

    #[test]
    fn invalid_stages() {
        let (device, _) = gfx_device!();
        let layout = crate::tests::empty_layout();
        let compute = shader(&device, ShaderStage::Compute, Default::default());

        assert!(GraphicsPipeline::new(
            &device,
            GraphicsPipelineCreateInfo::new(layout.clone(), vec![compute.clone()]),
        )
        .is_err());

        let fragment = shader(&device, ShaderStage::Fragment, Default::default());
        assert!(GraphicsPipeline::new(
            &device,
            GraphicsPipelineCreateInfo::new(layout.clone(), vec![fragment]),
        )
        .is_err());

        assert!(ComputePipeline::new(ComputePipelineCreateInfo {
            layout,
            shader: compute,
            sh_registers: Vec::new(),
        })
        .is_ok());
    }

    #[test]
    fn ia_multi_vgt_param_base() {
        let (device, _) = gfx_device!(Tonga);
        let pipeline = graphics_pipeline(&device, |_| ());
        let param = pipeline.ia_multi_vgt_param();
        assert_eq!(param.primgroup_size, 128);
        assert_eq!(param.base, 127 | (2 << 28));
        assert!(!param.wd_switch_on_eop);

        let (device, _) = gfx_device!(Bonaire);
        let pipeline = graphics_pipeline(&device, |_| ());
        // Two shader engines.
        assert!(pipeline.ia_multi_vgt_param().wd_switch_on_eop);
    }

    #[test]
    fn baked_registers() {
        let (device, _) = gfx_device!();
        let pipeline = graphics_pipeline(&device, |info| {
            info.context_registers.push((R_028A08_PA_SU_LINE_CNTL, 8));
        });
        let words = pipeline.registers();
        assert_eq!(crate::tests::count_reg_writes(words, R_028A08_PA_SU_LINE_CNTL), 1);
        assert_eq!(crate::tests::count_reg_writes(words, R_030908_VGT_PRIMITIVE_TYPE), 1);
    }
}
