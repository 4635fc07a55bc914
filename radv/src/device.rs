// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The physical GPU description and the logical device.
//!
//! A [`PhysicalDevice`] describes the hardware generation and its size (shader engines, render
//! backends, compute units). Everything that differs between generations in how registers are
//! laid out is resolved once, when the [`Device`] is created, into a [`RegisterLayout`]. The
//! emission code then consults the layout instead of branching on the chip class.

use crate::{
    macros::driver_bitflags,
    queue::Queue,
    registers::*,
    winsys::{Bo, BoId, Winsys},
    Validated, ValidationError, VulkanError,
};
use parking_lot::{Mutex, MutexGuard};
use std::{fmt, sync::Arc};

/// Hardware generation of the graphics core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChipClass {
    /// Southern Islands (GFX6).
    Si,
    /// Sea Islands (GFX7).
    Cik,
    /// Volcanic Islands (GFX8).
    Vi,
    /// Vega (GFX9).
    Gfx9,
}

/// A specific GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChipFamily {
    Tahiti,
    Pitcairn,
    Verde,
    Oland,
    Hainan,
    Bonaire,
    Kaveri,
    Kabini,
    Hawaii,
    Mullins,
    Tonga,
    Iceland,
    Carrizo,
    Fiji,
    Stoney,
    Polaris10,
    Polaris11,
    Polaris12,
    VegaM,
    Vega10,
    Vega12,
    Raven,
    Raven2,
}

impl ChipFamily {
    /// Returns the generation this chip belongs to.
    pub fn chip_class(self) -> ChipClass {
        match self {
            Self::Tahiti | Self::Pitcairn | Self::Verde | Self::Oland | Self::Hainan => {
                ChipClass::Si
            }
            Self::Bonaire | Self::Kaveri | Self::Kabini | Self::Hawaii | Self::Mullins => {
                ChipClass::Cik
            }
            Self::Tonga
            | Self::Iceland
            | Self::Carrizo
            | Self::Fiji
            | Self::Stoney
            | Self::Polaris10
            | Self::Polaris11
            | Self::Polaris12
            | Self::VegaM => ChipClass::Vi,
            Self::Vega10 | Self::Vega12 | Self::Raven | Self::Raven2 => ChipClass::Gfx9,
        }
    }

    /// Returns whether a context roll can leave a stale scissor active on this chip.
    #[inline]
    pub fn has_scissor_bug(self) -> bool {
        matches!(self, Self::Vega10 | Self::Raven)
    }
}

/// The queue families exposed by a device, in order of decreasing capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum QueueFamily {
    /// Graphics, compute and transfer.
    General = 0,
    /// Compute and transfer, executed by the MEC.
    Compute = 1,
    /// Transfer only.
    Transfer = 2,
}

impl QueueFamily {
    /// Number of queue families.
    pub const COUNT: u32 = 3;

    #[inline]
    pub fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::General),
            1 => Some(Self::Compute),
            2 => Some(Self::Transfer),
            _ => None,
        }
    }

    /// Returns the bit of this family in a queue family mask.
    #[inline]
    pub fn mask(self) -> u32 {
        1 << self.index()
    }

    /// Returns whether queues of this family are fed through the MEC.
    #[inline]
    pub fn uses_mec(self) -> bool {
        self == Self::Compute
    }
}

/// Hardware parameters of a GPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalDeviceProperties {
    pub family: ChipFamily,
    pub chip_class: ChipClass,
    /// Number of shader engines.
    pub max_se: u32,
    pub num_render_backends: u32,
    pub num_good_compute_units: u32,
    /// Upper 32 bits of the addresses in the 32-bit address window used for descriptor tables.
    pub address32_hi: u32,
    pub has_scissor_bug: bool,
    /// Size in dwords of one tessellation off-chip buffer.
    pub tess_offchip_block_dw_size: u32,
}

impl PhysicalDeviceProperties {
    /// Returns the properties of a typical board with the given chip.
    pub fn for_family(family: ChipFamily) -> Self {
        let chip_class = family.chip_class();
        let (max_se, num_render_backends, num_good_compute_units) = match family {
            ChipFamily::Tahiti | ChipFamily::Hawaii | ChipFamily::Fiji => (4, 16, 44),
            ChipFamily::Tonga | ChipFamily::Polaris10 | ChipFamily::VegaM => (4, 8, 36),
            ChipFamily::Vega10 => (4, 16, 64),
            ChipFamily::Vega12 => (4, 8, 20),
            ChipFamily::Pitcairn | ChipFamily::Bonaire | ChipFamily::Polaris11 => (2, 4, 16),
            ChipFamily::Raven | ChipFamily::Raven2 => (1, 2, 11),
            _ => (1, 2, 8),
        };

        PhysicalDeviceProperties {
            family,
            chip_class,
            max_se,
            num_render_backends,
            num_good_compute_units,
            address32_hi: 0,
            has_scissor_bug: family.has_scissor_bug(),
            tess_offchip_block_dw_size: if family == ChipFamily::Hawaii { 4096 } else { 8192 },
        }
    }
}

/// A GPU, together with the kernel interface used to drive it.
pub struct PhysicalDevice {
    properties: PhysicalDeviceProperties,
    winsys: Arc<dyn Winsys>,
}

impl PhysicalDevice {
    #[inline]
    pub fn new(winsys: Arc<dyn Winsys>, properties: PhysicalDeviceProperties) -> Arc<Self> {
        Arc::new(PhysicalDevice { properties, winsys })
    }

    #[inline]
    pub fn properties(&self) -> &PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn winsys(&self) -> &Arc<dyn Winsys> {
        &self.winsys
    }
}

impl fmt::Debug for PhysicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// How end-of-pipe events are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EopKind {
    /// A single `EVENT_WRITE_EOP`.
    Single,
    /// Two `EVENT_WRITE_EOP`, so that every engine is idle before the value lands.
    Double,
    /// `RELEASE_MEM`.
    ReleaseMem,
}

/// How VGT_INDEX_TYPE is programmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexTypeReg {
    /// With the `INDEX_TYPE` packet.
    Packet,
    /// As an indexed uconfig register.
    Uconfig { reg: u32, idx: u32 },
}

/// A register that lives in a different class depending on the generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegLocation {
    Config(u32),
    Context { reg: u32, idx: Option<u32> },
    Uconfig { reg: u32, idx: Option<u32> },
}

/// Generation-specific register placement and packet choices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterLayout {
    pub chip_class: ChipClass,
    /// Registers that receive the address of the global descriptor table, in the preamble.
    pub global_pointer_regs: &'static [u32],
    pub ia_multi_vgt_param: RegLocation,
    pub index_type: IndexTypeReg,
    pub vgt_primitive_type: RegLocation,
    pub multi_prim_ib_reset_en: RegLocation,
    pub esgs_ring_size: RegLocation,
    pub gsvs_ring_size: RegLocation,
    pub tf_ring_size: RegLocation,
    pub tf_memory_base: RegLocation,
    /// Only present on generations with more than 40 address bits for the factor ring.
    pub tf_memory_base_hi: Option<RegLocation>,
    pub hs_offchip_param: RegLocation,
    pub cp_strmout_cntl: RegLocation,
    pub eop: EopKind,
    /// `ACQUIRE_MEM` instead of `SURFACE_SYNC` on the graphics ring.
    pub acquire_mem_on_gfx: bool,
    /// CB and DB caches are flushed with an end-of-pipe event instead of `CP_COHER_CNTL`.
    pub cb_db_flush_by_event: bool,
    /// `DMA_DATA` is available for fills and prefetches.
    pub has_dma_data: bool,
    /// A non-indexed draw clobbers VGT_INDEX_TYPE.
    pub draw_clobbers_index_type: bool,
    pub dispatch_order_mode: bool,
}

static GFX9_GLOBAL_POINTER_REGS: [u32; 4] = [
    R_00B030_SPI_SHADER_USER_DATA_PS_0,
    R_00B130_SPI_SHADER_USER_DATA_VS_0,
    R_00B208_SPI_SHADER_USER_DATA_ADDR_LO_GS,
    R_00B408_SPI_SHADER_USER_DATA_ADDR_LO_HS,
];

static SI_GLOBAL_POINTER_REGS: [u32; 6] = [
    R_00B030_SPI_SHADER_USER_DATA_PS_0,
    R_00B130_SPI_SHADER_USER_DATA_VS_0,
    R_00B230_SPI_SHADER_USER_DATA_GS_0,
    R_00B330_SPI_SHADER_USER_DATA_ES_0,
    R_00B430_SPI_SHADER_USER_DATA_HS_0,
    R_00B530_SPI_SHADER_USER_DATA_LS_0,
];

impl RegisterLayout {
    /// Returns the layout of a generation.
    pub fn for_chip(chip_class: ChipClass) -> Self {
        let cik_plus = chip_class >= ChipClass::Cik;
        let gfx9 = chip_class >= ChipClass::Gfx9;

        let config_or_uconfig = |si: u32, cik: u32| {
            if cik_plus {
                RegLocation::Uconfig { reg: cik, idx: None }
            } else {
                RegLocation::Config(si)
            }
        };

        RegisterLayout {
            chip_class,
            global_pointer_regs: if gfx9 {
                &GFX9_GLOBAL_POINTER_REGS
            } else {
                &SI_GLOBAL_POINTER_REGS
            },
            ia_multi_vgt_param: match chip_class {
                ChipClass::Gfx9 => RegLocation::Uconfig {
                    reg: R_030960_IA_MULTI_VGT_PARAM,
                    idx: Some(4),
                },
                ChipClass::Cik | ChipClass::Vi => RegLocation::Context {
                    reg: R_028AA8_IA_MULTI_VGT_PARAM,
                    idx: Some(1),
                },
                ChipClass::Si => RegLocation::Context {
                    reg: R_028AA8_IA_MULTI_VGT_PARAM,
                    idx: None,
                },
            },
            index_type: if gfx9 {
                IndexTypeReg::Uconfig {
                    reg: R_03090C_VGT_INDEX_TYPE,
                    idx: 2,
                }
            } else {
                IndexTypeReg::Packet
            },
            vgt_primitive_type: if gfx9 {
                RegLocation::Uconfig {
                    reg: R_030908_VGT_PRIMITIVE_TYPE,
                    idx: Some(1),
                }
            } else {
                config_or_uconfig(R_008958_VGT_PRIMITIVE_TYPE, R_030908_VGT_PRIMITIVE_TYPE)
            },
            multi_prim_ib_reset_en: if gfx9 {
                RegLocation::Uconfig {
                    reg: R_03092C_VGT_MULTI_PRIM_IB_RESET_EN,
                    idx: None,
                }
            } else {
                RegLocation::Context {
                    reg: R_028A94_VGT_MULTI_PRIM_IB_RESET_EN,
                    idx: None,
                }
            },
            esgs_ring_size: config_or_uconfig(R_0088C8_VGT_ESGS_RING_SIZE, R_030900_VGT_ESGS_RING_SIZE),
            gsvs_ring_size: config_or_uconfig(R_0088CC_VGT_GSVS_RING_SIZE, R_030904_VGT_GSVS_RING_SIZE),
            tf_ring_size: config_or_uconfig(R_008988_VGT_TF_RING_SIZE, R_030938_VGT_TF_RING_SIZE),
            tf_memory_base: config_or_uconfig(R_0089B8_VGT_TF_MEMORY_BASE, R_030940_VGT_TF_MEMORY_BASE),
            tf_memory_base_hi: gfx9.then_some(RegLocation::Uconfig {
                reg: R_030944_VGT_TF_MEMORY_BASE_HI,
                idx: None,
            }),
            hs_offchip_param: config_or_uconfig(
                R_0089B0_VGT_HS_OFFCHIP_PARAM,
                R_03093C_VGT_HS_OFFCHIP_PARAM,
            ),
            cp_strmout_cntl: config_or_uconfig(R_0084FC_CP_STRMOUT_CNTL, R_0300FC_CP_STRMOUT_CNTL),
            eop: match chip_class {
                ChipClass::Si => EopKind::Single,
                ChipClass::Cik | ChipClass::Vi => EopKind::Double,
                ChipClass::Gfx9 => EopKind::ReleaseMem,
            },
            acquire_mem_on_gfx: gfx9,
            cb_db_flush_by_event: gfx9,
            has_dma_data: cik_plus,
            draw_clobbers_index_type: cik_plus,
            dispatch_order_mode: cik_plus,
        }
    }
}

impl RegLocation {
    /// Returns the register offset.
    #[inline]
    pub fn reg(self) -> u32 {
        match self {
            RegLocation::Config(reg)
            | RegLocation::Context { reg, .. }
            | RegLocation::Uconfig { reg, .. } => reg,
        }
    }

    /// Writes `value` to the register.
    pub fn emit(self, cs: &mut crate::cs::CommandStream, value: u32) {
        match self {
            RegLocation::Config(reg) => cs.set_config_reg(reg, value),
            RegLocation::Context { reg, idx: None } => cs.set_context_reg(reg, value),
            RegLocation::Context { reg, idx: Some(idx) } => cs.set_context_reg_idx(reg, idx, value),
            RegLocation::Uconfig { reg, idx: None } => cs.set_uconfig_reg(reg, value),
            RegLocation::Uconfig { reg, idx: Some(idx) } => cs.set_uconfig_reg_idx(reg, idx, value),
        }
    }
}

driver_bitflags! {
    /// Debug options, usually read from the `RADV_DEBUG` environment variable by the embedder.
    DebugFlags = u32;

    /// Disable the dynamic-offset bounds in buffer descriptors.
    NO_DYNAMIC_BOUNDS = 1 << 0,
    /// Wait for idle after every draw and dispatch.
    SYNC_SHADERS = 1 << 1,
    /// Do not use HTILE.
    NO_HIZ = 1 << 2,
    /// Do not use DCC.
    NO_DCC = 1 << 3,
    /// Do not use fast clears.
    NO_FAST_CLEARS = 1 << 4,
    /// Keep every buffer object of the device resident in every submission.
    ALL_BOS = 1 << 5,
    /// Do not chain command streams.
    NO_IBS = 1 << 6,
}

impl DebugFlags {
    const NAMES: [(&'static str, DebugFlags); 7] = [
        ("nodynamicbounds", DebugFlags::NO_DYNAMIC_BOUNDS),
        ("syncshaders", DebugFlags::SYNC_SHADERS),
        ("nohiz", DebugFlags::NO_HIZ),
        ("nodcc", DebugFlags::NO_DCC),
        ("nofastclears", DebugFlags::NO_FAST_CLEARS),
        ("allbos", DebugFlags::ALL_BOS),
        ("noibs", DebugFlags::NO_IBS),
    ];

    /// Parses a comma-separated list of option names. Unknown names are ignored.
    pub fn from_env_str(value: &str) -> Self {
        parse_option_list(value, &Self::NAMES, "RADV_DEBUG")
    }
}

driver_bitflags! {
    /// Performance experiments, usually read from the `RADV_PERFTEST` environment variable.
    PerftestFlags = u32;

    /// Use the device-wide residency list even without descriptor indexing.
    BO_LIST = 1 << 0,
    /// Allow DCC on multisampled images.
    DCC_MSAA = 1 << 1,
    /// Allocate memory without interprocess sharing where possible.
    LOCAL_BOS = 1 << 2,
}

impl PerftestFlags {
    const NAMES: [(&'static str, PerftestFlags); 3] = [
        ("bolist", PerftestFlags::BO_LIST),
        ("dccmsaa", PerftestFlags::DCC_MSAA),
        ("localbos", PerftestFlags::LOCAL_BOS),
    ];

    /// Parses a comma-separated list of option names. Unknown names are ignored.
    pub fn from_env_str(value: &str) -> Self {
        parse_option_list(value, &Self::NAMES, "RADV_PERFTEST")
    }
}

fn parse_option_list<T>(value: &str, names: &[(&'static str, T)], var: &str) -> T
where
    T: Copy + Default + std::ops::BitOrAssign,
{
    let mut flags = T::default();

    for option in value.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        match names
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(option))
        {
            Some(&(_, flag)) => flags |= flag,
            None => log::warn!("ignoring unknown {} option `{}`", var, option),
        }
    }

    flags
}

/// Parameters to create a queue.
#[derive(Clone, Debug)]
pub struct QueueCreateInfo {
    pub queue_family: QueueFamily,
    pub queue_count: u32,
}

impl Default for QueueCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            queue_family: QueueFamily::General,
            queue_count: 1,
        }
    }
}

/// Parameters to create a new `Device`.
#[derive(Clone, Debug)]
pub struct DeviceCreateInfo {
    pub queue_create_infos: Vec<QueueCreateInfo>,
    pub debug_flags: DebugFlags,
    pub perftest_flags: PerftestFlags,
    /// Descriptor indexing makes per-set residency tracking unreliable, so enabling it switches
    /// the device to a single residency list shared by all submissions.
    pub descriptor_indexing: bool,
    /// Abort the process when the kernel rejects a submission, instead of returning
    /// [`VulkanError::DeviceLost`].
    pub abort_on_submit_failure: bool,
}

impl Default for DeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            queue_create_infos: vec![QueueCreateInfo::default()],
            debug_flags: DebugFlags::empty(),
            perftest_flags: PerftestFlags::empty(),
            descriptor_indexing: false,
            abort_on_submit_failure: false,
        }
    }
}

/// A logical device.
pub struct Device {
    physical_device: Arc<PhysicalDevice>,
    layout: RegisterLayout,
    debug_flags: DebugFlags,
    perftest_flags: PerftestFlags,
    use_global_bo_list: bool,
    abort_on_submit_failure: bool,
    global_bo_list: Mutex<Vec<Arc<Bo>>>,
}

impl Device {
    /// Creates a device and its queues.
    pub fn new(
        physical_device: Arc<PhysicalDevice>,
        create_info: DeviceCreateInfo,
    ) -> Result<(Arc<Device>, impl ExactSizeIterator<Item = Arc<Queue>>), Validated<VulkanError>>
    {
        Self::validate_new(&create_info)?;

        let DeviceCreateInfo {
            queue_create_infos,
            debug_flags,
            perftest_flags,
            descriptor_indexing,
            abort_on_submit_failure,
        } = create_info;

        let chip_class = physical_device.properties().chip_class;
        let use_global_bo_list = descriptor_indexing
            || perftest_flags.intersects(PerftestFlags::BO_LIST)
            || debug_flags.intersects(DebugFlags::ALL_BOS);

        log::debug!(
            "creating device for {:?} ({:?}), global BO list: {}",
            physical_device.properties().family,
            chip_class,
            use_global_bo_list,
        );

        let device = Arc::new(Device {
            layout: RegisterLayout::for_chip(chip_class),
            physical_device,
            debug_flags,
            perftest_flags,
            use_global_bo_list,
            abort_on_submit_failure,
            global_bo_list: Mutex::new(Vec::new()),
        });

        let queues: Vec<_> = queue_create_infos
            .iter()
            .flat_map(|info| (0..info.queue_count).map(move |index| (info.queue_family, index)))
            .map(|(family, index)| Queue::new(device.clone(), family, index))
            .collect();

        Ok((device, queues.into_iter()))
    }

    fn validate_new(create_info: &DeviceCreateInfo) -> Result<(), Box<ValidationError>> {
        if create_info.queue_create_infos.is_empty() {
            return Err(ValidationError::new(
                "create_info.queue_create_infos",
                "is empty",
            ));
        }

        for (index, info) in create_info.queue_create_infos.iter().enumerate() {
            if info.queue_count == 0 {
                return Err(ValidationError::new(
                    format!("create_info.queue_create_infos[{}].queue_count", index),
                    "is zero",
                ));
            }

            if create_info.queue_create_infos[..index]
                .iter()
                .any(|other| other.queue_family == info.queue_family)
            {
                return Err(ValidationError::new(
                    format!("create_info.queue_create_infos[{}].queue_family", index),
                    "is used by more than one element",
                ));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn physical_device(&self) -> &Arc<PhysicalDevice> {
        &self.physical_device
    }

    #[inline]
    pub fn properties(&self) -> &PhysicalDeviceProperties {
        self.physical_device.properties()
    }

    #[inline]
    pub fn chip_class(&self) -> ChipClass {
        self.layout.chip_class
    }

    #[inline]
    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    #[inline]
    pub fn winsys(&self) -> &Arc<dyn Winsys> {
        self.physical_device.winsys()
    }

    #[inline]
    pub fn debug_flags(&self) -> DebugFlags {
        self.debug_flags
    }

    #[inline]
    pub fn perftest_flags(&self) -> PerftestFlags {
        self.perftest_flags
    }

    /// Returns whether submissions use the device-wide residency list.
    #[inline]
    pub fn use_global_bo_list(&self) -> bool {
        self.use_global_bo_list
    }

    #[inline]
    pub fn abort_on_submit_failure(&self) -> bool {
        self.abort_on_submit_failure
    }

    /// Adds a buffer object to the device-wide residency list.
    pub fn add_global_bo(&self, bo: &Arc<Bo>) {
        let mut list = self.global_bo_list.lock();

        if !list.iter().any(|other| other.id() == bo.id()) {
            list.push(bo.clone());
        }
    }

    /// Removes a buffer object from the device-wide residency list.
    pub fn remove_global_bo(&self, id: BoId) {
        self.global_bo_list.lock().retain(|bo| bo.id() != id);
    }

    /// Locks the device-wide residency list.
    #[inline]
    pub fn global_bo_list(&self) -> MutexGuard<'_, Vec<Arc<Bo>>> {
        self.global_bo_list.lock()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("physical_device", &self.physical_device)
            .field("debug_flags", &self.debug_flags)
            .field("use_global_bo_list", &self.use_global_bo_list)
            .finish_non_exhaustive()
    }
}
