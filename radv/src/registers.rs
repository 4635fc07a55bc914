// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Packet opcodes, register offsets and field encoders of the SI/CIK/VI/GFX9 command processor.
//!
//! Only the registers the command buffer engine writes are listed. Register names follow the
//! public register reference: `R_<offset>_<NAME>` is a register byte offset, and
//! `s_<offset>_<field>(value)` packs a field value into its bit position.

#![allow(non_upper_case_globals)]

// Packet headers

pub const PKT_TYPE_3: u32 = 3;

/// Builds a type 3 packet header. `count` is the number of payload dwords minus one.
#[inline]
pub const fn pkt3(opcode: u32, count: u32, predicate: bool) -> u32 {
    (PKT_TYPE_3 << 30) | ((count & 0x3fff) << 16) | ((opcode & 0xff) << 8) | (predicate as u32)
}

/// Marks a packet as targeting the compute pipe.
#[inline]
pub const fn pkt3_shader_type_s(compute: bool) -> u32 {
    (compute as u32) << 1
}

/// Extracts the opcode from a type 3 packet header.
#[inline]
pub const fn pkt3_opcode(header: u32) -> u32 {
    (header >> 8) & 0xff
}

/// Extracts the payload length (in dwords) from a type 3 packet header.
#[inline]
pub const fn pkt3_payload_len(header: u32) -> u32 {
    ((header >> 16) & 0x3fff) + 1
}

pub const PKT3_NOP: u32 = 0x10;
pub const PKT3_SET_BASE: u32 = 0x11;
pub const PKT3_CLEAR_STATE: u32 = 0x12;
pub const PKT3_INDEX_BUFFER_SIZE: u32 = 0x13;
pub const PKT3_DISPATCH_DIRECT: u32 = 0x15;
pub const PKT3_DISPATCH_INDIRECT: u32 = 0x16;
pub const PKT3_DRAW_INDIRECT: u32 = 0x24;
pub const PKT3_DRAW_INDEX_INDIRECT: u32 = 0x25;
pub const PKT3_INDEX_BASE: u32 = 0x26;
pub const PKT3_DRAW_INDEX_2: u32 = 0x27;
pub const PKT3_CONTEXT_CONTROL: u32 = 0x28;
pub const PKT3_INDEX_TYPE: u32 = 0x2A;
pub const PKT3_DRAW_INDIRECT_MULTI: u32 = 0x2C;
pub const PKT3_DRAW_INDEX_AUTO: u32 = 0x2D;
pub const PKT3_NUM_INSTANCES: u32 = 0x2F;
pub const PKT3_INDIRECT_BUFFER_SI: u32 = 0x32;
pub const PKT3_STRMOUT_BUFFER_UPDATE: u32 = 0x34;
pub const PKT3_WRITE_DATA: u32 = 0x37;
pub const PKT3_DRAW_INDEX_INDIRECT_MULTI: u32 = 0x38;
pub const PKT3_WAIT_REG_MEM: u32 = 0x3C;
pub const PKT3_INDIRECT_BUFFER_CIK: u32 = 0x3F;
pub const PKT3_COPY_DATA: u32 = 0x40;
pub const PKT3_CP_DMA: u32 = 0x41;
pub const PKT3_PFP_SYNC_ME: u32 = 0x42;
pub const PKT3_SURFACE_SYNC: u32 = 0x43;
pub const PKT3_EVENT_WRITE: u32 = 0x46;
pub const PKT3_EVENT_WRITE_EOP: u32 = 0x47;
pub const PKT3_RELEASE_MEM: u32 = 0x49;
pub const PKT3_DMA_DATA: u32 = 0x50;
pub const PKT3_ACQUIRE_MEM: u32 = 0x58;
pub const PKT3_SET_CONFIG_REG: u32 = 0x68;
pub const PKT3_SET_CONTEXT_REG: u32 = 0x69;
pub const PKT3_SET_SH_REG: u32 = 0x76;
pub const PKT3_SET_UCONFIG_REG: u32 = 0x79;

// Register ranges

pub const SI_CONFIG_REG_OFFSET: u32 = 0x0000_8000;
pub const SI_CONFIG_REG_END: u32 = 0x0000_B000;
pub const SI_SH_REG_OFFSET: u32 = 0x0000_B000;
pub const SI_SH_REG_END: u32 = 0x0000_C000;
pub const SI_CONTEXT_REG_OFFSET: u32 = 0x0002_8000;
pub const SI_CONTEXT_REG_END: u32 = 0x0002_9000;
pub const CIK_UCONFIG_REG_OFFSET: u32 = 0x0003_0000;
pub const CIK_UCONFIG_REG_END: u32 = 0x0003_1000;

// Events

#[inline]
pub const fn event_type(x: u32) -> u32 {
    x & 0x3f
}

#[inline]
pub const fn event_index(x: u32) -> u32 {
    (x & 0xf) << 8
}

pub const V_028A90_CACHE_FLUSH_TS: u32 = 0x04;
pub const V_028A90_CS_PARTIAL_FLUSH: u32 = 0x07;
pub const V_028A90_VGT_STREAMOUT_SYNC: u32 = 0x08;
pub const V_028A90_VS_PARTIAL_FLUSH: u32 = 0x0F;
pub const V_028A90_PS_PARTIAL_FLUSH: u32 = 0x10;
pub const V_028A90_CACHE_FLUSH_AND_INV_TS_EVENT: u32 = 0x14;
pub const V_028A90_ZPASS_DONE: u32 = 0x15;
pub const V_028A90_PIPELINESTAT_START: u32 = 0x19;
pub const V_028A90_PIPELINESTAT_STOP: u32 = 0x1A;
pub const V_028A90_SO_VGTSTREAMOUT_FLUSH: u32 = 0x1F;
pub const V_028A90_VGT_FLUSH: u32 = 0x24;
pub const V_028A90_BOTTOM_OF_PIPE_TS: u32 = 0x28;
pub const V_028A90_FLUSH_AND_INV_DB_DATA_TS: u32 = 0x2B;
pub const V_028A90_FLUSH_AND_INV_DB_META: u32 = 0x2C;
pub const V_028A90_FLUSH_AND_INV_CB_DATA_TS: u32 = 0x2D;
pub const V_028A90_FLUSH_AND_INV_CB_META: u32 = 0x2E;

pub const EVENT_TCL1_VOL_ACTION_ENA: u32 = 1 << 15;
pub const EVENT_TC_VOL_ACTION_ENA: u32 = 1 << 16;
pub const EVENT_TC_WB_ACTION_ENA: u32 = 1 << 18;
pub const EVENT_TC_NC_ACTION_ENA: u32 = 1 << 19;
pub const EVENT_TC_MD_ACTION_ENA: u32 = 1 << 21;
pub const EVENT_TCL1_ACTION_ENA: u32 = 1 << 22;
pub const EVENT_TC_ACTION_ENA: u32 = 1 << 23;

#[inline]
pub const fn eop_int_sel(x: u32) -> u32 {
    x << 24
}

#[inline]
pub const fn eop_data_sel(x: u32) -> u32 {
    x << 29
}

pub const EOP_INT_SEL_SEND_DATA_AFTER_WR_CONFIRM: u32 = 3;
pub const EOP_DATA_SEL_DISCARD: u32 = 0;
pub const EOP_DATA_SEL_VALUE_32BIT: u32 = 1;

// WAIT_REG_MEM

pub const WAIT_REG_MEM_EQUAL: u32 = 3;

#[inline]
pub const fn wait_reg_mem_mem_space(x: u32) -> u32 {
    x << 4
}

// WRITE_DATA / COPY_DATA

pub const V_370_MEM: u32 = 5;
pub const V_370_ME: u32 = 0;
pub const V_370_PFP: u32 = 1;

#[inline]
pub const fn s_370_dst_sel(x: u32) -> u32 {
    (x & 0xf) << 8
}

#[inline]
pub const fn s_370_wr_confirm(x: bool) -> u32 {
    (x as u32) << 20
}

#[inline]
pub const fn s_370_engine_sel(x: u32) -> u32 {
    (x & 0x3) << 30
}

pub const COPY_DATA_SRC_REG: u32 = 0;
pub const COPY_DATA_SRC_MEM: u32 = 1;
pub const COPY_DATA_DST_REG: u32 = 0;
pub const COPY_DATA_WR_CONFIRM: u32 = 1 << 20;

#[inline]
pub const fn copy_data_src_sel(x: u32) -> u32 {
    x & 0xf
}

#[inline]
pub const fn copy_data_dst_sel(x: u32) -> u32 {
    (x & 0xf) << 8
}

// CP_COHER_CNTL

#[inline]
pub const fn s_0085f0_cb_dest_base_ena(cb: u32) -> u32 {
    1 << (6 + cb)
}

pub const S_0085F0_DB_DEST_BASE_ENA: u32 = 1 << 14;
pub const S_0085F0_TCL1_ACTION_ENA: u32 = 1 << 22;
pub const S_0085F0_TC_ACTION_ENA: u32 = 1 << 23;
pub const S_0085F0_CB_ACTION_ENA: u32 = 1 << 25;
pub const S_0085F0_DB_ACTION_ENA: u32 = 1 << 26;
pub const S_0085F0_SH_KCACHE_ACTION_ENA: u32 = 1 << 27;
pub const S_0085F0_SH_ICACHE_ACTION_ENA: u32 = 1 << 29;
pub const S_0301F0_TC_WB_ACTION_ENA: u32 = 1 << 18;
pub const S_0301F0_TC_NC_ACTION_ENA: u32 = 1 << 19;

// CONTEXT_CONTROL

#[inline]
pub const fn context_control_load_enable(x: bool) -> u32 {
    (x as u32) << 31
}

#[inline]
pub const fn context_control_shadow_enable(x: bool) -> u32 {
    (x as u32) << 31
}

// DMA_DATA / CP_DMA

pub const V_411_SRC_ADDR: u32 = 0;
pub const V_411_DATA: u32 = 2;
pub const V_411_SRC_ADDR_TC_L2: u32 = 3;
pub const V_411_DST_ADDR: u32 = 0;
pub const V_411_DST_ADDR_TC_L2: u32 = 3;
pub const V_411_NOWHERE: u32 = 2;

#[inline]
pub const fn s_411_cp_sync(x: bool) -> u32 {
    (x as u32) << 31
}

#[inline]
pub const fn s_411_src_sel(x: u32) -> u32 {
    (x & 0x3) << 29
}

#[inline]
pub const fn s_411_src_addr_hi(x: u32) -> u32 {
    x & 0xffff
}

#[inline]
pub const fn s_411_dst_sel(x: u32) -> u32 {
    (x & 0x3) << 20
}

#[inline]
pub const fn s_414_byte_count_gfx6(x: u32) -> u32 {
    x & 0x1f_ffff
}

#[inline]
pub const fn s_414_byte_count_gfx9(x: u32) -> u32 {
    x & 0x3ff_ffff
}

pub const S_414_DISABLE_WR_CONFIRM_GFX6: u32 = 1 << 21;
pub const S_414_DISABLE_WR_CONFIRM_GFX9: u32 = 1 << 31;
pub const S_414_RAW_WAIT: u32 = 1 << 30;
pub const CP_DMA_MAX_BYTE_COUNT: u32 = (1 << 21) - 8;
pub const CP_DMA_ALIGNMENT: u64 = 32;

// STRMOUT_BUFFER_UPDATE

pub const STRMOUT_OFFSET_FROM_PACKET: u32 = 0;
pub const STRMOUT_OFFSET_FROM_MEM: u32 = 2;
pub const STRMOUT_OFFSET_NONE: u32 = 3;

#[inline]
pub const fn strmout_store_buffer_filled_size(x: bool) -> u32 {
    x as u32
}

#[inline]
pub const fn strmout_offset_source(x: u32) -> u32 {
    (x & 0x3) << 1
}

#[inline]
pub const fn strmout_data_type(x: u32) -> u32 {
    (x & 0x1) << 7
}

#[inline]
pub const fn strmout_select_buffer(x: u32) -> u32 {
    (x & 0x3) << 8
}

// Draw initiator

pub const V_0287F0_DI_SRC_SEL_DMA: u32 = 0;
pub const V_0287F0_DI_SRC_SEL_AUTO_INDEX: u32 = 2;

#[inline]
pub const fn s_0287f0_use_opaque(x: bool) -> u32 {
    (x as u32) << 6
}

pub const S_2C3_COUNT_INDIRECT_ENABLE: u32 = 1 << 30;
pub const S_2C3_DRAW_INDEX_ENABLE: u32 = 1 << 31;

// Index types

pub const V_028A7C_VGT_INDEX_16: u32 = 0;
pub const V_028A7C_VGT_INDEX_32: u32 = 1;

// Config registers (SI)

pub const R_0084FC_CP_STRMOUT_CNTL: u32 = 0x0084FC;
pub const R_008958_VGT_PRIMITIVE_TYPE: u32 = 0x008958;
pub const R_008988_VGT_TF_RING_SIZE: u32 = 0x008988;
pub const R_0089B0_VGT_HS_OFFCHIP_PARAM: u32 = 0x0089B0;
pub const R_0089B8_VGT_TF_MEMORY_BASE: u32 = 0x0089B8;
pub const R_0088C8_VGT_ESGS_RING_SIZE: u32 = 0x0088C8;
pub const R_0088CC_VGT_GSVS_RING_SIZE: u32 = 0x0088CC;

pub const S_008490_OFFSET_UPDATE_DONE: u32 = 1;

// Uconfig registers (CIK+)

pub const R_0300FC_CP_STRMOUT_CNTL: u32 = 0x0300FC;
pub const R_030900_VGT_ESGS_RING_SIZE: u32 = 0x030900;
pub const R_030904_VGT_GSVS_RING_SIZE: u32 = 0x030904;
pub const R_030908_VGT_PRIMITIVE_TYPE: u32 = 0x030908;
pub const R_03090C_VGT_INDEX_TYPE: u32 = 0x03090C;
pub const R_030938_VGT_TF_RING_SIZE: u32 = 0x030938;
pub const R_03093C_VGT_HS_OFFCHIP_PARAM: u32 = 0x03093C;
pub const R_030940_VGT_TF_MEMORY_BASE: u32 = 0x030940;
pub const R_030944_VGT_TF_MEMORY_BASE_HI: u32 = 0x030944;
pub const R_030960_IA_MULTI_VGT_PARAM: u32 = 0x030960;

#[inline]
pub const fn s_030938_size(x: u32) -> u32 {
    x & 0xffff
}

// SH registers

pub const R_00B030_SPI_SHADER_USER_DATA_PS_0: u32 = 0x00B030;
pub const R_00B130_SPI_SHADER_USER_DATA_VS_0: u32 = 0x00B130;
pub const R_00B208_SPI_SHADER_USER_DATA_ADDR_LO_GS: u32 = 0x00B208;
pub const R_00B230_SPI_SHADER_USER_DATA_GS_0: u32 = 0x00B230;
pub const R_00B330_SPI_SHADER_USER_DATA_ES_0: u32 = 0x00B330;
pub const R_00B408_SPI_SHADER_USER_DATA_ADDR_LO_HS: u32 = 0x00B408;
pub const R_00B430_SPI_SHADER_USER_DATA_HS_0: u32 = 0x00B430;
pub const R_00B430_SPI_SHADER_USER_DATA_LS_0_GFX9: u32 = 0x00B430;
pub const R_00B530_SPI_SHADER_USER_DATA_LS_0: u32 = 0x00B530;

pub const R_00B800_COMPUTE_DISPATCH_INITIATOR: u32 = 0x00B800;
pub const R_00B810_COMPUTE_START_X: u32 = 0x00B810;
pub const R_00B858_COMPUTE_STATIC_THREAD_MGMT_SE0: u32 = 0x00B858;
pub const R_00B860_COMPUTE_TMPRING_SIZE: u32 = 0x00B860;
pub const R_00B864_COMPUTE_STATIC_THREAD_MGMT_SE2: u32 = 0x00B864;
pub const R_00B900_COMPUTE_USER_DATA_0: u32 = 0x00B900;

pub const S_00B800_COMPUTE_SHADER_EN: u32 = 1 << 0;
pub const S_00B800_FORCE_START_AT_000: u32 = 1 << 2;
pub const S_00B800_ORDER_MODE: u32 = 1 << 6;

#[inline]
pub const fn s_00b860_waves(x: u32) -> u32 {
    x & 0xfff
}

#[inline]
pub const fn s_00b860_wavesize(x: u32) -> u32 {
    (x & 0x1fff) << 12
}

// Context registers

pub const R_028020_DB_DEPTH_BOUNDS_MIN: u32 = 0x028020;
pub const R_028024_DB_DEPTH_BOUNDS_MAX: u32 = 0x028024;
pub const R_028040_DB_Z_INFO: u32 = 0x028040;
pub const R_028044_DB_STENCIL_INFO: u32 = 0x028044;
pub const R_028048_DB_Z_READ_BASE: u32 = 0x028048;
pub const R_028014_DB_HTILE_DATA_BASE: u32 = 0x028014;
pub const R_028208_PA_SC_WINDOW_SCISSOR_BR: u32 = 0x028208;
pub const R_028210_PA_SC_CLIPRECT_0_TL: u32 = 0x028210;
pub const R_028250_PA_SC_VPORT_SCISSOR_0_TL: u32 = 0x028250;
pub const R_0282D0_PA_SC_VPORT_ZMIN_0: u32 = 0x0282D0;
pub const R_02840C_VGT_MULTI_PRIM_IB_RESET_INDX: u32 = 0x02840C;
pub const R_028A94_VGT_MULTI_PRIM_IB_RESET_EN: u32 = 0x028A94;
pub const R_028B2C_VGT_STRMOUT_DRAW_OPAQUE_BUFFER_FILLED_SIZE: u32 = 0x028B2C;
pub const R_028B30_VGT_STRMOUT_DRAW_OPAQUE_VERTEX_STRIDE: u32 = 0x028B30;
pub const R_03092C_VGT_MULTI_PRIM_IB_RESET_EN: u32 = 0x03092C;
pub const R_028414_CB_BLEND_RED: u32 = 0x028414;
pub const R_028430_DB_STENCILREFMASK: u32 = 0x028430;
pub const R_028434_DB_STENCILREFMASK_BF: u32 = 0x028434;
pub const R_02843C_PA_CL_VPORT_XSCALE: u32 = 0x02843C;
pub const R_0286E8_SPI_TMPRING_SIZE: u32 = 0x0286E8;
pub const R_028A08_PA_SU_LINE_CNTL: u32 = 0x028A08;
pub const R_028AA8_IA_MULTI_VGT_PARAM: u32 = 0x028AA8;
pub const R_028AD0_VGT_STRMOUT_BUFFER_SIZE_0: u32 = 0x028AD0;
pub const R_028B7C_PA_SU_POLY_OFFSET_CLAMP: u32 = 0x028B7C;
pub const R_028B94_VGT_STRMOUT_CONFIG: u32 = 0x028B94;
pub const R_028BE8_PA_CL_GB_VERT_CLIP_ADJ: u32 = 0x028BE8;
pub const R_028C60_CB_COLOR0_BASE: u32 = 0x028C60;
pub const R_028C70_CB_COLOR0_INFO: u32 = 0x028C70;

/// Distance in bytes between the register blocks of two consecutive color buffers.
pub const CB_COLOR_REG_STRIDE: u32 = 0x3C;

#[inline]
pub const fn s_028c70_format(x: u32) -> u32 {
    (x & 0x1f) << 2
}

pub const V_028C70_COLOR_INVALID: u32 = 0x00;
pub const V_028C70_COLOR_32: u32 = 0x04;
pub const V_028C70_COLOR_8_8_8_8: u32 = 0x0A;
pub const V_028C70_COLOR_16_16_16_16: u32 = 0x0C;
pub const V_028C70_COLOR_32_32_32_32: u32 = 0x0E;
pub const S_028C70_COMPRESSION: u32 = 1 << 14;
pub const S_028C70_DCC_ENABLE: u32 = 1 << 28;

#[inline]
pub const fn s_028040_format(x: u32) -> u32 {
    x & 0x3
}

pub const V_028040_Z_INVALID: u32 = 0;
pub const V_028040_Z_16: u32 = 1;
pub const V_028040_Z_24: u32 = 2;
pub const V_028040_Z_32_FLOAT: u32 = 3;
pub const S_028040_TILE_SURFACE_ENABLE: u32 = 1 << 29;

#[inline]
pub const fn s_028044_format(x: u32) -> u32 {
    x & 0x1
}

pub const V_028044_STENCIL_INVALID: u32 = 0;
pub const V_028044_STENCIL_8: u32 = 1;
pub const S_028044_TILE_STENCIL_DISABLE: u32 = 1 << 29;

#[inline]
pub const fn s_028208_br_x(x: u32) -> u32 {
    x & 0x7fff
}

#[inline]
pub const fn s_028208_br_y(x: u32) -> u32 {
    (x & 0x7fff) << 16
}

#[inline]
pub const fn s_028210_tl_x(x: u32) -> u32 {
    x & 0x7fff
}

#[inline]
pub const fn s_028210_tl_y(x: u32) -> u32 {
    (x & 0x7fff) << 16
}

#[inline]
pub const fn s_028250_tl_x(x: u32) -> u32 {
    x & 0x7fff
}

#[inline]
pub const fn s_028250_tl_y(x: u32) -> u32 {
    (x & 0x7fff) << 16
}

pub const S_028250_WINDOW_OFFSET_DISABLE: u32 = 1 << 31;

#[inline]
pub const fn s_028254_br_x(x: u32) -> u32 {
    x & 0x7fff
}

#[inline]
pub const fn s_028254_br_y(x: u32) -> u32 {
    (x & 0x7fff) << 16
}

#[inline]
pub const fn s_028430_stenciltestval(x: u32) -> u32 {
    x & 0xff
}

#[inline]
pub const fn s_028430_stencilmask(x: u32) -> u32 {
    (x & 0xff) << 8
}

#[inline]
pub const fn s_028430_stencilwritemask(x: u32) -> u32 {
    (x & 0xff) << 16
}

#[inline]
pub const fn s_028430_stencilopval(x: u32) -> u32 {
    (x & 0xff) << 24
}

#[inline]
pub const fn s_028a08_width(x: u32) -> u32 {
    x & 0xffff
}

#[inline]
pub const fn s_0286e8_waves(x: u32) -> u32 {
    x & 0x3ff
}

#[inline]
pub const fn s_0286e8_wavesize(x: u32) -> u32 {
    (x & 0x1fff) << 12
}

#[inline]
pub const fn s_028b94_streamout_en(stream: u32, x: bool) -> u32 {
    (x as u32) << stream
}

// Buffer resource descriptor words

#[inline]
pub const fn s_008f04_base_address_hi(x: u32) -> u32 {
    x & 0xffff
}

#[inline]
pub const fn s_008f04_stride(x: u32) -> u32 {
    (x & 0x3fff) << 16
}

pub const S_008F04_SWIZZLE_ENABLE: u32 = 1 << 31;

pub const V_008F0C_SQ_SEL_X: u32 = 4;
pub const V_008F0C_SQ_SEL_Y: u32 = 5;
pub const V_008F0C_SQ_SEL_Z: u32 = 6;
pub const V_008F0C_SQ_SEL_W: u32 = 7;
pub const V_008F0C_BUF_NUM_FORMAT_UINT: u32 = 4;
pub const V_008F0C_BUF_NUM_FORMAT_FLOAT: u32 = 7;
pub const V_008F0C_BUF_DATA_FORMAT_32: u32 = 4;

#[inline]
pub const fn s_008f0c_dst_sel_x(x: u32) -> u32 {
    x & 0x7
}

#[inline]
pub const fn s_008f0c_dst_sel_y(x: u32) -> u32 {
    (x & 0x7) << 3
}

#[inline]
pub const fn s_008f0c_dst_sel_z(x: u32) -> u32 {
    (x & 0x7) << 6
}

#[inline]
pub const fn s_008f0c_dst_sel_w(x: u32) -> u32 {
    (x & 0x7) << 9
}

#[inline]
pub const fn s_008f0c_num_format(x: u32) -> u32 {
    (x & 0x7) << 12
}

#[inline]
pub const fn s_008f0c_data_format(x: u32) -> u32 {
    (x & 0xf) << 15
}

/// Last dword of a raw 32-bit XYZW buffer descriptor.
pub const BUFFER_DESCRIPTOR_WORD3: u32 = s_008f0c_dst_sel_x(V_008F0C_SQ_SEL_X)
    | s_008f0c_dst_sel_y(V_008F0C_SQ_SEL_Y)
    | s_008f0c_dst_sel_z(V_008F0C_SQ_SEL_Z)
    | s_008f0c_dst_sel_w(V_008F0C_SQ_SEL_W)
    | s_008f0c_num_format(V_008F0C_BUF_NUM_FORMAT_FLOAT)
    | s_008f0c_data_format(V_008F0C_BUF_DATA_FORMAT_32);

// IA_MULTI_VGT_PARAM

#[inline]
pub const fn s_028aa8_primgroup_size(x: u32) -> u32 {
    x & 0xffff
}

#[inline]
pub const fn s_028aa8_partial_vs_wave_on(x: bool) -> u32 {
    (x as u32) << 16
}

#[inline]
pub const fn s_028aa8_switch_on_eop(x: bool) -> u32 {
    (x as u32) << 17
}

#[inline]
pub const fn s_028aa8_partial_es_wave_on(x: bool) -> u32 {
    (x as u32) << 18
}

#[inline]
pub const fn s_028aa8_switch_on_eoi(x: bool) -> u32 {
    (x as u32) << 19
}

#[inline]
pub const fn s_028aa8_wd_switch_on_eop(x: bool) -> u32 {
    (x as u32) << 20
}

#[inline]
pub const fn s_028aa8_max_primgrp_in_wave(x: u32) -> u32 {
    (x & 0xf) << 28
}

pub const S_030960_EN_INST_OPT_BASIC: u32 = 1 << 23;
pub const S_030960_EN_INST_OPT_ADV: u32 = 1 << 24;

// VGT_HS_OFFCHIP_PARAM

#[inline]
pub const fn s_03093c_offchip_buffering(x: u32) -> u32 {
    x & 0x1ff
}

#[inline]
pub const fn s_03093c_offchip_granularity(x: u32) -> u32 {
    (x & 0x3) << 9
}

// Primitive types

pub const V_008958_DI_PT_POINTLIST: u32 = 0x01;
pub const V_008958_DI_PT_LINELIST: u32 = 0x02;
pub const V_008958_DI_PT_LINESTRIP: u32 = 0x03;
pub const V_008958_DI_PT_TRILIST: u32 = 0x04;
pub const V_008958_DI_PT_TRIFAN: u32 = 0x05;
pub const V_008958_DI_PT_TRISTRIP: u32 = 0x06;
pub const V_008958_DI_PT_LINELIST_ADJ: u32 = 0x0a;
pub const V_008958_DI_PT_LINESTRIP_ADJ: u32 = 0x0b;
pub const V_008958_DI_PT_TRILIST_ADJ: u32 = 0x0c;
pub const V_008958_DI_PT_TRISTRIP_ADJ: u32 = 0x0d;
pub const V_008958_DI_PT_PATCH: u32 = 0x11;

// Streamout

pub const R_028AD4_VGT_STRMOUT_VTX_STRIDE_0: u32 = 0x028AD4;
pub const R_028B98_VGT_STRMOUT_BUFFER_CONFIG: u32 = 0x028B98;
/// Distance between the registers of two streamout buffers.
pub const STRMOUT_BUFFER_REG_STRIDE: u32 = 16;

#[inline]
pub const fn s_028b94_rast_stream(x: u32) -> u32 {
    (x & 0x7) << 4
}

#[inline]
pub const fn s_028b98_stream_0_buffer_en(mask: u32) -> u32 {
    mask & 0xf
}
