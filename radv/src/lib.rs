// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Command buffer state tracking and hardware command stream emission for AMD GPUs.
//!
//! This crate implements the part of a Vulkan driver that sits between the `vkCmd*` entry points
//! and the kernel: it turns a sequence of draw, dispatch and barrier calls into a stream of PM4
//! packets that the GPU command processor executes.
//!
//! # Overview
//!
//! - A [`Winsys`](crate::winsys::Winsys) is the connection to the kernel driver. It creates
//!   buffer objects and submits command streams. [`NullWinsys`](crate::winsys::NullWinsys) is an
//!   in-process implementation that records submissions instead of executing them.
//!
//! - A [`Device`](crate::device::Device) is created from a
//!   [`PhysicalDevice`](crate::device::PhysicalDevice) description (chip class, family, number of
//!   shader engines) and a winsys. It owns the [`Queue`](crate::queue::Queue)s.
//!
//! - [`Buffer`](crate::buffer::Buffer)s and [`Image`](crate::image::Image)s are resources backed
//!   by a buffer object. Images additionally describe their compression metadata (HTILE, CMASK,
//!   FMASK, DCC).
//!
//! - A [`CommandBuffer`](crate::command_buffer::CommandBuffer) records commands. State changes
//!   are tracked with dirty bits and only turned into register writes when a draw or dispatch
//!   actually needs them. Barriers are translated into cache flush bits which are emitted right
//!   before the next dependent operation.
//!
//! - Finished command buffers are handed to [`Queue::submit`](crate::queue::Queue::submit),
//!   which prepends a preamble that sets up ring buffers and scratch memory.
//!
//! # Lifetimes of resources
//!
//! A command buffer holds `Arc`s to every pipeline, buffer, image and descriptor set it
//! references, so none of them can be freed while the command buffer is alive. This does not
//! protect the *contents* of a resource: as in Vulkan, the application must not destroy or
//! rewrite memory that a pending submission still reads.

#![allow(clippy::unusual_byte_groupings)]

pub use ash::vk::DeviceSize;
use std::{borrow::Cow, error::Error, fmt};

#[macro_use]
mod tests;
mod macros;

pub mod buffer;
pub mod command_buffer;
pub mod cs;
pub mod descriptor_set;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod queue;
pub mod registers;
pub mod render_pass;
pub mod shader;
pub mod sync;
pub mod winsys;

/// Error type returned by most functions of this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VulkanError {
    /// A host memory allocation has failed.
    OutOfHostMemory,
    /// A device memory allocation has failed.
    OutOfDeviceMemory,
    /// Initialization of an object could not be completed.
    InitializationFailed,
    /// The kernel rejected a submission, the device must be considered lost.
    DeviceLost,
    /// Mapping of a buffer object has failed.
    MemoryMapFailed,
    /// An external handle is not a valid handle of the specified type.
    InvalidExternalHandle,
    /// Too many objects of the type have already been created.
    TooManyObjects,
}

impl VulkanError {
    /// Returns the matching raw `VkResult`.
    #[inline]
    pub fn to_vk(self) -> ash::vk::Result {
        match self {
            VulkanError::OutOfHostMemory => ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            VulkanError::OutOfDeviceMemory => ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            VulkanError::InitializationFailed => ash::vk::Result::ERROR_INITIALIZATION_FAILED,
            VulkanError::DeviceLost => ash::vk::Result::ERROR_DEVICE_LOST,
            VulkanError::MemoryMapFailed => ash::vk::Result::ERROR_MEMORY_MAP_FAILED,
            VulkanError::InvalidExternalHandle => ash::vk::Result::ERROR_INVALID_EXTERNAL_HANDLE,
            VulkanError::TooManyObjects => ash::vk::Result::ERROR_TOO_MANY_OBJECTS,
        }
    }
}

impl Error for VulkanError {}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VulkanError::OutOfHostMemory => write!(f, "A host memory allocation has failed."),
            VulkanError::OutOfDeviceMemory => {
                write!(f, "A device memory allocation has failed.")
            }
            VulkanError::InitializationFailed => write!(
                f,
                "Initialization of an object could not be completed for implementation-specific \
                reasons.",
            ),
            VulkanError::DeviceLost => write!(f, "The logical or physical device has been lost."),
            VulkanError::MemoryMapFailed => write!(f, "Mapping of a memory object has failed."),
            VulkanError::InvalidExternalHandle => write!(
                f,
                "An external handle is not a valid handle of the specified type.",
            ),
            VulkanError::TooManyObjects => write!(
                f,
                "Too many objects of the type have already been created.",
            ),
        }
    }
}

/// The arguments or state of an operation violate a rule of the API.
///
/// These are programming errors of the caller. Operations that can only fail this way return
/// `Result<_, Box<ValidationError>>`; operations that can also fail at runtime return
/// [`Validated`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationError {
    /// The context in which the problem exists, e.g. the name of the argument.
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,
}

impl ValidationError {
    pub(crate) fn new(
        context: impl Into<Cow<'static, str>>,
        problem: impl Into<Cow<'static, str>>,
    ) -> Box<Self> {
        Box::new(ValidationError {
            context: context.into(),
            problem: problem.into(),
        })
    }
}

impl Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)
        } else {
            write!(f, "{}: {}", self.context, self.problem)
        }
    }
}

/// A runtime error, or a validation error that occurred before the operation was attempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validated<E> {
    /// A non-validation error occurred.
    Error(E),

    /// A validation error occurred.
    ValidationError(Box<ValidationError>),
}

impl<E> Validated<E> {
    /// Returns the inner `Error` value, panicking if the value is a validation error.
    #[inline]
    #[track_caller]
    pub fn unwrap(self) -> E {
        match self {
            Self::Error(err) => err,
            Self::ValidationError(err) => {
                panic!("called `Validated::unwrap` on a validation error: {}", err)
            }
        }
    }

    /// Returns whether `self` is the `ValidationError` variant.
    #[inline]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::ValidationError(_))
    }
}

impl<E: Error + 'static> Error for Validated<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Error(err) => Some(err),
            Self::ValidationError(err) => Some(err),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Validated<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => err.fmt(f),
            Self::ValidationError(err) => write!(f, "a validation error occurred: {}", err),
        }
    }
}

impl<E> From<Box<ValidationError>> for Validated<E> {
    #[inline]
    fn from(err: Box<ValidationError>) -> Self {
        Self::ValidationError(err)
    }
}

impl From<VulkanError> for Validated<VulkanError> {
    #[inline]
    fn from(err: VulkanError) -> Self {
        Self::Error(err)
    }
}
