// SPDX-License-Identifier: CEPL-1.0
use crate::device::DeviceContext;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::ptr::NonNull;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("no memory type in {type_bits:#034b} provides {required:?}")]
    NoSuitableType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
}

/// First memory type allowed by `type_bits` whose flags include all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, MemoryError> {
    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(MemoryError::NoSuitableType {
            type_bits,
            required,
        })
}

pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

pub(crate) unsafe fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let mem_type = find_memory_type(&ctx.memory_properties, req.memory_type_bits, props)?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    Ok(ctx.device.allocate_memory(&mai, None)?)
}

/// Buffer and its dedicated allocation. Optionally kept mapped for its whole life.
pub struct GpuBuffer {
    device: ash::Device,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub properties: vk::MemoryPropertyFlags,
    mapped: Option<NonNull<u8>>,
}

impl GpuBuffer {
    pub fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(anyhow!("zero-sized buffer ({usage:?})"));
        }
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buffer = ctx.device.create_buffer(&bci, None)?;
            // owned from here on, so early returns release the buffer
            let mut out = Self {
                device: ctx.device.clone(),
                buffer,
                memory: vk::DeviceMemory::null(),
                size,
                usage,
                properties,
                mapped: None,
            };
            let req = ctx.device.get_buffer_memory_requirements(buffer);
            out.memory = allocate(ctx, req, properties)
                .with_context(|| format!("buffer memory ({size} bytes, {properties:?})"))?;
            ctx.device.bind_buffer_memory(buffer, out.memory, 0)?;
            Ok(out)
        }
    }

    /// Host-visible + coherent TRANSFER_SRC buffer holding `bytes`.
    pub fn staging(ctx: &DeviceContext, bytes: &[u8]) -> Result<Self> {
        let mut staging = Self::new(
            ctx,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_once(0, bytes)?;
        Ok(staging)
    }

    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Map the whole buffer until drop.
    pub fn map_persistent(&mut self) -> Result<()> {
        if self.mapped.is_some() {
            return Ok(());
        }
        if !self.is_host_visible() {
            return Err(anyhow!("cannot map device-local buffer"));
        }
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
        };
        self.mapped = NonNull::new(ptr as *mut u8);
        Ok(())
    }

    /// Copy into a persistently mapped buffer.
    pub fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        let base = self
            .mapped
            .ok_or_else(|| anyhow!("buffer is not persistently mapped"))?;
        self.check_range(offset, bytes.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                base.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Map, copy, unmap.
    pub fn write_once(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        if self.mapped.is_some() {
            return self.write(offset, bytes);
        }
        if !self.is_host_visible() {
            return Err(anyhow!("device-local buffers are written through staging"));
        }
        self.check_range(offset, bytes.len())?;
        unsafe {
            let ptr = self.device.map_memory(
                self.memory,
                offset,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        if !self.is_host_visible() {
            return Err(anyhow!("device-local buffers are read through staging"));
        }
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let src = match self.mapped {
                Some(p) => p.as_ptr() as *const u8,
                None => self.device.map_memory(
                    self.memory,
                    0,
                    self.size,
                    vk::MemoryMapFlags::empty(),
                )? as *const u8,
            };
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
            if self.mapped.is_none() {
                self.device.unmap_memory(self.memory);
            }
        }
        Ok(out)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len as vk::DeviceSize)
            .ok_or_else(|| anyhow!("write range overflows"))?;
        if end > self.size {
            return Err(anyhow!(
                "write of {len} bytes at {offset} exceeds buffer size {}",
                self.size
            ));
        }
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        p
    }

    const DL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HV: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HC: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    #[test]
    fn picks_first_superset_match() {
        let p = props(&[DL, HV, HV | HC, DL | HV | HC]);
        assert_eq!(find_memory_type(&p, 0b1111, HV | HC), Ok(2));
        assert_eq!(find_memory_type(&p, 0b1111, DL), Ok(0));
        assert_eq!(find_memory_type(&p, 0b1111, vk::MemoryPropertyFlags::empty()), Ok(0));
    }

    #[test]
    fn respects_type_bits_filter() {
        let p = props(&[DL, HV, HV | HC, DL | HV | HC]);
        assert_eq!(find_memory_type(&p, 0b1000, HV | HC), Ok(3));
        assert_eq!(find_memory_type(&p, 0b1010, HV), Ok(1));
    }

    #[test]
    fn no_match_is_an_error() {
        let p = props(&[DL, HV]);
        let err = find_memory_type(&p, 0b01, HV);
        assert_eq!(
            err,
            Err(MemoryError::NoSuitableType {
                type_bits: 0b01,
                required: HV
            })
        );
        // bits beyond memory_type_count never match
        assert!(find_memory_type(&p, 0b100, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(208, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 64), 320);
        assert_eq!(align_up(24, 0), 24);
    }
}
