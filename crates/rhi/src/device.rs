//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns the `VkDevice` and the graphics and present queues.
//! Memory is allocated explicitly through `vkAllocateMemory` (see
//! [`crate::factory`]) so that interop images can chain export info, which
//! is why there is no pooled allocator here.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, error, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Device extension used to export memory on this platform, if any.
pub const fn external_memory_extension() -> Option<&'static CStr> {
    #[cfg(unix)]
    {
        Some(ash::khr::external_memory_fd::NAME)
    }
    #[cfg(windows)]
    {
        Some(ash::khr::external_memory_win32::NAME)
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

/// Device extensions required for the given configuration.
pub fn required_device_extensions(enable_interop: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::swapchain::NAME];
    if enable_interop && let Some(external) = external_memory_extension() {
        extensions.push(external);
    }
    extensions
}

/// Logical device with its queues.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the logical device.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue families are incomplete or device
    /// creation fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        extensions: &[&'static CStr],
        allocation_callbacks: Option<&vk::AllocationCallbacks<'_>>,
    ) -> Result<Self, RhiError> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance.handle().create_device(
                physical_device_info.device,
                &create_info,
                allocation_callbacks,
            )?
        };

        info!(
            "Logical device created with {} extension(s): {:?}",
            extensions.len(),
            extensions
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(graphics_family, present_family, "Queues retrieved");

        Ok(Self {
            device,
            physical_device: physical_device_info.device,
            graphics_queue,
            present_queue,
            queue_families,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Blocks until every queue on the device is idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Destroys the device. Called by the owning context once every child
    /// object is gone.
    ///
    /// # Safety
    ///
    /// No object created from this device may be used afterwards.
    pub(crate) unsafe fn destroy(&mut self, allocation_callbacks: Option<&vk::AllocationCallbacks<'_>>) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during teardown: {:?}", e);
            }
            self.device.destroy_device(allocation_callbacks);
        }
        info!("Logical device destroyed");
    }
}
