//! Swapchain creation.
//!
//! Surface capabilities are queried fresh for every creation, since a
//! resize changes them. The format, present mode, extent and image count
//! choices are pure functions so they can be tested without a surface.
//!
//! Image views and framebuffers for the swapchain images are owned by the
//! renderer's lifecycle, not here.

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::RhiError;
use crate::gpu::{SwapchainImages, SwapchainPlan};

/// Surface capabilities, formats and present modes for one physical device.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Reads the surface capabilities and reports the extent and image count a
/// swapchain created now would get.
pub(crate) fn query_swapchain_plan(
    surface_loader: &ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    desired_extent: vk::Extent2D,
) -> Result<SwapchainPlan, RhiError> {
    let capabilities = unsafe {
        surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
    };
    Ok(plan_for(&capabilities, desired_extent))
}

fn plan_for(capabilities: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> SwapchainPlan {
    SwapchainPlan {
        extent: choose_extent(capabilities, desired),
        image_count: determine_image_count(capabilities),
    }
}

/// Creates a swapchain for `surface`, retiring `old_swapchain` if non-null.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create_swapchain(
    swapchain_loader: &ash::khr::swapchain::Device,
    surface_loader: &ash::khr::surface::Instance,
    device: &Device,
    surface: vk::SurfaceKHR,
    desired_extent: vk::Extent2D,
    preferred_present_mode: vk::PresentModeKHR,
    old_swapchain: vk::SwapchainKHR,
    allocation_callbacks: Option<&vk::AllocationCallbacks<'_>>,
) -> Result<SwapchainImages, RhiError> {
    let support =
        SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)?;
    if !support.is_adequate() {
        return Err(RhiError::Swapchain(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }

    let surface_format = choose_surface_format(&support.formats);
    let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
    let plan = plan_for(&support.capabilities, desired_extent);
    let SwapchainPlan {
        extent,
        image_count,
    } = plan;

    if plan.is_zero_area() {
        return Err(RhiError::Swapchain(format!(
            "Surface extent is {}x{}",
            extent.width, extent.height
        )));
    }

    info!(
        "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
        extent.width, extent.height, surface_format.format, present_mode, image_count
    );

    let queue_families = device.queue_families();
    let graphics_family = queue_families.graphics_family.unwrap_or_default();
    let present_family = queue_families.present_family.unwrap_or(graphics_family);
    let queue_family_indices = [graphics_family, present_family];

    let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
        (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
    } else {
        (vk::SharingMode::EXCLUSIVE, &[][..])
    };

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(queue_family_indices_slice)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let handle = unsafe { swapchain_loader.create_swapchain(&create_info, allocation_callbacks)? };
    let images = match unsafe { swapchain_loader.get_swapchain_images(handle) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(handle, allocation_callbacks) };
            return Err(e.into());
        }
    };
    info!("Swapchain created with {} images", images.len());

    Ok(SwapchainImages {
        handle,
        format: surface_format.format,
        extent,
        images,
    })
}

/// Prefers B8G8R8A8_SRGB, then B8G8R8A8_UNORM, then whatever comes first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let with_format = |wanted: vk::Format| {
        formats.iter().copied().find(|f| {
            f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    };

    if let Some(format) = with_format(vk::Format::B8G8R8A8_SRGB) {
        return format;
    }
    if let Some(format) = with_format(vk::Format::B8G8R8A8_UNORM) {
        warn!("Using fallback surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return format;
    }

    let first = formats.first().copied().unwrap_or(vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    });
    warn!("Using first available surface format: {:?}", first.format);
    first
}

/// Uses `preferred` when the surface supports it. FIFO is always available.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        return preferred;
    }
    if preferred != vk::PresentModeKHR::FIFO {
        debug!("Present mode {:?} unavailable, falling back to FIFO", preferred);
    }
    vk::PresentModeKHR::FIFO
}

/// The surface's current extent, or `desired` clamped to the surface limits
/// when the surface leaves the choice to the application.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: desired.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: desired.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}
