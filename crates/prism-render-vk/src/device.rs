// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use portable_atomic::{AtomicBool, Ordering};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::io::{BufRead, Write};
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

static PAUSE_ON_VALIDATION_ERROR: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no discrete GPU with swapchain support and a usable surface")]
    NoSuitableDevice,
}

#[derive(Clone, Copy, Debug)]
pub struct ContextOptions {
    pub validation: bool,
    pub pause_on_validation: bool,
    pub require_discrete: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            pause_on_validation: false,
            require_discrete: true,
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
        if PAUSE_ON_VALIDATION_ERROR.load(Ordering::Relaxed) {
            wait_for_operator();
        }
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

fn wait_for_operator() {
    let stdin = std::io::stdin();
    if let Err(e) = prompt_operator(&mut stdin.lock(), &mut std::io::stdout()) {
        warn!("validation pause: {e}");
    }
}

/// Print the acknowledgment prompt and block until a line is read.
fn prompt_operator<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> std::io::Result<()> {
    writeln!(output, "validation error reported, press Enter to continue")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(())
}

/// Instance plus its debug messenger. Destroyed when dropped.
struct InstanceHandle {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<(ext_debug::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Presentable surface bound to one instance.
pub struct Surface {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

/// Facts about one physical device that drive selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub has_swapchain_ext: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl DeviceCandidate {
    fn is_suitable(&self, needs_surface: bool, require_discrete: bool) -> bool {
        if require_discrete && self.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            return false;
        }
        if self.graphics_family.is_none() {
            return false;
        }
        if !needs_surface {
            return true;
        }
        self.has_swapchain_ext
            && self.present_family.is_some()
            && self.surface_format_count > 0
            && self.present_mode_count > 0
    }
}

/// Index of the first candidate that satisfies the selection rules.
pub fn pick_candidate(
    candidates: &[DeviceCandidate],
    needs_surface: bool,
    require_discrete: bool,
) -> Option<usize> {
    candidates
        .iter()
        .position(|c| c.is_suitable(needs_surface, require_discrete))
}

/// Unique queue family indices to request, graphics first.
pub fn unique_queue_families(graphics: u32, present: u32) -> Vec<u32> {
    if graphics == present {
        vec![graphics]
    } else {
        vec![graphics, present]
    }
}

/// Root of every GPU object: instance, debug reporting, physical and logical
/// device, and the graphics/present queues.
pub struct DeviceContext {
    pub device: ash::Device,
    pub phys: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub limits: vk::PhysicalDeviceLimits,
    pub anisotropy: bool,
    pub device_name: String,
    instance: InstanceHandle,
}

impl DeviceContext {
    /// Build the context. With `window`, a surface is created and device
    /// selection requires presentation support for it.
    pub fn new(
        display: RawDisplayHandle,
        window: Option<RawWindowHandle>,
        options: &ContextOptions,
    ) -> Result<(Self, Option<Surface>)> {
        PAUSE_ON_VALIDATION_ERROR.store(options.pause_on_validation, Ordering::Relaxed);

        let instance = unsafe { create_instance(display, options) }.context("create_instance")?;

        // Surface before device selection: present support is queried against it.
        let surface = match window {
            Some(wh) => {
                let handle = unsafe {
                    ash_window::create_surface(
                        &instance.entry,
                        &instance.instance,
                        display,
                        wh,
                        None,
                    )
                }
                .context("ash_window::create_surface")?;
                Some(Surface {
                    loader: surface::Instance::new(&instance.entry, &instance.instance),
                    handle,
                })
            }
            None => None,
        };

        let (phys, graphics_family, present_family) =
            unsafe { select_physical_device(&instance.instance, surface.as_ref(), options) }?;

        let props = unsafe { instance.instance.get_physical_device_properties(phys) };
        let device_name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let memory_properties =
            unsafe { instance.instance.get_physical_device_memory_properties(phys) };
        let features = unsafe { instance.instance.get_physical_device_features(phys) };
        let anisotropy = features.sampler_anisotropy == vk::TRUE;

        let device = unsafe {
            create_logical_device(
                &instance.instance,
                phys,
                graphics_family,
                present_family,
                surface.is_some(),
                anisotropy,
            )
        }
        .context("create_device")?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        info!(
            "vk: device '{}' graphics_family={} present_family={} anisotropy={}",
            device_name, graphics_family, present_family, anisotropy
        );

        Ok((
            Self {
                device,
                phys,
                graphics_queue,
                present_queue,
                graphics_family,
                present_family,
                memory_properties,
                limits: props.limits,
                anisotropy,
                device_name,
                instance,
            },
            surface,
        ))
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance.instance
    }

    pub fn entry(&self) -> &Entry {
        &self.instance.entry
    }

    /// First candidate format with optimal-tiling support for `features`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|&fmt| {
            let props = unsafe {
                self.instance()
                    .get_physical_device_format_properties(self.phys, fmt)
            };
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                _ => props.optimal_tiling_features.contains(features),
            }
        })
    }

    pub fn depth_format(&self) -> Result<vk::Format> {
        self.find_supported_format(
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .ok_or_else(|| anyhow!("no supported depth format"))
    }

    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            warn!("vk: device_wait_idle failed: {e:?}");
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
        // instance + messenger go with `self.instance`
    }
}

unsafe fn create_instance(
    display: RawDisplayHandle,
    options: &ContextOptions,
) -> Result<InstanceHandle> {
    let entry = Entry::linked();
    let app = CString::new("prism")?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?
        .to_vec();

    let validation = options.validation && {
        let layers = entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default();
        let found = layers
            .iter()
            .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
        if !found {
            warn!("vk: validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        found
    };
    if validation {
        extensions.push(ext_debug::NAME.as_ptr());
    }
    let layer_ptrs: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };
    let instance = entry.create_instance(&create_info, None)?;

    let mut handle = InstanceHandle {
        entry,
        instance,
        debug: None,
    };
    if validation {
        let loader = ext_debug::Instance::new(&handle.entry, &handle.instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = loader.create_debug_utils_messenger(&ci, None)?;
        handle.debug = Some((loader, messenger));
    }
    info!("vk: instance created (validation={})", validation);
    Ok(handle)
}

unsafe fn describe_candidate(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    surface: Option<&Surface>,
) -> Result<DeviceCandidate> {
    let props = instance.get_physical_device_properties(phys);
    let exts = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    let has_swapchain_ext = exts
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);

    let families = instance.get_physical_device_queue_family_properties(phys);
    let graphics_family = families
        .iter()
        .position(|q| q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let (present_family, surface_format_count, present_mode_count) = match surface {
        Some(s) => {
            let supports = |i: u32| {
                s.loader
                    .get_physical_device_surface_support(phys, i, s.handle)
                    .unwrap_or(false)
            };
            // prefer presenting from the graphics family
            let present = graphics_family
                .filter(|&g| supports(g))
                .or_else(|| (0..families.len() as u32).find(|&i| supports(i)));
            let formats = s
                .loader
                .get_physical_device_surface_formats(phys, s.handle)
                .unwrap_or_default()
                .len();
            let modes = s
                .loader
                .get_physical_device_surface_present_modes(phys, s.handle)
                .unwrap_or_default()
                .len();
            (present, formats, modes)
        }
        None => (graphics_family, 0, 0),
    };

    Ok(DeviceCandidate {
        device_type: props.device_type,
        has_swapchain_ext,
        surface_format_count,
        present_mode_count,
        graphics_family,
        present_family,
    })
}

unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<&Surface>,
    options: &ContextOptions,
) -> Result<(vk::PhysicalDevice, u32, u32)> {
    let physical = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    let mut candidates = Vec::with_capacity(physical.len());
    for &phys in &physical {
        let c = describe_candidate(instance, phys, surface)?;
        debug!("vk: candidate {:?}", c);
        candidates.push(c);
    }

    let idx = pick_candidate(&candidates, surface.is_some(), options.require_discrete)
        .ok_or(DeviceError::NoSuitableDevice)?;
    let chosen = &candidates[idx];
    // both are Some for a suitable candidate
    let graphics = chosen.graphics_family.ok_or(DeviceError::NoSuitableDevice)?;
    let present = chosen.present_family.unwrap_or(graphics);
    Ok((physical[idx], graphics, present))
}

unsafe fn create_logical_device(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    graphics_family: u32,
    present_family: u32,
    with_swapchain: bool,
    anisotropy: bool,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> =
        unique_queue_families(graphics_family, present_family)
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

    let device_exts: Vec<*const c_char> = if with_swapchain {
        vec![swapchain::NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: if anisotropy { vk::TRUE } else { vk::FALSE },
        ..Default::default()
    };

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    Ok(instance.create_device(phys, &dinfo, None)?)
}
