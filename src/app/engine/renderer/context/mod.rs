use anyhow::{Result, anyhow};
use std::ffi::{CStr, CString};
use std::os::raw::c_void;
use thiserror::Error;
use vulkanalia::Version;
use vulkanalia::loader::{LIBRARY, LibloadingLoader};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk;
use vulkanalia::window as vk_window;
use winit::window::Window;

use vulkanalia::vk::ExtDebugUtilsExtension;

pub mod negotiate;

use negotiate::{Capability, DeviceCandidate, DeviceProperties, Host, Negotiator, Requirements};

pub struct Context {
    // Keeps the loaded library alive for as long as `instance`.
    _entry: Entry,
    instance: Instance,
    data: AppData,
    device: Option<Device>,
}

struct AppData {
    messenger: vk::DebugUtilsMessengerEXT,
    physical_device: vk::PhysicalDevice,
    device_name: String,
    graphics_queue: vk::Queue,
}

const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

impl Context {
    /// Loads Vulkan, negotiates an instance and physical device for `window`
    /// and creates a logical device on it.
    ///
    /// Anything created before a later step fails is released by `Drop`.
    pub unsafe fn create(window: &Window, validation: bool) -> Result<Self> {
        let loader = unsafe { LibloadingLoader::new(LIBRARY)? };
        let entry = unsafe { Entry::new(loader) }.map_err(|e| anyhow!("{}", e))?;

        let portability =
            cfg!(target_os = "macos") && unsafe { entry.version()? } >= PORTABILITY_MACOS_VERSION;
        let requirements = Self::requirements(window, validation, portability);

        let host = VulkanHost {
            entry: &entry,
            validation,
            portability,
        };
        let negotiated = Negotiator::new(validation).negotiate(&host, &requirements)?;

        let mut context = Self {
            _entry: entry,
            instance: negotiated.instance,
            data: AppData {
                messenger: vk::DebugUtilsMessengerEXT::null(),
                physical_device: negotiated.device.handle,
                device_name: negotiated.device.name,
                graphics_queue: vk::Queue::null(),
            },
            device: None,
        };

        if validation {
            let debug_info = Self::debug_info();
            context.data.messenger = unsafe {
                context
                    .instance
                    .create_debug_utils_messenger_ext(&debug_info, None)?
            };
        }

        let device = unsafe {
            Self::create_logical_device(
                &context.instance,
                &mut context.data,
                validation,
                portability,
            )?
        };
        context.device = Some(device);

        Ok(context)
    }

    pub fn device_name(&self) -> &str {
        &self.data.device_name
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.data.graphics_queue
    }

    fn requirements(window: &Window, validation: bool, portability: bool) -> Requirements {
        let mut extensions = vk_window::get_required_instance_extensions(window)
            .iter()
            .map(|e| Capability::new(e.to_string(), 1))
            .collect::<Vec<_>>();

        if validation {
            extensions.push(Capability::new(
                vk::EXT_DEBUG_UTILS_EXTENSION.name.to_string(),
                1,
            ));
        }

        // Enable portability extensions for MoltenVK on macOS
        if portability {
            extensions.push(Capability::new(
                vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.to_string(),
                1,
            ));
            extensions.push(Capability::new(
                vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.to_string(),
                1,
            ));
        }

        Requirements {
            extensions,
            layers: vec![VALIDATION_LAYER.to_string()],
        }
    }

    fn debug_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .user_callback(Some(Self::debug_callback))
    }

    pub extern "system" fn debug_callback(
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        type_: vk::DebugUtilsMessageTypeFlagsEXT,
        data: *const vk::DebugUtilsMessengerCallbackDataEXT,
        _: *mut c_void,
    ) -> vk::Bool32 {
        let data = unsafe { *data };
        let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

        if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
            tracing::error!("({:?}) {}", type_, message);
        } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
            tracing::warn!("({:?}) {}", type_, message);
        } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
            tracing::debug!("({:?}) {}", type_, message);
        } else {
            tracing::trace!("({:?}) {}", type_, message);
        }

        vk::FALSE
    }

    unsafe fn create_logical_device(
        instance: &Instance,
        data: &mut AppData,
        validation: bool,
        portability: bool,
    ) -> Result<Device> {
        let indices = unsafe { QueueFamilyIndices::get(instance, data.physical_device)? };

        let queue_priorities = &[1.0];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(indices.graphics)
            .queue_priorities(queue_priorities);

        let layers = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = vec![];

        // Required by Vulkan SDK on macOS since 1.3.216.
        if portability {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }
        let features = vk::PhysicalDeviceFeatures::builder();

        let queue_infos = &[queue_info];
        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(data.physical_device, &info, None)? };
        data.graphics_queue = unsafe { device.get_device_queue(indices.graphics, 0) };
        tracing::debug!(
            "Created logical device with graphics queue family {}",
            indices.graphics
        );
        Ok(device)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        tracing::debug!("Destroying Vulkan context (`{}`)", self.data.device_name);
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }

            if self.data.messenger != vk::DebugUtilsMessengerEXT::null() {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.data.messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// [`Host`] backed by a loaded Vulkan entry.
struct VulkanHost<'a> {
    entry: &'a Entry,
    validation: bool,
    portability: bool,
}

fn name_of(name: &vk::ExtensionName) -> String {
    unsafe { CStr::from_ptr(name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn to_cstrings(names: &[String]) -> Result<Vec<CString>> {
    names
        .iter()
        .map(|name| CString::new(name.as_str()).map_err(|e| anyhow!("{name:?}: {e}")))
        .collect()
}

impl Host for VulkanHost<'_> {
    type Instance = Instance;
    type Device = vk::PhysicalDevice;

    fn available_layers(&self) -> Result<Vec<String>> {
        let layers = unsafe { self.entry.enumerate_instance_layer_properties()? };
        Ok(layers.iter().map(|l| name_of(&l.layer_name)).collect())
    }

    fn available_extensions(&self) -> Result<Vec<Capability>> {
        let extensions = unsafe { self.entry.enumerate_instance_extension_properties(None)? };
        Ok(extensions
            .iter()
            .map(|e| Capability::new(name_of(&e.extension_name), e.spec_version))
            .collect())
    }

    fn create_instance(&self, extensions: &[String], layers: &[String]) -> Result<Instance> {
        let app_info = vk::ApplicationInfo::builder()
            .application_name(b"Vulkan App\0")
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(b"No Engine\0")
            .engine_version(vk::make_version(1, 0, 0))
            .api_version(vk::make_version(1, 3, 0));

        let extension_names = to_cstrings(extensions)?;
        let extension_ptrs = extension_names.iter().map(|e| e.as_ptr()).collect::<Vec<_>>();
        let layer_names = to_cstrings(layers)?;
        let layer_ptrs = layer_names.iter().map(|l| l.as_ptr()).collect::<Vec<_>>();

        let flags = if self.portability {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        // Reports problems during instance creation itself.
        let mut debug_info = Context::debug_info();

        let mut info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs)
            .flags(flags);

        if self.validation {
            info = info.push_next(&mut debug_info);
        }

        Ok(unsafe { self.entry.create_instance(&info, None)? })
    }

    fn enumerate_devices(&self, instance: &Instance) -> Result<Vec<DeviceCandidate<vk::PhysicalDevice>>> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        Ok(devices
            .into_iter()
            .map(|handle| {
                let properties = unsafe { instance.get_physical_device_properties(handle) };
                DeviceCandidate {
                    handle,
                    name: properties.device_name.to_string(),
                    properties: DeviceProperties {
                        discrete: properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
                        max_image_dimension_2d: properties.limits.max_image_dimension_2d,
                    },
                }
            })
            .collect())
    }

    fn destroy_instance(&self, instance: Instance) {
        tracing::debug!("Destroying instance after failed negotiation");
        unsafe { instance.destroy_instance(None) };
    }
}

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

#[derive(Copy, Clone, Debug)]
struct QueueFamilyIndices {
    graphics: u32,
}

impl QueueFamilyIndices {
    unsafe fn get(instance: &Instance, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let graphics = properties
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        if let Some(graphics) = graphics {
            Ok(Self { graphics })
        } else {
            Err(anyhow!(SuitabilityError("graphics queue family")))
        }
    }
}
