//! Capability negotiation and physical device selection.
//!
//! [`Negotiator::negotiate`] checks a [`Requirements`] set against what a
//! [`Host`] reports, creates the instance and picks the highest rated device.
//! The host is a trait so the pipeline can run against Vulkan or against an
//! in-memory fake in tests.

use std::fmt;
use thiserror::Error;

/// Bonus added to the rating of discrete GPUs.
const DISCRETE_BONUS: u64 = 1000;

/// A named capability (extension) and its spec version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Capability {
    pub name: String,
    pub version: u32,
}

impl Capability {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Whether `available` can stand in for this requirement.
    pub fn is_satisfied_by(&self, available: &Capability) -> bool {
        self.name == available.name && available.version >= self.version
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.name, self.version)
    }
}

/// What the application needs before it can proceed.
#[derive(Clone, Debug, Default)]
pub struct Requirements {
    pub extensions: Vec<Capability>,
    pub layers: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceProperties {
    pub discrete: bool,
    pub max_image_dimension_2d: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCandidate<D> {
    pub handle: D,
    pub name: String,
    pub properties: DeviceProperties,
}

/// A successfully created instance and the device chosen on it.
#[derive(Debug)]
pub struct Negotiated<I, D> {
    pub instance: I,
    pub device: DeviceCandidate<D>,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("Missing layers {missing:?} (available: {available:?})")]
    MissingLayers {
        missing: Vec<String>,
        available: Vec<String>,
    },
    #[error("Missing extensions {missing:?} (available: {available:?})")]
    MissingExtensions {
        missing: Vec<Capability>,
        available: Vec<Capability>,
    },
    #[error("Instance creation failed: {0}")]
    InstanceCreationFailed(String),
    #[error("No physical devices found")]
    NoDevicesFound,
    #[error("No suitable physical device")]
    NoSuitableDevice,
    #[error("Failed to query {what}: {reason}")]
    Query { what: &'static str, reason: String },
}

/// The environment negotiation runs against.
pub trait Host {
    type Instance;
    type Device: Copy;

    fn available_layers(&self) -> anyhow::Result<Vec<String>>;

    fn available_extensions(&self) -> anyhow::Result<Vec<Capability>>;

    fn create_instance(
        &self,
        extensions: &[String],
        layers: &[String],
    ) -> anyhow::Result<Self::Instance>;

    fn enumerate_devices(
        &self,
        instance: &Self::Instance,
    ) -> anyhow::Result<Vec<DeviceCandidate<Self::Device>>>;

    /// Releases an instance that negotiation created but will not return.
    fn destroy_instance(&self, instance: Self::Instance);
}

pub fn missing_layers(required: &[String], available: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|layer| !available.contains(layer))
        .cloned()
        .collect()
}

pub fn missing_extensions(required: &[Capability], available: &[Capability]) -> Vec<Capability> {
    required
        .iter()
        .filter(|req| !available.iter().any(|avail| req.is_satisfied_by(avail)))
        .cloned()
        .collect()
}

pub fn rate(properties: &DeviceProperties) -> u64 {
    let bonus = if properties.discrete { DISCRETE_BONUS } else { 0 };
    bonus + u64::from(properties.max_image_dimension_2d)
}

/// Picks the highest rated candidate.
///
/// A later candidate only replaces the current best when its rating is
/// strictly greater, so equal ratings go to whichever was enumerated first.
/// That tie policy is arbitrary; nothing else distinguishes such devices.
pub fn select_best<D>(candidates: &[DeviceCandidate<D>]) -> Option<&DeviceCandidate<D>> {
    let mut best: Option<(&DeviceCandidate<D>, u64)> = None;
    for candidate in candidates {
        let rating = rate(&candidate.properties);
        tracing::debug!("Device `{}` rated {}", candidate.name, rating);
        match best {
            Some((_, best_rating)) if rating <= best_rating => {}
            _ => best = Some((candidate, rating)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

#[derive(Copy, Clone, Debug)]
pub struct Negotiator {
    validation: bool,
}

impl Negotiator {
    pub fn new(validation: bool) -> Self {
        Self { validation }
    }

    pub fn negotiate<H: Host>(
        &self,
        host: &H,
        requirements: &Requirements,
    ) -> Result<Negotiated<H::Instance, H::Device>, NegotiationError> {
        let available_layers = host
            .available_layers()
            .map_err(|e| query_error("instance layers", e))?;

        tracing::info!("Available layers:");
        for layer in &available_layers {
            tracing::info!("  {}", layer);
        }

        if self.validation {
            let missing = missing_layers(&requirements.layers, &available_layers);
            if !missing.is_empty() {
                for layer in &missing {
                    tracing::error!("Missing layer: {}", layer);
                }
                return Err(NegotiationError::MissingLayers {
                    missing,
                    available: available_layers,
                });
            }
        }
        tracing::debug!("Layers checked");

        let available_extensions = host
            .available_extensions()
            .map_err(|e| query_error("instance extensions", e))?;

        let missing = missing_extensions(&requirements.extensions, &available_extensions);
        if !missing.is_empty() {
            for extension in &missing {
                tracing::error!("Missing extension: {}", extension);
            }
            for extension in &available_extensions {
                tracing::error!("  available: {}", extension);
            }
            return Err(NegotiationError::MissingExtensions {
                missing,
                available: available_extensions,
            });
        }
        tracing::debug!("Extensions checked");

        let extension_names = requirements
            .extensions
            .iter()
            .map(|e| e.name.clone())
            .collect::<Vec<_>>();
        let layer_names = if self.validation {
            requirements.layers.clone()
        } else {
            Vec::new()
        };

        let instance = host
            .create_instance(&extension_names, &layer_names)
            .map_err(|e| {
                tracing::error!("Instance creation failed: {:#}", e);
                NegotiationError::InstanceCreationFailed(format!("{:#}", e))
            })?;
        tracing::debug!("Instance created");

        match Self::select_device(host, &instance) {
            Ok(device) => {
                tracing::info!("Selected physical device (`{}`).", device.name);
                Ok(Negotiated { instance, device })
            }
            Err(error) => {
                host.destroy_instance(instance);
                Err(error)
            }
        }
    }

    fn select_device<H: Host>(
        host: &H,
        instance: &H::Instance,
    ) -> Result<DeviceCandidate<H::Device>, NegotiationError> {
        let candidates = host
            .enumerate_devices(instance)
            .map_err(|e| query_error("physical devices", e))?;

        if candidates.is_empty() {
            tracing::error!("No physical devices found.");
            return Err(NegotiationError::NoDevicesFound);
        }
        tracing::debug!("Devices enumerated ({})", candidates.len());

        select_best(&candidates)
            .cloned()
            .ok_or(NegotiationError::NoSuitableDevice)
    }
}

fn query_error(what: &'static str, error: anyhow::Error) -> NegotiationError {
    tracing::error!("Failed to query {}: {:#}", what, error);
    NegotiationError::Query {
        what,
        reason: format!("{:#}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeHost {
        layers: Vec<String>,
        extensions: Vec<Capability>,
        devices: Vec<DeviceCandidate<u32>>,
        fail_instance: bool,
        fail_devices: bool,
        created: RefCell<Vec<(Vec<String>, Vec<String>)>>,
        destroyed: Cell<usize>,
        enumerated: Cell<bool>,
    }

    impl Host for FakeHost {
        type Instance = usize;
        type Device = u32;

        fn available_layers(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.layers.clone())
        }

        fn available_extensions(&self) -> anyhow::Result<Vec<Capability>> {
            Ok(self.extensions.clone())
        }

        fn create_instance(
            &self,
            extensions: &[String],
            layers: &[String],
        ) -> anyhow::Result<usize> {
            if self.fail_instance {
                return Err(anyhow!("ERROR_INCOMPATIBLE_DRIVER"));
            }
            let mut created = self.created.borrow_mut();
            created.push((extensions.to_vec(), layers.to_vec()));
            Ok(created.len())
        }

        fn enumerate_devices(&self, _: &usize) -> anyhow::Result<Vec<DeviceCandidate<u32>>> {
            self.enumerated.set(true);
            if self.fail_devices {
                return Err(anyhow!("ERROR_OUT_OF_HOST_MEMORY"));
            }
            Ok(self.devices.clone())
        }

        fn destroy_instance(&self, _: usize) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    fn device(handle: u32, discrete: bool, max_image_dimension_2d: u32) -> DeviceCandidate<u32> {
        DeviceCandidate {
            handle,
            name: format!("gpu{}", handle),
            properties: DeviceProperties {
                discrete,
                max_image_dimension_2d,
            },
        }
    }

    fn surface_requirements(version: u32) -> Requirements {
        Requirements {
            extensions: vec![Capability::new("surface", version)],
            layers: vec!["validation".to_string()],
        }
    }

    fn surface_host() -> FakeHost {
        FakeHost {
            extensions: vec![Capability::new("surface", 2)],
            devices: vec![device(1, false, 4096)],
            ..Default::default()
        }
    }

    #[test]
    fn missing_extensions_empty_iff_all_satisfied() {
        let available = vec![Capability::new("a", 2), Capability::new("b", 1)];

        assert!(missing_extensions(&[Capability::new("a", 2)], &available).is_empty());
        assert!(missing_extensions(&[Capability::new("a", 1), Capability::new("b", 1)], &available).is_empty());
        assert_eq!(
            missing_extensions(&[Capability::new("b", 2), Capability::new("c", 0)], &available),
            vec![Capability::new("b", 2), Capability::new("c", 0)]
        );
        assert!(missing_extensions(&[], &[]).is_empty());
    }

    #[test]
    fn version_match_requires_same_name() {
        let available = vec![Capability::new("other", 10)];
        assert_eq!(
            missing_extensions(&[Capability::new("surface", 1)], &available),
            vec![Capability::new("surface", 1)]
        );
    }

    #[test]
    fn missing_computation_is_repeatable() {
        let required = vec![Capability::new("x", 3), Capability::new("y", 1)];
        let available = vec![Capability::new("y", 1)];
        assert_eq!(
            missing_extensions(&required, &available),
            missing_extensions(&required, &available)
        );

        let layers = vec!["l1".to_string(), "l2".to_string()];
        let avail_layers = vec!["l2".to_string()];
        assert_eq!(missing_layers(&layers, &avail_layers), vec!["l1".to_string()]);
        assert_eq!(
            missing_layers(&layers, &avail_layers),
            missing_layers(&layers, &avail_layers)
        );
    }

    #[test]
    fn rating_is_monotonic_in_image_dimension() {
        for discrete in [false, true] {
            let small = DeviceProperties { discrete, max_image_dimension_2d: 2048 };
            let large = DeviceProperties { discrete, max_image_dimension_2d: 8192 };
            assert!(rate(&large) >= rate(&small));
        }
    }

    #[test]
    fn discrete_bonus_dominates_small_dimensions() {
        let discrete = DeviceProperties { discrete: true, max_image_dimension_2d: 0 };
        let integrated = DeviceProperties { discrete: false, max_image_dimension_2d: 999 };
        assert!(rate(&discrete) > rate(&integrated));
    }

    #[test]
    fn rating_does_not_overflow() {
        let props = DeviceProperties { discrete: true, max_image_dimension_2d: u32::MAX };
        assert_eq!(rate(&props), u64::from(u32::MAX) + 1000);
    }

    #[test]
    fn equal_ratings_keep_first_enumerated() {
        let candidates = vec![device(1, true, 1000), device(2, false, 2000), device(3, true, 1000)];
        assert_eq!(select_best(&candidates).map(|c| c.handle), Some(1));
    }

    #[test]
    fn select_best_of_nothing_is_none() {
        assert!(select_best::<u32>(&[]).is_none());
    }

    #[test]
    fn newer_extension_version_passes() {
        let host = surface_host();
        let result = Negotiator::new(false).negotiate(&host, &surface_requirements(1));
        assert!(result.is_ok());
    }

    #[test]
    fn older_extension_version_fails() {
        let host = surface_host();
        let error = Negotiator::new(false)
            .negotiate(&host, &surface_requirements(3))
            .unwrap_err();

        match error {
            NegotiationError::MissingExtensions { missing, available } => {
                assert_eq!(missing, vec![Capability::new("surface", 3)]);
                assert_eq!(available, vec![Capability::new("surface", 2)]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(host.created.borrow().is_empty());
    }

    #[test]
    fn no_devices_is_reported_and_instance_released() {
        let host = FakeHost {
            devices: Vec::new(),
            ..surface_host()
        };
        let error = Negotiator::new(false)
            .negotiate(&host, &surface_requirements(1))
            .unwrap_err();

        assert!(matches!(error, NegotiationError::NoDevicesFound));
        assert_eq!(host.destroyed.get(), 1);
    }

    #[test]
    fn larger_integrated_device_beats_smaller_discrete() {
        let host = FakeHost {
            devices: vec![device(1, true, 4096), device(2, false, 16384)],
            ..surface_host()
        };
        let negotiated = Negotiator::new(false)
            .negotiate(&host, &surface_requirements(1))
            .unwrap();

        // 0 + 16384 > 1000 + 4096
        assert_eq!(negotiated.device.handle, 2);
        assert_eq!(host.destroyed.get(), 0);
    }

    #[test]
    fn layers_ignored_without_validation() {
        let host = surface_host();
        let negotiated = Negotiator::new(false).negotiate(&host, &surface_requirements(1));

        assert!(negotiated.is_ok());
        let created = host.created.borrow();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, vec!["surface".to_string()]);
        assert!(created[0].1.is_empty());
    }

    #[test]
    fn missing_layer_stops_before_extensions() {
        let host = FakeHost {
            layers: vec!["other".to_string()],
            extensions: Vec::new(),
            ..surface_host()
        };
        let error = Negotiator::new(true)
            .negotiate(&host, &surface_requirements(1))
            .unwrap_err();

        match error {
            NegotiationError::MissingLayers { missing, available } => {
                assert_eq!(missing, vec!["validation".to_string()]);
                assert_eq!(available, vec!["other".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!host.enumerated.get());
    }

    #[test]
    fn validation_enables_required_layers() {
        let host = FakeHost {
            layers: vec!["validation".to_string(), "other".to_string()],
            ..surface_host()
        };
        Negotiator::new(true)
            .negotiate(&host, &surface_requirements(1))
            .unwrap();

        assert_eq!(host.created.borrow()[0].1, vec!["validation".to_string()]);
    }

    #[test]
    fn instance_failure_is_reported() {
        let host = FakeHost {
            fail_instance: true,
            ..surface_host()
        };
        let error = Negotiator::new(false)
            .negotiate(&host, &surface_requirements(1))
            .unwrap_err();

        assert!(matches!(error, NegotiationError::InstanceCreationFailed(ref reason) if reason.contains("INCOMPATIBLE")));
        assert!(!host.enumerated.get());
        assert_eq!(host.destroyed.get(), 0);
    }

    #[test]
    fn device_query_failure_releases_instance() {
        let host = FakeHost {
            fail_devices: true,
            ..surface_host()
        };
        let error = Negotiator::new(false)
            .negotiate(&host, &surface_requirements(1))
            .unwrap_err();

        assert!(matches!(error, NegotiationError::Query { what: "physical devices", .. }));
        assert_eq!(host.destroyed.get(), 1);
    }
}
