use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use busprims_transport::{SERVICE_ID_MAX, SUBJECT_ID_MAX};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::descriptor::TypeDescriptor;
use crate::error::{Result, SchemaError};

/// Request and response types of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub request: Arc<TypeDescriptor>,
    pub response: Arc<TypeDescriptor>,
}

/// Port-keyed registry of type descriptors.
///
/// Subjects map to one descriptor, services to a request/response pair.
#[derive(Debug)]
pub struct SchemaRegistry {
    subjects: HashMap<u16, Arc<TypeDescriptor>>,
    services: HashMap<u16, ServiceDescriptor>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            subjects: HashMap::new(),
            services: HashMap::new(),
            config,
        }
    }

    pub fn register_subject(&mut self, subject_id: u16, descriptor: Arc<TypeDescriptor>) -> Result<()> {
        if subject_id > SUBJECT_ID_MAX {
            return Err(SchemaError::InvalidDescriptor(format!(
                "subject-ID {subject_id} exceeds {SUBJECT_ID_MAX}"
            )));
        }
        debug!(subject_id, type_name = descriptor.name(), "subject registered");
        self.subjects.insert(subject_id, descriptor);
        Ok(())
    }

    pub fn register_service(&mut self, service_id: u16, service: ServiceDescriptor) -> Result<()> {
        if service_id > SERVICE_ID_MAX {
            return Err(SchemaError::InvalidDescriptor(format!(
                "service-ID {service_id} exceeds {SERVICE_ID_MAX}"
            )));
        }
        debug!(
            service_id,
            request = service.request.name(),
            response = service.response.name(),
            "service registered"
        );
        self.services.insert(service_id, service);
        Ok(())
    }

    /// Register a subject type from its JSON form.
    pub fn register_subject_json(&mut self, subject_id: u16, json: &str) -> Result<()> {
        let descriptor: TypeDescriptor = serde_json::from_str(json)?;
        self.register_subject(subject_id, Arc::new(descriptor))
    }

    /// Register a service from JSON `{"request": ..., "response": ...}`.
    pub fn register_service_json(&mut self, service_id: u16, json: &str) -> Result<()> {
        let service: ServiceDescriptor = serde_json::from_str(json)?;
        self.register_service(service_id, service)
    }

    /// Load descriptors from a directory.
    ///
    /// Files are named `subject_<id>.json` or `service_<id>.json`; other
    /// files are ignored.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    /// Load descriptors from a directory with explicit config.
    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);
        let mut loaded = 0usize;

        let entries = std::fs::read_dir(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        for entry in entries {
            let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(port) = parse_port_file_name(&file_name) else {
                continue;
            };
            let entry_path = entry.path();
            let path_metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_type = path_metadata.file_type();

            if file_type.is_symlink() {
                return Err(SchemaError::LoadFailed(format!(
                    "refusing to load descriptor symlink: {file_name}"
                )));
            }
            if !file_type.is_file() {
                continue;
            }

            loaded = loaded.saturating_add(1);
            if loaded > registry.config.max_descriptors_from_directory {
                return Err(SchemaError::LoadFailed(format!(
                    "descriptor count exceeds configured max ({}): {loaded}",
                    registry.config.max_descriptors_from_directory
                )));
            }

            let file = std::fs::File::open(&entry_path).map_err(|err| {
                SchemaError::LoadFailed(format!(
                    "failed opening descriptor {}: {err}",
                    entry_path.display()
                ))
            })?;
            let opened_metadata = file
                .metadata()
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;

            #[cfg(unix)]
            {
                if !same_file_identity(&path_metadata, &opened_metadata) {
                    return Err(SchemaError::LoadFailed(format!(
                        "descriptor file changed during load: {file_name}"
                    )));
                }
            }

            let max_bytes = registry.config.max_descriptor_file_size;
            if opened_metadata.len() > max_bytes as u64 {
                return Err(SchemaError::LoadFailed(format!(
                    "descriptor file too large ({} bytes): {file_name}",
                    opened_metadata.len()
                )));
            }

            let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
            let mut content = String::new();
            file.take(read_limit)
                .read_to_string(&mut content)
                .map_err(|err| {
                    SchemaError::LoadFailed(format!(
                        "failed reading descriptor {}: {err}",
                        entry_path.display()
                    ))
                })?;
            if content.len() > max_bytes {
                return Err(SchemaError::LoadFailed(format!(
                    "descriptor file too large while reading: {file_name}"
                )));
            }

            match port {
                PortFile::Subject(id) => registry.register_subject_json(id, &content)?,
                PortFile::Service(id) => registry.register_service_json(id, &content)?,
            }
        }

        Ok(registry)
    }

    pub fn subject(&self, subject_id: u16) -> Result<Arc<TypeDescriptor>> {
        self.subjects
            .get(&subject_id)
            .cloned()
            .ok_or_else(|| SchemaError::NoDescriptor(format!("subject {subject_id}")))
    }

    pub fn service(&self, service_id: u16) -> Result<ServiceDescriptor> {
        self.services
            .get(&service_id)
            .cloned()
            .ok_or_else(|| SchemaError::NoDescriptor(format!("service {service_id}")))
    }

    pub fn has_subject(&self, subject_id: u16) -> bool {
        self.subjects.contains_key(&subject_id)
    }

    pub fn has_service(&self, service_id: u16) -> bool {
        self.services.contains_key(&service_id)
    }

    /// Registered subject-IDs, ascending.
    pub fn subjects(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.subjects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Registered service-IDs, ascending.
    pub fn services(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.services.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortFile {
    Subject(u16),
    Service(u16),
}

fn parse_port_file_name(file_name: &str) -> Option<PortFile> {
    let lower = file_name.to_ascii_lowercase();
    let stem = lower.strip_suffix(".json")?;
    if let Some(id) = stem.strip_prefix("subject_") {
        return id.parse().ok().map(PortFile::Subject);
    }
    if let Some(id) = stem.strip_prefix("service_") {
        return id.parse().ok().map(PortFile::Service);
    }
    None
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}
