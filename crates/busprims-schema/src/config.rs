/// Limits applied when loading descriptors from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of descriptor files loaded from a directory.
    pub max_descriptors_from_directory: usize,
    /// Maximum bytes allowed per descriptor file.
    pub max_descriptor_file_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_descriptors_from_directory: 256,
            max_descriptor_file_size: 256 * 1024,
        }
    }
}
