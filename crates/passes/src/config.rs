//! Run configuration: pass toggles, per-pass options, exclusion sets, and
//! builder-style construction. A configuration file is the same structure in
//! JSON with every field optional.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use umbra_core::{Error as CoreError, Seed};

/// Identifier intensity for the renaming pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenamingMode {
    None,
    Light,
    #[default]
    Normal,
    Aggressive,
}

/// Cosmetic shape of minted identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NamingScheme {
    #[default]
    Alphanumeric,
    Confusable,
    Invisible,
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControlFlowMode {
    None,
    Light,
    #[default]
    Normal,
    Heavy,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionAlgorithm {
    #[default]
    SymmetricBlock,
    Stream,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AntiTamperMode {
    None,
    Light,
    #[default]
    Normal,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    None,
    Minimal,
    #[default]
    Balanced,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DebugMode {
    #[default]
    None,
    SymbolsOnly,
    Full,
}

/// Coarse presets exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    None,
    Minimal,
    Balanced,
    Aggressive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenamingOptions {
    pub mode: RenamingMode,
    pub scheme: NamingScheme,
    pub rename_fields: bool,
    pub rename_properties: bool,
    pub rename_events: bool,
    pub rename_enum_members: bool,
    pub flatten_namespaces: bool,
    pub namespace_prefix: Option<String>,
    pub generate_mapping_file: bool,
}

impl Default for RenamingOptions {
    fn default() -> Self {
        Self {
            mode: RenamingMode::Normal,
            scheme: NamingScheme::Alphanumeric,
            rename_fields: true,
            rename_properties: true,
            rename_events: true,
            rename_enum_members: true,
            flatten_namespaces: false,
            namespace_prefix: None,
            generate_mapping_file: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlFlowOptions {
    pub mode: ControlFlowMode,
    /// Minimum body length considered worth flattening.
    pub complexity_threshold: usize,
    pub insert_junk_blocks: bool,
    pub split_methods: bool,
}

impl Default for ControlFlowOptions {
    fn default() -> Self {
        Self {
            mode: ControlFlowMode::Normal,
            complexity_threshold: 3,
            insert_junk_blocks: false,
            split_methods: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionOptions {
    pub algorithm: EncryptionAlgorithm,
    pub encrypt_strings: bool,
    pub encrypt_methods: bool,
    pub encrypt_resources: bool,
    /// Ship per-literal key material next to the ciphertext and decrypt with
    /// the two-argument decryptor. Off means one baked key.
    pub dynamic_decryption: bool,
    /// Caller-supplied key; absent means a key is drawn from the run's
    /// random source.
    pub key: Option<String>,
    /// Literals excluded verbatim.
    pub excluded_strings: BTreeSet<String>,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self {
            algorithm: EncryptionAlgorithm::SymmetricBlock,
            encrypt_strings: true,
            encrypt_methods: false,
            encrypt_resources: false,
            dynamic_decryption: true,
            key: None,
            excluded_strings: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiTamperOptions {
    pub mode: AntiTamperMode,
    pub validate_checksum: bool,
    pub validate_signature: bool,
    pub corrupt_on_tamper: bool,
}

impl Default for AntiTamperOptions {
    fn default() -> Self {
        Self {
            mode: AntiTamperMode::Normal,
            validate_checksum: true,
            validate_signature: false,
            corrupt_on_tamper: true,
        }
    }
}

/// Full configuration snapshot for one protection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub enable_renaming: bool,
    pub enable_string_encryption: bool,
    pub enable_control_flow: bool,
    pub enable_anti_debug: bool,
    pub enable_anti_tamper: bool,
    pub enable_watermarking: bool,

    // Recognised toggles whose passes this build does not ship; enabling one
    // records a warning at schedule time.
    pub enable_virtualization: bool,
    pub enable_mutation: bool,
    pub enable_constants_encoding: bool,
    pub enable_resources_protection: bool,
    pub enable_call_indirection: bool,
    pub enable_junk_code: bool,

    pub renaming: RenamingOptions,
    pub control_flow: ControlFlowOptions,
    pub encryption: EncryptionOptions,
    pub anti_tamper: AntiTamperOptions,

    pub excluded_namespaces: BTreeSet<String>,
    pub excluded_types: BTreeSet<String>,
    pub excluded_methods: BTreeSet<String>,
    /// Full-name prefixes owned by the framework; members under them are
    /// never touched and literals starting with them are never encrypted.
    pub preserved_prefixes: Vec<String>,

    pub optimization: OptimizationLevel,
    pub debug_mode: DebugMode,

    pub preserve_public_api: bool,
    pub preserve_debug_symbols: bool,
    pub preserve_custom_attributes: bool,

    pub output_path: Option<PathBuf>,
    pub seed: Option<Seed>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enable_renaming: true,
            enable_string_encryption: true,
            enable_control_flow: true,
            enable_anti_debug: true,
            enable_anti_tamper: true,
            enable_watermarking: true,
            enable_virtualization: false,
            enable_mutation: false,
            enable_constants_encoding: false,
            enable_resources_protection: false,
            enable_call_indirection: false,
            enable_junk_code: false,
            renaming: RenamingOptions::default(),
            control_flow: ControlFlowOptions::default(),
            encryption: EncryptionOptions::default(),
            anti_tamper: AntiTamperOptions::default(),
            excluded_namespaces: BTreeSet::new(),
            excluded_types: BTreeSet::new(),
            excluded_methods: BTreeSet::new(),
            preserved_prefixes: vec!["System.".into(), "Microsoft.".into()],
            optimization: OptimizationLevel::Balanced,
            debug_mode: DebugMode::None,
            preserve_public_api: true,
            preserve_debug_symbols: false,
            preserve_custom_attributes: true,
            output_path: None,
            seed: None,
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Preset matching one of the command-line levels.
    pub fn from_level(level: ProtectionLevel) -> Self {
        let mut config = Configuration::default();
        match level {
            ProtectionLevel::None => {
                config.enable_renaming = false;
                config.enable_string_encryption = false;
                config.enable_control_flow = false;
                config.enable_anti_debug = false;
                config.enable_anti_tamper = false;
                config.enable_watermarking = false;
            }
            ProtectionLevel::Minimal => {
                config.enable_control_flow = false;
                config.enable_anti_debug = false;
                config.enable_anti_tamper = false;
                config.renaming.mode = RenamingMode::Light;
                config.control_flow.mode = ControlFlowMode::None;
                config.anti_tamper.mode = AntiTamperMode::None;
            }
            ProtectionLevel::Balanced => {}
            ProtectionLevel::Aggressive => {
                config.renaming.mode = RenamingMode::Aggressive;
                config.control_flow.mode = ControlFlowMode::Heavy;
                config.control_flow.insert_junk_blocks = true;
                config.anti_tamper.mode = AntiTamperMode::Heavy;
                config.preserve_public_api = false;
            }
        }
        config
    }

    /// Reads a configuration file (JSON, all fields optional).
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// True when `name` starts with a preserved framework prefix.
    pub fn is_preserved_prefix(&self, name: &str) -> bool {
        self.preserved_prefixes.iter().any(|p| name.starts_with(p))
    }
}

/// Chained construction for [`Configuration`].
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = Some(path.into());
        self
    }

    pub fn seed(mut self, seed: Seed) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn renaming(mut self, enabled: bool) -> Self {
        self.config.enable_renaming = enabled;
        self
    }

    pub fn renaming_mode(mut self, mode: RenamingMode) -> Self {
        self.config.renaming.mode = mode;
        self
    }

    pub fn naming_scheme(mut self, scheme: NamingScheme) -> Self {
        self.config.renaming.scheme = scheme;
        self
    }

    pub fn mapping_file(mut self, enabled: bool) -> Self {
        self.config.renaming.generate_mapping_file = enabled;
        self
    }

    pub fn string_encryption(mut self, enabled: bool) -> Self {
        self.config.enable_string_encryption = enabled;
        self
    }

    pub fn encryption_algorithm(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.config.encryption.algorithm = algorithm;
        self
    }

    pub fn control_flow(mut self, enabled: bool) -> Self {
        self.config.enable_control_flow = enabled;
        self
    }

    pub fn control_flow_mode(mut self, mode: ControlFlowMode) -> Self {
        self.config.control_flow.mode = mode;
        self
    }

    pub fn anti_debug(mut self, enabled: bool) -> Self {
        self.config.enable_anti_debug = enabled;
        self
    }

    pub fn anti_tamper(mut self, enabled: bool) -> Self {
        self.config.enable_anti_tamper = enabled;
        self
    }

    pub fn watermarking(mut self, enabled: bool) -> Self {
        self.config.enable_watermarking = enabled;
        self
    }

    pub fn optimization(mut self, level: OptimizationLevel) -> Self {
        self.config.optimization = level;
        self
    }

    pub fn debug_mode(mut self, mode: DebugMode) -> Self {
        self.config.debug_mode = mode;
        self
    }

    pub fn preserve_public_api(mut self, preserve: bool) -> Self {
        self.config.preserve_public_api = preserve;
        self
    }

    pub fn exclude_namespace(mut self, ns: impl Into<String>) -> Self {
        self.config.excluded_namespaces.insert(ns.into());
        self
    }

    pub fn exclude_type(mut self, name: impl Into<String>) -> Self {
        self.config.excluded_types.insert(name.into());
        self
    }

    pub fn exclude_method(mut self, name: impl Into<String>) -> Self {
        self.config.excluded_methods.insert(name.into());
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
