use bon::bon;
use serde::{Deserialize, Serialize};

use crate::{
    OS_NAME, OS_VERSION, PROCESSOR_NAME,
    error::Error,
    properties::{Property, PropertyDef, PropertyKind},
    source::ProfileSource,
};

/// How an implementation's code artifact is brought up on a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    Executable,
    SharedLibrary,
    Driver,
    KernelModule,
}

/// The code artifact of one implementation.
///
/// `Executable` and `SharedLibrary` artifacts with an entry point are
/// executed after loading; everything else is load-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub code_type: CodeType,
    pub local_file: String,
    #[serde(default)]
    pub entry_point: Option<String>,
}

impl Code {
    pub fn executable(local_file: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            code_type: CodeType::Executable,
            local_file: local_file.into(),
            entry_point: Some(entry_point.into()),
        }
    }

    pub fn load_only(code_type: CodeType, local_file: impl Into<String>) -> Self {
        Self {
            code_type,
            local_file: local_file.into(),
            entry_point: None,
        }
    }
}

/// An operating-system dependency; `version` is optional and matched
/// exactly when present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsDep {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl OsDep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }
}

/// A device the owner consumes capacity from without being hosted on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsesDevice {
    pub id: String,
    pub dependencies: Vec<Property>,
}

impl UsesDevice {
    pub fn new(id: impl Into<String>, dependencies: Vec<Property>) -> Self {
        Self {
            id: id.into(),
            dependencies,
        }
    }
}

/// One deployable variant of a software package.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub id: String,
    pub code: Code,
    #[serde(default)]
    pub os_deps: Vec<OsDep>,
    #[serde(default)]
    pub processor_deps: Vec<String>,
    #[serde(default)]
    pub dependency_properties: Vec<Property>,
    #[serde(default)]
    pub uses_devices: Vec<UsesDevice>,
    #[serde(default)]
    pub softpkg_deps: Vec<SoftPkg>,
}

#[bon]
impl Implementation {
    #[builder]
    pub fn new(
        #[builder(into)] id: String,
        code: Code,
        #[builder(default)] os_deps: Vec<OsDep>,
        #[builder(default)] processor_deps: Vec<String>,
        #[builder(default)] dependency_properties: Vec<Property>,
        #[builder(default)] uses_devices: Vec<UsesDevice>,
        #[builder(default)] softpkg_deps: Vec<SoftPkg>,
    ) -> Self {
        Self {
            id,
            code,
            os_deps,
            processor_deps,
            dependency_properties,
            uses_devices,
            softpkg_deps,
        }
    }

    /// Whether this implementation can run against the given device PRF
    /// snapshot. Empty dependency lists constrain nothing.
    pub fn matches_device(&self, prf: &[Property]) -> bool {
        self.matches_processor(prf) && self.matches_os(prf)
    }

    fn matches_processor(&self, prf: &[Property]) -> bool {
        if self.processor_deps.is_empty() {
            return true;
        }
        prf_string(prf, PROCESSOR_NAME)
            .is_some_and(|processor| self.processor_deps.iter().any(|dep| dep == processor))
    }

    fn matches_os(&self, prf: &[Property]) -> bool {
        if self.os_deps.is_empty() {
            return true;
        }
        let Some(os_name) = prf_string(prf, OS_NAME) else {
            return false;
        };
        let os_version = prf_string(prf, OS_VERSION);
        self.os_deps.iter().any(|dep| {
            dep.name == os_name
                && match dep.version.as_deref() {
                    Some(version) => os_version == Some(version),
                    None => true,
                }
        })
    }
}

fn prf_string<'a>(prf: &'a [Property], id: &str) -> Option<&'a str> {
    prf.iter()
        .find(|prop| prop.id == id)
        .and_then(|prop| prop.value.as_simple())
        .and_then(|value| value.as_str())
}

/// A software package descriptor: the component profile plus its
/// candidate implementations, in declaration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftPkg {
    pub id: String,
    pub name: String,
    pub spd_path: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub exec_params: Vec<Property>,
    #[serde(default = "default_true")]
    pub sca_compliant: bool,
    #[serde(default = "default_true")]
    pub is_resource: bool,
    #[serde(default = "default_true")]
    pub is_configurable: bool,
    #[serde(default)]
    pub uses_devices: Vec<UsesDevice>,
    pub implementations: Vec<Implementation>,
}

fn default_true() -> bool {
    true
}

#[bon]
impl SoftPkg {
    #[builder]
    pub fn new(
        #[builder(into)] id: String,
        #[builder(into)] name: String,
        #[builder(into)] spd_path: String,
        #[builder(default)] properties: Vec<PropertyDef>,
        #[builder(default)] exec_params: Vec<Property>,
        #[builder(default = true)] sca_compliant: bool,
        #[builder(default = true)] is_resource: bool,
        #[builder(default = true)] is_configurable: bool,
        #[builder(default)] uses_devices: Vec<UsesDevice>,
        #[builder(default)] implementations: Vec<Implementation>,
    ) -> Self {
        Self {
            id,
            name,
            spd_path,
            properties,
            exec_params,
            sca_compliant,
            is_resource,
            is_configurable,
            uses_devices,
            implementations,
        }
    }

    pub fn load(path: &str, source: &dyn ProfileSource) -> Result<Self, Error> {
        let text = source.read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The configure-property snapshot: declared configure properties with
    /// their default values.
    pub fn configure_properties(&self) -> Vec<Property> {
        self.properties
            .iter()
            .filter(|def| def.kind == PropertyKind::Configure)
            .map(|def| Property {
                id: def.id.clone(),
                value: def.value.clone(),
            })
            .collect()
    }

    pub fn property_ids(&self) -> impl Iterator<Item = &crate::ids::PropertyId> {
        self.properties.iter().map(|def| &def.id)
    }

    pub fn has_property(&self, id: &str) -> bool {
        self.properties.iter().any(|def| def.id == id)
    }
}
