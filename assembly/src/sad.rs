use std::collections::{BTreeMap, BTreeSet};

use bon::bon;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    ids::{ConnectionId, GroupId, InstanceId, PropertyId},
    properties::Property,
    source::ProfileSource,
    spd::UsesDevice,
};

/// Which side of a component port an external port promotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Uses,
    Provides,
    SupportedInterface,
}

/// A component port (or supported interface) promoted to the application
/// surface. The effective name is `external_name` when given, otherwise
/// the port identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalPort {
    pub component: InstanceId,
    pub port: String,
    #[serde(default)]
    pub external_name: Option<String>,
    pub kind: PortKind,
}

impl ExternalPort {
    pub fn effective_name(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.port)
    }
}

/// A component property promoted to the application surface. The
/// effective id is the alias when given, otherwise the property id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalProperty {
    pub component: InstanceId,
    pub property: PropertyId,
    #[serde(default)]
    pub external_id: Option<PropertyId>,
}

impl ExternalProperty {
    pub fn effective_id(&self) -> &PropertyId {
        self.external_id.as_ref().unwrap_or(&self.property)
    }
}

/// One endpoint of a declared connection. Endpoint shapes are resolved by
/// the connection collaborator, not the factory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortEndpoint {
    pub component: InstanceId,
    pub port: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub uses: PortEndpoint,
    pub provides: PortEndpoint,
}

/// A named group of placements that must share a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostCollocation {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<InstanceId>,
}

/// One component instantiation. Only the first instantiation of a
/// placement is deployed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instantiation {
    pub id: InstanceId,
    #[serde(default)]
    pub naming_service_name: Option<String>,
    #[serde(default)]
    pub usage_name: Option<String>,
    /// Kept as the declared string; parsed when the start sequence is
    /// binned.
    #[serde(default)]
    pub start_order: Option<String>,
    #[serde(default)]
    pub property_overrides: Vec<Property>,
}

#[bon]
impl Instantiation {
    #[builder]
    pub fn new(
        #[builder(into)] id: InstanceId,
        #[builder(into)] naming_service_name: Option<String>,
        #[builder(into)] usage_name: Option<String>,
        #[builder(into)] start_order: Option<String>,
        #[builder(default)] property_overrides: Vec<Property>,
    ) -> Self {
        Self {
            id,
            naming_service_name,
            usage_name,
            start_order,
            property_overrides,
        }
    }
}

/// A component placement: a file ref into the assembly's component-file
/// table plus its instantiations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentPlacement {
    pub file_ref: String,
    pub instantiations: Vec<Instantiation>,
}

impl ComponentPlacement {
    pub fn new(file_ref: impl Into<String>, instantiations: Vec<Instantiation>) -> Self {
        Self {
            file_ref: file_ref.into(),
            instantiations,
        }
    }

    pub fn first_instantiation(&self) -> Option<&Instantiation> {
        self.instantiations.first()
    }
}

/// The software assembly descriptor: everything the factory needs to
/// instantiate one waveform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftwareAssembly {
    pub id: String,
    pub name: String,
    /// Component-file table: file ref to software package path.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    pub placements: Vec<ComponentPlacement>,
    #[serde(default)]
    pub collocations: Vec<HostCollocation>,
    #[serde(default)]
    pub external_ports: Vec<ExternalPort>,
    #[serde(default)]
    pub external_properties: Vec<ExternalProperty>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub uses_devices: Vec<UsesDevice>,
    #[serde(default)]
    pub assembly_controller: Option<InstanceId>,
}

#[bon]
impl SoftwareAssembly {
    #[builder]
    pub fn new(
        #[builder(into)] id: String,
        #[builder(into)] name: String,
        #[builder(default)] files: BTreeMap<String, String>,
        #[builder(default)] placements: Vec<ComponentPlacement>,
        #[builder(default)] collocations: Vec<HostCollocation>,
        #[builder(default)] external_ports: Vec<ExternalPort>,
        #[builder(default)] external_properties: Vec<ExternalProperty>,
        #[builder(default)] connections: Vec<Connection>,
        #[builder(default)] uses_devices: Vec<UsesDevice>,
        #[builder(into)] assembly_controller: Option<InstanceId>,
    ) -> Self {
        Self {
            id,
            name,
            files,
            placements,
            collocations,
            external_ports,
            external_properties,
            connections,
            uses_devices,
            assembly_controller,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &str, source: &dyn ProfileSource) -> Result<Self, Error> {
        let text = source.read_to_string(path)?;
        Self::from_json(&text)
    }

    /// The software package path for a placement's file ref.
    pub fn spd_path(&self, file_ref: &str) -> Option<&str> {
        self.files.get(file_ref).map(String::as_str)
    }

    pub fn instantiation(&self, id: &InstanceId) -> Option<&Instantiation> {
        self.placements
            .iter()
            .flat_map(|placement| placement.instantiations.iter())
            .find(|inst| inst.id == *id)
    }

    /// Checks the assembly's structural invariants.
    ///
    /// `controller_property_ids` is the property descriptor of the
    /// assembly controller, used to reject external property aliases that
    /// shadow the controller's own surface.
    pub fn validate(&self, controller_property_ids: &[PropertyId]) -> Result<(), Error> {
        for placement in &self.placements {
            if self.spd_path(&placement.file_ref).is_none() {
                return Err(Error::UnknownFileRef {
                    file_ref: placement.file_ref.clone(),
                });
            }
            if placement.instantiations.is_empty() {
                return Err(Error::EmptyPlacement {
                    file_ref: placement.file_ref.clone(),
                });
            }
        }

        let mut port_names = BTreeSet::new();
        for port in &self.external_ports {
            if !port_names.insert(port.effective_name()) {
                return Err(Error::DuplicateExternalPort {
                    name: port.effective_name().to_string(),
                });
            }
        }

        let mut property_ids = BTreeSet::new();
        for prop in &self.external_properties {
            if !property_ids.insert(prop.effective_id().as_str()) {
                return Err(Error::DuplicateExternalProperty {
                    id: prop.effective_id().to_string(),
                });
            }
        }
        for id in controller_property_ids {
            if property_ids.contains(id.as_str()) {
                return Err(Error::ControllerPropertyClash { id: id.to_string() });
            }
        }

        let known: BTreeSet<&str> = self
            .placements
            .iter()
            .flat_map(|placement| placement.instantiations.iter())
            .map(|inst| inst.id.as_str())
            .collect();
        for group in &self.collocations {
            for member in &group.members {
                if !known.contains(member.as_str()) {
                    return Err(Error::UnknownCollocatedComponent {
                        group: group.id.to_string(),
                        component: member.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
