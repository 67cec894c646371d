use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("io error: {0}")]
    #[diagnostic(code(assembly::io_error))]
    Io(#[from] std::io::Error),

    #[error("malformed descriptor: {0}")]
    #[diagnostic(code(assembly::malformed_descriptor))]
    Malformed(#[from] serde_json::Error),

    #[error("duplicate external port name `{name}`")]
    #[diagnostic(code(assembly::duplicate_external_port))]
    DuplicateExternalPort { name: String },

    #[error("duplicate external property id `{id}`")]
    #[diagnostic(code(assembly::duplicate_external_property))]
    DuplicateExternalProperty { id: String },

    #[error("assembly controller property `{id}` is already promoted as an external property")]
    #[diagnostic(code(assembly::controller_property_clash))]
    ControllerPropertyClash { id: String },

    #[error("component file ref `{file_ref}` has no software package entry")]
    #[diagnostic(code(assembly::unknown_file_ref))]
    UnknownFileRef { file_ref: String },

    #[error("placement for file ref `{file_ref}` declares no instantiations")]
    #[diagnostic(code(assembly::empty_placement))]
    EmptyPlacement { file_ref: String },

    #[error("collocation group `{group}` references unknown component `{component}`")]
    #[diagnostic(code(assembly::unknown_collocated_component))]
    UnknownCollocatedComponent { group: String, component: String },
}
